use serde::{Deserialize, Serialize};
use sonoscan_media::ScanOptions;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
}

/// Parser tunables, mapped onto [`ScanOptions`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScanConfig {
    /// Read window refill size for MP4 box walking
    #[serde(default = "default_block_size")]
    pub mp4_block_size: usize,

    /// Read window refill size for FLAC metadata and frame scanning
    #[serde(default = "default_block_size")]
    pub flac_block_size: usize,

    /// Tail window searched for the last Ogg page
    #[serde(default = "default_ogg_block_size")]
    pub ogg_block_size: usize,

    #[serde(default = "default_block_size")]
    pub aac_block_size: usize,

    /// Deepest MP4 box nesting accepted (max 256)
    #[serde(default = "default_max_box_depth")]
    pub max_box_depth: usize,

    /// Probe budget of the FLAC frame search
    #[serde(default = "default_max_seek_probes")]
    pub max_seek_probes: u32,

    /// Keep embedded cover art bytes in the tags
    #[serde(default = "default_include_artwork")]
    pub include_artwork: bool,
}

fn default_block_size() -> usize {
    4096
}

fn default_ogg_block_size() -> usize {
    4500
}

fn default_max_box_depth() -> usize {
    64
}

fn default_max_seek_probes() -> u32 {
    64
}

fn default_include_artwork() -> bool {
    true
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            mp4_block_size: default_block_size(),
            flac_block_size: default_block_size(),
            ogg_block_size: default_ogg_block_size(),
            aac_block_size: default_block_size(),
            max_box_depth: default_max_box_depth(),
            max_seek_probes: default_max_seek_probes(),
            include_artwork: default_include_artwork(),
        }
    }
}

impl ScanConfig {
    pub fn to_options(&self) -> ScanOptions {
        ScanOptions {
            mp4_block_size: self.mp4_block_size,
            flac_block_size: self.flac_block_size,
            ogg_block_size: self.ogg_block_size,
            aac_block_size: self.aac_block_size,
            max_box_depth: self.max_box_depth,
            max_seek_probes: self.max_seek_probes,
            include_artwork: self.include_artwork,
            source_name: None,
        }
    }
}

impl From<&ScanConfig> for ScanOptions {
    fn from(config: &ScanConfig) -> Self {
        config.to_options()
    }
}
