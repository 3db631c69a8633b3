mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Largest accepted `max_box_depth`.
pub const MAX_BOX_DEPTH_LIMIT: usize = 256;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    match find_default_config() {
        Some(path) => {
            tracing::debug!("Using config file {:?}", path);
            load_config(&path)
        }
        None => Ok(Config::default()),
    }
}

/// First existing file among the default config locations.
pub fn find_default_config() -> Option<PathBuf> {
    let default_paths = [
        "./sonoscan.toml",
        "~/.config/sonoscan/config.toml",
        "/etc/sonoscan/config.toml",
    ];

    default_paths
        .iter()
        .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
        .find(|path| path.exists())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    let scan = &config.scan;

    for (name, size) in [
        ("mp4_block_size", scan.mp4_block_size),
        ("flac_block_size", scan.flac_block_size),
        ("ogg_block_size", scan.ogg_block_size),
        ("aac_block_size", scan.aac_block_size),
    ] {
        if size == 0 {
            anyhow::bail!("scan.{} cannot be 0", name);
        }
    }

    if scan.max_box_depth == 0 || scan.max_box_depth > MAX_BOX_DEPTH_LIMIT {
        anyhow::bail!(
            "scan.max_box_depth must be between 1 and {}, got {}",
            MAX_BOX_DEPTH_LIMIT,
            scan.max_box_depth
        );
    }

    if scan.max_seek_probes == 0 {
        anyhow::bail!("scan.max_seek_probes cannot be 0");
    }

    if scan.ogg_block_size < 27 {
        tracing::warn!(
            "scan.ogg_block_size of {} cannot hold an Ogg page header; durations will be missing",
            scan.ogg_block_size
        );
    }

    Ok(())
}
