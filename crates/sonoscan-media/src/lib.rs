//! Sonoscan-Media: structural parsing of audio containers.
//!
//! This crate reads layout and tags from MP4, FLAC, Ogg Vorbis and ADTS
//! streams without decoding audio, and maps playback positions to byte
//! offsets:
//!
//! - **MP4**: box tree walk, sample tables, and a seek that rewrites the
//!   tables so the delivered stream starts at the target sample ([`mp4`])
//! - **FLAC**: metadata blocks and a seek-point/bisection frame search ([`flac`])
//! - **Ogg / ADTS**: layout and tags only ([`ogg`], [`aac`])
//!
//! # Examples
//!
//! ```no_run
//! use sonoscan_media::{scan_file, ScanOptions};
//! use std::path::Path;
//!
//! let result = scan_file(Path::new("track.flac"), &ScanOptions::default())?;
//! println!("{:?} ms", result.layout.duration_ms);
//! # Ok::<(), sonoscan_media::Error>(())
//! ```

pub mod aac;
pub mod bits;
pub mod cursor;
pub mod detect;
pub mod error;
pub mod flac;
pub mod id3;
pub mod mp4;
pub mod ogg;
pub mod vorbis;

pub use error::{Error, Result};

use aac::AdtsFile;
use flac::FlacFile;
use id3::{Id3Decoder, SkipId3};
use mp4::{Mp4File, ParseMode};
use ogg::OggFile;
use sonoscan_common::paths::format_from_extension;
use sonoscan_common::{AudioFormat, AudioLayout, TagMap};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tracing::debug;

/// Tunables shared by every parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Refill size of the read window, per format.
    pub mp4_block_size: usize,
    pub flac_block_size: usize,
    pub ogg_block_size: usize,
    pub aac_block_size: usize,
    /// Deepest box nesting accepted before the file is rejected.
    pub max_box_depth: usize,
    /// Probe budget of the FLAC bisection search.
    pub max_seek_probes: u32,
    /// Keep embedded picture bytes in the tags.
    pub include_artwork: bool,
    /// File name used where a container refers to its own file (cue sheets).
    pub source_name: Option<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            mp4_block_size: 4096,
            flac_block_size: 4096,
            ogg_block_size: 4500,
            aac_block_size: 4096,
            max_box_depth: 64,
            max_seek_probes: 64,
            include_artwork: true,
            source_name: None,
        }
    }
}

/// Where playback of a target position starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePosition {
    /// Absolute byte offset of the frame or sample.
    pub byte_offset: u64,
    /// First sample at that offset.
    pub sample: u64,
}

/// Everything a scan produces.
#[derive(Debug)]
pub struct ScanResult {
    pub format: AudioFormat,
    pub layout: AudioLayout,
    /// Format details that do not fit [`AudioLayout`].
    pub info: TagMap,
    pub tags: TagMap,
    /// Non-fatal problems, e.g. an audio track without sample tables.
    pub incomplete: Vec<Error>,
}

/// Detect the container and scan it.
pub fn scan<R: Read + Seek>(reader: R, options: &ScanOptions) -> Result<ScanResult> {
    scan_with_id3(reader, options, &mut SkipId3)
}

/// Like [`scan`], handing any leading ID3v2 tag to `decoder`.
pub fn scan_with_id3<R: Read + Seek>(
    mut reader: R,
    options: &ScanOptions,
    decoder: &mut dyn Id3Decoder,
) -> Result<ScanResult> {
    let format = detect::sniff_format(&mut reader)?
        .ok_or_else(|| Error::unsupported("unrecognised audio container"))?;
    scan_format(reader, format, options, decoder)
}

/// Scan a file, falling back to its extension when sniffing is inconclusive.
pub fn scan_file(path: &Path, options: &ScanOptions) -> Result<ScanResult> {
    let mut reader = BufReader::new(File::open(path)?);
    let format = match detect::sniff_format(&mut reader)? {
        Some(format) => format,
        None => format_from_extension(path).ok_or_else(|| {
            Error::unsupported(format!("cannot tell the container of {}", path.display()))
        })?,
    };
    debug!(path = %path.display(), %format, "Scanning");

    let mut options = options.clone();
    if options.source_name.is_none() {
        options.source_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
    }
    scan_format(reader, format, &options, &mut SkipId3)
}

/// Scan a stream whose container is already known.
pub fn scan_format<R: Read + Seek>(
    reader: R,
    format: AudioFormat,
    options: &ScanOptions,
    decoder: &mut dyn Id3Decoder,
) -> Result<ScanResult> {
    let result = match format {
        AudioFormat::Mp4 => {
            let file = Mp4File::parse(reader, ParseMode::Scan, options)?;
            ScanResult {
                format,
                layout: file.layout(),
                info: file.info(),
                incomplete: file.incomplete().into_iter().collect(),
                tags: file.tags,
            }
        }
        AudioFormat::Flac => {
            let file = FlacFile::parse_with_id3(reader, options, decoder)?;
            ScanResult {
                format,
                layout: file.layout(),
                info: file.info(),
                tags: file.tags,
                incomplete: Vec::new(),
            }
        }
        AudioFormat::Ogg => {
            let file = OggFile::parse(reader, options)?;
            ScanResult {
                format,
                layout: file.layout(),
                info: file.info(),
                tags: file.tags,
                incomplete: Vec::new(),
            }
        }
        AudioFormat::Aac => {
            let file = AdtsFile::parse_with_id3(reader, options, decoder)?;
            ScanResult {
                format,
                layout: file.layout(),
                info: file.info(),
                tags: file.tags,
                incomplete: Vec::new(),
            }
        }
    };
    Ok(result)
}

/// Byte offset of the frame or sample playing at `time_ms`.
///
/// Supported for MP4 and FLAC.
pub fn find_frame<R: Read + Seek>(
    mut reader: R,
    time_ms: u64,
    options: &ScanOptions,
) -> Result<FramePosition> {
    match detect::sniff_format(&mut reader)? {
        Some(AudioFormat::Mp4) => {
            Mp4File::parse(&mut reader, ParseMode::Seek, options)?.find_frame(time_ms)
        }
        Some(AudioFormat::Flac) => {
            FlacFile::parse(&mut reader, options)?.find_frame(&mut reader, time_ms)
        }
        Some(other) => Err(Error::unsupported(format!("seeking in {} streams", other))),
        None => Err(Error::unsupported("unrecognised audio container")),
    }
}
