//! Seek resolution for the `seek` command.

use crate::report::SeekReport;
use anyhow::{Context, Result};
use bytes::Bytes;
use sonoscan_common::paths::format_from_extension;
use sonoscan_common::AudioFormat;
use sonoscan_media::flac::FlacFile;
use sonoscan_media::mp4::{Mp4File, ParseMode};
use sonoscan_media::{detect, ScanOptions};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// What to seek to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekTarget {
    TimeMs(u64),
    Sample(u64),
}

/// A resolved seek plus, for MP4, the header to send before `byte_offset`.
#[derive(Debug, Clone)]
pub struct SeekOutcome {
    pub report: SeekReport,
    pub header: Option<Bytes>,
}

/// Resolve `target` in the MP4 or FLAC file at `path`.
///
/// MP4 seeks rewrite the sample tables; FLAC seeks locate the frame.
pub fn seek_file(path: &Path, target: SeekTarget, options: &ScanOptions) -> Result<SeekOutcome> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("Failed to open {:?}", path))?,
    );
    let format = detect::sniff_format(&mut reader)?
        .or_else(|| format_from_extension(path))
        .with_context(|| format!("Cannot tell the container of {:?}", path))?;
    tracing::debug!(?target, %format, "Seeking in {:?}", path);

    let (sample, byte_offset, header) = match format {
        AudioFormat::Mp4 => {
            let file = Mp4File::parse(&mut reader, ParseMode::Seek, options)?;
            let seek = match target {
                SeekTarget::TimeMs(ms) => file.seek_time(&mut reader, ms)?,
                SeekTarget::Sample(sample) => {
                    let sample = u32::try_from(sample)
                        .with_context(|| format!("Sample {} is out of range for MP4", sample))?;
                    file.seek_sample(&mut reader, sample)?
                }
            };
            (u64::from(seek.sample), seek.start_offset, Some(seek.header))
        }
        AudioFormat::Flac => {
            let file = FlacFile::parse(&mut reader, options)?;
            let position = match target {
                SeekTarget::TimeMs(ms) => file.find_frame(&mut reader, ms)?,
                SeekTarget::Sample(sample) => file.seek_sample(&mut reader, sample)?,
            };
            (position.sample, position.byte_offset, None)
        }
        other => anyhow::bail!("Seeking is not supported for {} files", other),
    };

    Ok(SeekOutcome {
        report: SeekReport {
            path: path.to_path_buf(),
            format,
            sample,
            byte_offset,
            header_size: header.as_ref().map(Bytes::len),
        },
        header,
    })
}
