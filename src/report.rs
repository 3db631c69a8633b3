//! Text and JSON rendering of scan and seek results.

use serde::Serialize;
use sonoscan_common::{AudioFormat, AudioLayout, TagMap, TagValue};
use sonoscan_media::ScanResult;
use std::fmt::Write;
use std::path::{Path, PathBuf};

/// Longest text value printed in full by the text renderer.
const MAX_TEXT_WIDTH: usize = 72;

/// Serializable view of a [`ScanResult`].
///
/// Binary tag values are replaced by a size note so reports stay printable.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub path: PathBuf,
    pub format: AudioFormat,
    pub layout: AudioLayout,
    pub info: TagMap,
    pub tags: TagMap,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub incomplete: Vec<String>,
}

impl ScanReport {
    pub fn new(path: &Path, result: ScanResult) -> Self {
        Self {
            path: path.to_path_buf(),
            format: result.format,
            layout: result.layout,
            info: summarize_binary(result.info),
            tags: summarize_binary(result.tags),
            incomplete: result.incomplete.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let layout = &self.layout;

        let _ = writeln!(out, "File: {}", self.path.display());
        let _ = writeln!(out, "Format: {}", self.format);
        let _ = writeln!(out, "Size: {} bytes", layout.file_size);
        let _ = writeln!(
            out,
            "Audio: {} bytes at offset {}",
            layout.audio_byte_size, layout.audio_start_offset
        );
        if let Some(ms) = layout.duration_ms {
            let _ = writeln!(out, "Duration: {} ({} ms)", format_duration(ms), ms);
        }
        if let Some(rate) = layout.sample_rate {
            let _ = writeln!(out, "Sample rate: {} Hz", rate);
        }
        if let Some(channels) = layout.channel_count {
            let _ = writeln!(out, "Channels: {}", channels);
        }
        if let Some(bits) = layout.bits_per_sample {
            let _ = writeln!(out, "Bits per sample: {}", bits);
        }
        if let Some(samples) = layout.total_samples {
            let _ = writeln!(out, "Samples: {}", samples);
        }
        if let Some(bitrate) = layout.bitrate {
            let _ = writeln!(out, "Bitrate: {} kbit/s", bitrate / 1000);
        }

        if !self.info.is_empty() {
            let _ = writeln!(out, "\nInfo:");
            write_map(&mut out, &self.info, 1);
        }
        let _ = writeln!(out, "\nTags: {}", self.tags.len());
        write_map(&mut out, &self.tags, 1);

        for problem in &self.incomplete {
            let _ = writeln!(out, "\nWarning: {}", problem);
        }
        out
    }
}

/// Result of a seek, for printing.
#[derive(Debug, Clone, Serialize)]
pub struct SeekReport {
    pub path: PathBuf,
    pub format: AudioFormat,
    /// First sample delivered from `byte_offset`.
    pub sample: u64,
    pub byte_offset: u64,
    /// Size of the rewritten MP4 header, when one was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_size: Option<usize>,
}

impl SeekReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "File: {}", self.path.display());
        let _ = writeln!(out, "Format: {}", self.format);
        let _ = writeln!(out, "Sample: {}", self.sample);
        let _ = writeln!(out, "Byte offset: {}", self.byte_offset);
        if let Some(size) = self.header_size {
            let _ = writeln!(out, "Header: {} bytes", size);
        }
        out
    }
}

/// `H:MM:SS.mmm` for a millisecond count.
pub fn format_duration(ms: u64) -> String {
    let secs = ms / 1000;
    format!(
        "{}:{:02}:{:02}.{:03}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        ms % 1000
    )
}

fn summarize_binary(map: TagMap) -> TagMap {
    map.into_iter()
        .map(|(key, value)| (key, summarize_value(value)))
        .collect()
}

fn summarize_value(value: TagValue) -> TagValue {
    match value {
        TagValue::Binary(data) => TagValue::Text(format!("<{} bytes>", data.len())),
        TagValue::List(items) => TagValue::List(items.into_iter().map(summarize_value).collect()),
        TagValue::Map(map) => TagValue::Map(summarize_binary(map)),
        other => other,
    }
}

fn write_map(out: &mut String, map: &TagMap, depth: usize) {
    let indent = "  ".repeat(depth);
    for (key, value) in map {
        match value {
            TagValue::Map(inner) => {
                let _ = writeln!(out, "{}{}:", indent, key);
                write_map(out, inner, depth + 1);
            }
            TagValue::List(items) if items.iter().any(|item| matches!(item, TagValue::Map(_))) => {
                let _ = writeln!(out, "{}{}:", indent, key);
                for (index, item) in items.iter().enumerate() {
                    match item {
                        TagValue::Map(inner) => {
                            let _ = writeln!(out, "{}  [{}]", indent, index);
                            write_map(out, inner, depth + 2);
                        }
                        other => {
                            let _ = writeln!(out, "{}  [{}] {}", indent, index, scalar_text(other));
                        }
                    }
                }
            }
            other => {
                let _ = writeln!(out, "{}{}: {}", indent, key, scalar_text(other));
            }
        }
    }
}

fn scalar_text(value: &TagValue) -> String {
    match value {
        TagValue::Text(text) => truncate(text),
        TagValue::Integer(n) => n.to_string(),
        TagValue::Binary(data) => format!("<{} bytes>", data.len()),
        TagValue::List(items) => items
            .iter()
            .map(scalar_text)
            .collect::<Vec<_>>()
            .join("; "),
        TagValue::Map(map) => format!("<{} entries>", map.len()),
    }
}

fn truncate(text: &str) -> String {
    let single_line = text.replace('\n', " ");
    match single_line.char_indices().nth(MAX_TEXT_WIDTH) {
        Some((cut, _)) => format!("{}...", &single_line[..cut]),
        None => single_line,
    }
}
