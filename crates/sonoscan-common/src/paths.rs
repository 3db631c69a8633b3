//! Path utilities for guessing an audio format by extension.
//!
//! Content sniffing is authoritative; these helpers are the fallback when the
//! leading bytes are inconclusive.

use crate::AudioFormat;
use std::path::Path;

const MP4_EXTENSIONS: &[&str] = &["m4a", "m4b", "m4p", "mp4", "3gp"];
const FLAC_EXTENSIONS: &[&str] = &["flac", "fla"];
const OGG_EXTENSIONS: &[&str] = &["ogg", "oga"];
const AAC_EXTENSIONS: &[&str] = &["aac", "adts"];

/// Guess the container format from the file extension.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use sonoscan_common::AudioFormat;
/// use sonoscan_common::paths::format_from_extension;
///
/// assert_eq!(format_from_extension(Path::new("a.FLAC")), Some(AudioFormat::Flac));
/// assert_eq!(format_from_extension(Path::new("notes.txt")), None);
/// ```
pub fn format_from_extension(path: &Path) -> Option<AudioFormat> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let ext = ext.as_str();

    if MP4_EXTENSIONS.contains(&ext) {
        Some(AudioFormat::Mp4)
    } else if FLAC_EXTENSIONS.contains(&ext) {
        Some(AudioFormat::Flac)
    } else if OGG_EXTENSIONS.contains(&ext) {
        Some(AudioFormat::Ogg)
    } else if AAC_EXTENSIONS.contains(&ext) {
        Some(AudioFormat::Aac)
    } else {
        None
    }
}

/// Check if a path has a supported audio extension.
pub fn is_audio_file(path: &Path) -> bool {
    format_from_extension(path).is_some()
}
