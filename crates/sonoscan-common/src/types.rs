//! Core value types shared by the parsers and the reporting layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Container format of an audio file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// MP4 / QuickTime atom tree (m4a, m4b, mp4).
    Mp4,
    /// Native FLAC stream.
    Flac,
    /// Ogg pages carrying Vorbis.
    Ogg,
    /// Raw AAC in ADTS frames.
    Aac,
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mp4 => write!(f, "mp4"),
            Self::Flac => write!(f, "flac"),
            Self::Ogg => write!(f, "ogg"),
            Self::Aac => write!(f, "aac"),
        }
    }
}

/// Structural layout of the audio payload.
///
/// Fields that could not be derived are `None` so callers can tell a missing
/// value apart from a zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioLayout {
    /// Total size of the file in bytes.
    pub file_size: u64,
    /// Byte offset of the first audio byte.
    pub audio_start_offset: u64,
    /// Number of audio payload bytes.
    pub audio_byte_size: u64,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u8>,
    pub bits_per_sample: Option<u8>,
    pub total_samples: Option<u64>,
    pub duration_ms: Option<u64>,
    /// Average bitrate in bits per second.
    pub bitrate: Option<u32>,
}

impl AudioLayout {
    /// Bitrate from payload size and duration, `bytes * 8000 / ms`.
    pub fn derive_bitrate(audio_byte_size: u64, duration_ms: u64) -> Option<u32> {
        if duration_ms == 0 {
            return None;
        }
        let bitrate = (audio_byte_size as u128 * 8000) / duration_ms as u128;
        u32::try_from(bitrate).ok()
    }

    /// Duration in milliseconds from a unit count and its rate (floor).
    pub fn derive_duration_ms(units: u64, rate: u64) -> Option<u64> {
        if rate == 0 {
            return None;
        }
        u64::try_from(units as u128 * 1000 / rate as u128).ok()
    }
}

/// Ordered tag dictionary. Keys sort deterministically for stable output.
pub type TagMap = BTreeMap<String, TagValue>;

/// A single tag value. Nested maps hold hierarchical tag groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Text(String),
    Integer(i64),
    Binary(Vec<u8>),
    List(Vec<TagValue>),
    Map(TagMap),
}

impl TagValue {
    /// Borrow the text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Borrow the list content, if this is a list value.
    pub fn as_list(&self) -> Option<&[TagValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the nested map, if this is a map value.
    pub fn as_map(&self) -> Option<&TagMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for TagValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<Vec<u8>> for TagValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl From<TagMap> for TagValue {
    fn from(value: TagMap) -> Self {
        Self::Map(value)
    }
}

/// Insert a value, turning repeated keys into a list.
pub fn insert_multi(tags: &mut TagMap, key: impl Into<String>, value: TagValue) {
    use std::collections::btree_map::Entry;

    match tags.entry(key.into()) {
        Entry::Vacant(slot) => {
            slot.insert(value);
        }
        Entry::Occupied(mut slot) => match slot.get_mut() {
            TagValue::List(items) => items.push(value),
            existing => {
                let first = std::mem::replace(existing, TagValue::List(Vec::new()));
                *existing = TagValue::List(vec![first, value]);
            }
        },
    }
}
