//! Vorbis comment splitting, shared by FLAC and Ogg.

use crate::{Error, Result};
use bytes::Buf;
use sonoscan_common::{insert_multi, TagMap, TagValue};
use tracing::trace;

/// A decoded Vorbis comment block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VorbisComments {
    pub vendor: String,
    /// `(KEY, value)` pairs in file order, keys upper-cased.
    pub comments: Vec<(String, String)>,
}

impl VorbisComments {
    /// Split a comment block: a length-prefixed vendor string followed by a
    /// count of length-prefixed `key=value` entries, all little-endian.
    pub fn parse(mut raw: &[u8]) -> Result<Self> {
        let vendor = read_string(&mut raw, "vendor string")?;
        let count = read_u32(&mut raw, "comment count")?;

        let mut comments = Vec::new();
        for _ in 0..count {
            let entry = read_string(&mut raw, "comment")?;
            match entry.split_once('=') {
                Some((key, value)) => comments.push((key.to_uppercase(), value.to_string())),
                None => trace!(entry = %entry, "Skipping comment without '='"),
            }
        }

        Ok(Self { vendor, comments })
    }

    /// Merge into a tag map. Repeated keys become lists.
    pub fn apply(self, tags: &mut TagMap) {
        if !self.vendor.is_empty() {
            tags.insert("VENDOR".into(), TagValue::Text(self.vendor));
        }
        for (key, value) in self.comments {
            insert_multi(tags, key, TagValue::Text(value));
        }
    }
}

fn read_u32(raw: &mut &[u8], what: &str) -> Result<u32> {
    if raw.remaining() < 4 {
        return Err(Error::malformed(format!("Vorbis {} truncated", what)));
    }
    Ok(raw.get_u32_le())
}

fn read_string(raw: &mut &[u8], what: &str) -> Result<String> {
    let len = read_u32(raw, what)? as usize;
    if raw.remaining() < len {
        return Err(Error::malformed(format!(
            "Vorbis {} declares {} bytes, {} remain",
            what,
            len,
            raw.remaining()
        )));
    }
    let value = String::from_utf8_lossy(&raw[..len]).into_owned();
    raw.advance(len);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(vendor: &str, entries: &[&str]) -> Vec<u8> {
        let mut out = (vendor.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(vendor.as_bytes());
        out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for entry in entries {
            out.extend_from_slice(&(entry.len() as u32).to_le_bytes());
            out.extend_from_slice(entry.as_bytes());
        }
        out
    }

    #[test]
    fn test_split_comments() {
        let raw = block("reference libFLAC 1.4.3", &["title=Intro", "Artist=A", "ARTIST=B", "junk"]);
        let comments = VorbisComments::parse(&raw).unwrap();
        assert_eq!(comments.vendor, "reference libFLAC 1.4.3");
        assert_eq!(comments.comments.len(), 3);
        assert_eq!(comments.comments[0], ("TITLE".to_string(), "Intro".to_string()));

        let mut tags = TagMap::new();
        comments.apply(&mut tags);
        assert_eq!(tags["TITLE"].as_text(), Some("Intro"));
        assert_eq!(tags["ARTIST"].as_list().map(|l| l.len()), Some(2));
        assert_eq!(tags["VENDOR"].as_text(), Some("reference libFLAC 1.4.3"));
    }

    #[test]
    fn test_value_may_contain_equals() {
        let raw = block("", &["COMMENT=a=b"]);
        let comments = VorbisComments::parse(&raw).unwrap();
        assert_eq!(comments.comments[0].1, "a=b");
    }

    #[test]
    fn test_truncated_entry() {
        let mut raw = block("v", &["TITLE=x"]);
        raw.truncate(raw.len() - 2);
        assert!(matches!(
            VorbisComments::parse(&raw),
            Err(Error::MalformedContainer(_))
        ));
    }
}
