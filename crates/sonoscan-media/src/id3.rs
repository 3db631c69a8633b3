//! ID3v2 tag boundaries.
//!
//! Only the header is interpreted here. Frame decoding belongs to an
//! [`Id3Decoder`] supplied by the caller.

use crate::cursor::ByteCursor;
use crate::{Error, Result};
use sonoscan_common::TagMap;
use std::io::{Read, Seek};
use tracing::debug;

/// Size of the ID3v2 header and of the optional footer.
pub const ID3_HEADER_SIZE: usize = 10;

const FLAG_FOOTER: u8 = 0x10;

/// A detected ID3v2 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Id3Header {
    pub major: u8,
    pub revision: u8,
    pub flags: u8,
    /// Synchsafe tag size, excluding header and footer.
    pub tag_size: u32,
}

impl Id3Header {
    /// Recognise `ID3` followed by a version below 0xFF and four synchsafe
    /// size bytes.
    pub fn detect(raw: &[u8]) -> Option<Self> {
        let raw = raw.get(..ID3_HEADER_SIZE)?;
        if &raw[..3] != b"ID3" || raw[3] == 0xFF || raw[4] == 0xFF {
            return None;
        }
        if raw[6..10].iter().any(|b| b & 0x80 != 0) {
            return None;
        }
        let tag_size = raw[6..10]
            .iter()
            .fold(0u32, |size, b| (size << 7) | u32::from(*b));
        Some(Self {
            major: raw[3],
            revision: raw[4],
            flags: raw[5],
            tag_size,
        })
    }

    pub fn has_footer(&self) -> bool {
        self.flags & FLAG_FOOTER != 0
    }

    /// Bytes occupied by the whole tag, header and footer included.
    pub fn total_size(&self) -> u64 {
        let footer = if self.has_footer() { ID3_HEADER_SIZE as u64 } else { 0 };
        ID3_HEADER_SIZE as u64 + u64::from(self.tag_size) + footer
    }

    pub fn version(&self) -> String {
        format!("ID3v2.{}.{}", self.major, self.revision)
    }
}

/// Decodes the bytes of an ID3v2 tag into tags.
pub trait Id3Decoder {
    /// `tag` holds the whole tag, starting with its 10-byte header.
    fn decode(&mut self, tag: &[u8]) -> Result<TagMap>;
}

/// Decoder that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipId3;

impl Id3Decoder for SkipId3 {
    fn decode(&mut self, _tag: &[u8]) -> Result<TagMap> {
        Ok(TagMap::new())
    }
}

/// Consume an ID3v2 tag at the cursor, merging what `decoder` returns.
///
/// Returns the tag version, or `None` with the cursor untouched when there is
/// no tag.
pub(crate) fn read_leading_tag<R: Read + Seek>(
    cursor: &mut ByteCursor<R>,
    decoder: &mut dyn Id3Decoder,
    tags: &mut TagMap,
) -> Result<Option<String>> {
    let avail = cursor.fill_up_to(ID3_HEADER_SIZE)?;
    let Some(header) = Id3Header::detect(&cursor.window()[..avail]) else {
        return Ok(None);
    };

    let total = header.total_size();
    if total > cursor.remaining() {
        return Err(Error::malformed(format!(
            "ID3v2 tag of {} bytes extends past end of file ({} remain)",
            total,
            cursor.remaining()
        )));
    }
    let offset = cursor.position();
    let tag = cursor.take(total as usize)?;
    debug!(offset, size = total, version = %header.version(), "Found ID3v2 tag");
    tags.extend(decoder.decode(&tag)?);
    Ok(Some(header.version()))
}
