//! MP4 box definitions.

use std::fmt;

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STTS: Self = Self(*b"stts");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const UDTA: Self = Self(*b"udta");
    pub const META: Self = Self(*b"meta");
    pub const ILST: Self = Self(*b"ilst");
    pub const DATA: Self = Self(*b"data");
    pub const NAME: Self = Self(*b"name");
    pub const MEAN: Self = Self(*b"mean");
    pub const FREEFORM: Self = Self(*b"----");
    pub const ESDS: Self = Self(*b"esds");
    pub const ALAC: Self = Self(*b"alac");
    pub const WAVE: Self = Self(*b"wave");
    pub const UUID: Self = Self(*b"uuid");

    /// Whether this box only groups child boxes.
    pub fn is_container(&self) -> bool {
        matches!(
            *self,
            Self::MOOV
                | Self::TRAK
                | Self::MDIA
                | Self::MINF
                | Self::STBL
                | Self::UDTA
                | Self::META
                | Self::ILST
        )
    }
}

impl fmt::Display for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // non-ASCII codes such as the iTunes copyright sign print escaped
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

/// A box header as read by the walker.
///
/// Invariant: `size >= header_size`, and the box ends inside its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxRecord {
    pub box_type: BoxType,
    /// Declared size including the header, after resolving size 0 and 1.
    pub size: u64,
    /// File offset where the payload starts.
    pub payload_offset: u64,
    /// 8, 16 with an extended size, plus 16 for `uuid` boxes.
    pub header_size: u8,
}

impl BoxRecord {
    /// File offset of the first header byte.
    pub fn offset(&self) -> u64 {
        self.payload_offset - self.header_size as u64
    }

    /// Payload size (size - header).
    pub fn payload_size(&self) -> u64 {
        self.size - self.header_size as u64
    }

    /// File offset one past the last byte of the box.
    pub fn end(&self) -> u64 {
        self.offset() + self.size
    }

    /// Whether the header carries a 64-bit size field.
    pub fn has_large_size(&self) -> bool {
        if self.box_type == BoxType::UUID {
            self.header_size >= 32
        } else {
            self.header_size >= 16
        }
    }
}

/// Handler type for a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerType {
    Audio,
    Video,
    Text,
    Meta,
    Unknown([u8; 4]),
}

impl HandlerType {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"soun" => Self::Audio,
            b"vide" => Self::Video,
            b"text" | b"sbtl" => Self::Text,
            b"meta" | b"mdir" => Self::Meta,
            _ => Self::Unknown(bytes),
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }

    pub fn as_str(&self) -> String {
        match self {
            Self::Audio => "soun".to_string(),
            Self::Video => "vide".to_string(),
            Self::Text => "text".to_string(),
            Self::Meta => "meta".to_string(),
            Self::Unknown(code) => BoxType(*code).to_string(),
        }
    }
}
