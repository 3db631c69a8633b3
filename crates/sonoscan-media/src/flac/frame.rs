//! FLAC frame header decoding.

use crate::bits::{crc8, read_utf8_u32, read_utf8_u64};

/// Longest possible frame header: sync, codes, 7-byte coded number,
/// 16-bit block size, 16-bit sample rate and CRC-8.
pub const MAX_FRAME_HEADER: usize = 16;

/// How the coded number in a frame header is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocking {
    /// Coded number is a frame index.
    Fixed,
    /// Coded number is the first sample index.
    Variable,
}

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub blocking: Blocking,
    pub block_size: u32,
    /// `None` when the stream's STREAMINFO rate applies.
    pub sample_rate: Option<u32>,
    pub channels: u8,
    /// `None` when the stream's STREAMINFO depth applies.
    pub bits_per_sample: Option<u8>,
    pub coded_number: u64,
    /// Header length in bytes including the CRC.
    pub length: usize,
}

impl FrameHeader {
    /// Index of the first sample in this frame.
    ///
    /// Fixed-blocking frames count frames, so the stream's nominal block size
    /// converts the frame index to samples.
    pub fn first_sample(&self, fixed_block_size: u32) -> u64 {
        match self.blocking {
            Blocking::Fixed => {
                let block = if fixed_block_size == 0 {
                    self.block_size
                } else {
                    fixed_block_size
                };
                self.coded_number * u64::from(block)
            }
            Blocking::Variable => self.coded_number,
        }
    }
}

/// Decode a frame header at the start of `raw`.
///
/// Returns `None` unless the sync code, every reserved code, and the header
/// CRC-8 check out.
pub fn parse_frame_header(raw: &[u8]) -> Option<FrameHeader> {
    if raw.len() < 5 || raw[0] != 0xFF || raw[1] & 0xFE != 0xF8 {
        return None;
    }
    let blocking = if raw[1] & 0x01 == 0 {
        Blocking::Fixed
    } else {
        Blocking::Variable
    };

    let block_code = raw[2] >> 4;
    let rate_code = raw[2] & 0x0F;
    let channel_code = raw[3] >> 4;
    let depth_code = (raw[3] >> 1) & 0x07;
    if block_code == 0 || rate_code == 0x0F || channel_code > 10 || depth_code == 3 {
        return None;
    }
    if raw[3] & 0x01 != 0 {
        return None;
    }

    let (coded_number, coded_len) = match blocking {
        Blocking::Fixed => read_utf8_u32(&raw[4..]).map(|(n, len)| (u64::from(n), len))?,
        Blocking::Variable => read_utf8_u64(&raw[4..])?,
    };
    let mut pos = 4 + coded_len;

    let block_size = match block_code {
        1 => 192,
        2..=5 => 576 << (block_code - 2),
        6 => u32::from(*raw.get(pos)?) + 1,
        7 => u32::from(u16::from_be_bytes([*raw.get(pos)?, *raw.get(pos + 1)?])) + 1,
        _ => 256 << (block_code - 8),
    };
    pos += match block_code {
        6 => 1,
        7 => 2,
        _ => 0,
    };

    let sample_rate = match rate_code {
        0 => None,
        1 => Some(88_200),
        2 => Some(176_400),
        3 => Some(192_000),
        4 => Some(8_000),
        5 => Some(16_000),
        6 => Some(22_050),
        7 => Some(24_000),
        8 => Some(32_000),
        9 => Some(44_100),
        10 => Some(48_000),
        11 => Some(96_000),
        12 => Some(u32::from(*raw.get(pos)?) * 1000),
        13 => Some(u32::from(u16::from_be_bytes([*raw.get(pos)?, *raw.get(pos + 1)?]))),
        _ => Some(u32::from(u16::from_be_bytes([*raw.get(pos)?, *raw.get(pos + 1)?])) * 10),
    };
    pos += match rate_code {
        12 => 1,
        13 | 14 => 2,
        _ => 0,
    };

    let crc = *raw.get(pos)?;
    if crc8(&raw[..pos]) != crc {
        return None;
    }

    let channels = match channel_code {
        0..=7 => channel_code + 1,
        _ => 2,
    };
    let bits_per_sample = match depth_code {
        0 => None,
        1 => Some(8),
        2 => Some(12),
        4 => Some(16),
        5 => Some(20),
        6 => Some(24),
        _ => Some(32),
    };

    Some(FrameHeader {
        blocking,
        block_size,
        sample_rate,
        channels,
        bits_per_sample,
        coded_number,
        length: pos + 1,
    })
}
