//! FLAC metadata blocks.

use crate::{Error, Result};
use bitstream_io::{BigEndian, BitRead, BitReader};
use bytes::{Buf, Bytes};
use sonoscan_common::{TagMap, TagValue};
use std::fmt::Write as _;
use tracing::warn;

/// Size of a STREAMINFO body.
pub const STREAMINFO_SIZE: u32 = 34;
/// Size of one SEEKTABLE record.
pub const SEEK_POINT_SIZE: usize = 18;
/// Sample number marking an unused seek point.
pub const PLACEHOLDER_POINT: u64 = u64::MAX;

/// Metadata block type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    StreamInfo,
    Padding,
    Application,
    SeekTable,
    VorbisComment,
    CueSheet,
    Picture,
    Reserved(u8),
}

impl From<u8> for BlockType {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::StreamInfo,
            1 => Self::Padding,
            2 => Self::Application,
            3 => Self::SeekTable,
            4 => Self::VorbisComment,
            5 => Self::CueSheet,
            6 => Self::Picture,
            other => Self::Reserved(other),
        }
    }
}

/// The 4-byte header in front of every metadata block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub block_type: BlockType,
    pub is_last: bool,
    pub length: u32,
}

impl BlockHeader {
    pub fn parse(raw: [u8; 4]) -> Self {
        Self {
            block_type: BlockType::from(raw[0] & 0x7F),
            is_last: raw[0] & 0x80 != 0,
            length: u32::from_be_bytes([0, raw[1], raw[2], raw[3]]),
        }
    }
}

/// Decoded STREAMINFO block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub min_block_size: u16,
    pub max_block_size: u16,
    pub min_frame_size: u32,
    pub max_frame_size: u32,
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: u8,
    /// 0 when unknown.
    pub total_samples: u64,
    pub md5: [u8; 16],
}

impl StreamInfo {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < STREAMINFO_SIZE as usize {
            return Err(Error::malformed(format!(
                "STREAMINFO is {} bytes, expected {}",
                raw.len(),
                STREAMINFO_SIZE
            )));
        }
        let mut reader = BitReader::endian(raw, BigEndian);
        let mut info = Self {
            min_block_size: reader.read(16)?,
            max_block_size: reader.read(16)?,
            min_frame_size: reader.read(24)?,
            max_frame_size: reader.read(24)?,
            sample_rate: reader.read(20)?,
            channels: reader.read::<u8>(3)? + 1,
            bits_per_sample: reader.read::<u8>(5)? + 1,
            total_samples: reader.read(36)?,
            md5: [0; 16],
        };
        reader.read_bytes(&mut info.md5)?;
        Ok(info)
    }

    pub fn md5_hex(&self) -> String {
        hex(&self.md5)
    }
}

/// One SEEKTABLE entry. `stream_offset` is relative to the first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekPoint {
    pub sample_number: u64,
    pub stream_offset: u64,
    pub frame_samples: u16,
}

/// Decode a SEEKTABLE, skipping placeholders and out-of-order points.
pub fn parse_seektable(mut raw: Bytes) -> Vec<SeekPoint> {
    let mut points: Vec<SeekPoint> = Vec::with_capacity(raw.len() / SEEK_POINT_SIZE);
    while raw.remaining() >= SEEK_POINT_SIZE {
        let point = SeekPoint {
            sample_number: raw.get_u64(),
            stream_offset: raw.get_u64(),
            frame_samples: raw.get_u16(),
        };
        if point.sample_number == PLACEHOLDER_POINT {
            continue;
        }
        if let Some(prev) = points.last() {
            if point.sample_number <= prev.sample_number || point.stream_offset < prev.stream_offset
            {
                warn!(
                    sample = point.sample_number,
                    offset = point.stream_offset,
                    "Dropping out-of-order seek point"
                );
                continue;
            }
        }
        points.push(point);
    }
    points
}

/// Checked big-endian reads over a block body.
struct BlockReader {
    data: Bytes,
    block: &'static str,
}

impl BlockReader {
    fn new(data: Bytes, block: &'static str) -> Self {
        Self { data, block }
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.data.remaining() < n {
            return Err(Error::malformed(format!(
                "{} block truncated: need {} bytes, have {}",
                self.block,
                n,
                self.data.remaining()
            )));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.data.get_u8())
    }

    fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.data.get_u32())
    }

    fn u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.data.get_u64())
    }

    fn bytes(&mut self, n: usize) -> Result<Bytes> {
        self.need(n)?;
        Ok(self.data.split_to(n))
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.need(n)?;
        self.data.advance(n);
        Ok(())
    }

    fn string(&mut self, n: usize) -> Result<String> {
        let raw = self.bytes(n)?;
        Ok(String::from_utf8_lossy(&raw)
            .trim_end_matches('\0')
            .to_string())
    }
}

/// Decode a PICTURE block into a tag map.
pub fn parse_picture(data: Bytes, include_artwork: bool) -> Result<TagMap> {
    let mut r = BlockReader::new(data, "PICTURE");
    let mut picture = TagMap::new();

    picture.insert("picture_type".into(), r.u32()?.into());
    let mime_len = r.u32()? as usize;
    picture.insert("mime_type".into(), r.string(mime_len)?.into());
    let desc_len = r.u32()? as usize;
    picture.insert("description".into(), r.string(desc_len)?.into());
    picture.insert("width".into(), r.u32()?.into());
    picture.insert("height".into(), r.u32()?.into());
    picture.insert("depth".into(), r.u32()?.into());
    picture.insert("color_index".into(), r.u32()?.into());
    let image_len = r.u32()? as usize;
    picture.insert("image_size".into(), TagValue::Integer(image_len as i64));
    if include_artwork {
        picture.insert("image_data".into(), r.bytes(image_len)?.to_vec().into());
    } else {
        r.skip(image_len)?;
    }

    Ok(picture)
}

/// Decode an APPLICATION block into (hex application id, payload).
pub fn parse_application(data: Bytes) -> Result<(String, Vec<u8>)> {
    let mut r = BlockReader::new(data, "APPLICATION");
    let id = r.bytes(4)?;
    let rest = r.data.to_vec();
    Ok((hex(&id), rest))
}

/// Render a CUESHEET block as cue sheet text lines.
///
/// Index times are rendered as mm:ss:ff with 75 frames per second.
pub fn parse_cuesheet(data: Bytes, sample_rate: u32, file_name: Option<&str>) -> Result<Vec<String>> {
    let mut r = BlockReader::new(data, "CUESHEET");
    let mut lines = Vec::new();

    let catalog = r.string(128)?;
    let lead_in = r.u64()?;
    let is_cd = r.u8()? & 0x80 != 0;
    r.skip(258)?;
    let track_count = r.u8()?;

    if !catalog.is_empty() {
        lines.push(format!("CATALOG {}", catalog));
    }
    if let Some(name) = file_name {
        lines.push(format!("FILE \"{}\" FLAC", name));
    }

    for _ in 0..track_count {
        let track_offset = r.u64()?;
        let number = r.u8()?;
        let isrc = r.string(12)?;
        r.skip(14)?; // type, pre-emphasis, reserved
        let index_count = r.u8()?;

        let is_lead_out = number == 170 || (number == 255 && !is_cd);
        if is_lead_out {
            lines.push(format!("REM FLAC__lead-out {} {}", number, track_offset));
        } else {
            lines.push(format!("  TRACK {:02} AUDIO", number));
            if !isrc.is_empty() {
                lines.push(format!("    ISRC {}", isrc));
            }
        }

        for _ in 0..index_count {
            let index_offset = r.u64()?;
            let index_number = r.u8()?;
            r.skip(3)?;
            if !is_lead_out {
                let sample = track_offset
                    .checked_add(index_offset)
                    .ok_or_else(|| Error::malformed("cuesheet index offset overflows"))?;
                lines.push(format!(
                    "    INDEX {:02} {}",
                    index_number,
                    cue_time(sample, sample_rate)?
                ));
            }
        }
    }

    if is_cd {
        lines.push(format!("REM FLAC__lead-in {}", lead_in));
    }
    Ok(lines)
}

/// `MM:SS:FF` at 75 CD frames per second.
fn cue_time(sample: u64, sample_rate: u32) -> Result<String> {
    let frames = if sample_rate == 0 {
        0
    } else {
        sample
            .checked_mul(75)
            .ok_or_else(|| Error::malformed("cuesheet index beyond any playable position"))?
            / sample_rate as u64
    };
    Ok(format!(
        "{:02}:{:02}:{:02}",
        frames / (75 * 60),
        (frames / 75) % 60,
        frames % 75
    ))
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
