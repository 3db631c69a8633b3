//! Ogg pages carrying a Vorbis stream.
//!
//! Reads the three Vorbis header packets and takes the duration from the
//! granule position of the last page. Seeking is not supported.

use crate::cursor::ByteCursor;
use crate::vorbis::VorbisComments;
use crate::{Error, Result, ScanOptions};
use bytes::Bytes;
use sonoscan_common::{AudioLayout, TagMap};
use std::io::{Read, Seek};
use tracing::{debug, trace};

/// Capture pattern at the start of every page.
pub const OGG_MARKER: &[u8; 4] = b"OggS";

const PAGE_HEADER_SIZE: usize = 27;
const VORBIS_IDENT_SIZE: usize = 30;

/// A decoded page header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHeader {
    pub header_type: u8,
    pub granule: u64,
    pub serial: u32,
    pub sequence: u32,
    /// Lacing values.
    pub segments: Vec<u8>,
}

/// Summary of an Ogg Vorbis stream.
#[derive(Debug, Clone, Default)]
pub struct OggFile {
    pub file_size: u64,
    /// Offset of the first page after the Vorbis setup header.
    pub audio_start: u64,
    pub serial: u32,
    pub vorbis_version: u32,
    pub channels: u8,
    pub sample_rate: u32,
    pub bitrate_upper: i32,
    pub bitrate_nominal: i32,
    pub bitrate_lower: i32,
    /// Granule position of the last page, when one was found.
    pub last_granule: Option<u64>,
    pub tags: TagMap,
}

impl OggFile {
    pub fn parse<R: Read + Seek>(reader: R, options: &ScanOptions) -> Result<Self> {
        let mut cursor = ByteCursor::new(reader, options.ogg_block_size)?;
        let mut file = OggFile {
            file_size: cursor.size(),
            ..Default::default()
        };

        let mut packets: Vec<Vec<u8>> = Vec::with_capacity(3);
        let mut partial = Vec::new();
        while packets.len() < 3 {
            let (page, body) = read_page(&mut cursor)?;
            if packets.is_empty() && partial.is_empty() {
                file.serial = page.serial;
            }
            let mut pos = 0;
            for &lace in &page.segments {
                let end = pos + usize::from(lace);
                partial.extend_from_slice(&body[pos..end]);
                pos = end;
                if lace < 255 {
                    packets.push(std::mem::take(&mut partial));
                }
            }
        }
        file.audio_start = cursor.position();

        let ident = &packets[0];
        if ident.len() < VORBIS_IDENT_SIZE || !is_vorbis_packet(ident, 0x01) {
            return Err(Error::unsupported("Ogg stream does not carry Vorbis"));
        }
        file.vorbis_version = le_u32(ident, 7);
        file.channels = ident[11];
        file.sample_rate = le_u32(ident, 12);
        file.bitrate_upper = le_u32(ident, 16) as i32;
        file.bitrate_nominal = le_u32(ident, 20) as i32;
        file.bitrate_lower = le_u32(ident, 24) as i32;

        if !is_vorbis_packet(&packets[1], 0x03) {
            return Err(Error::malformed("second Ogg packet is not a Vorbis comment header"));
        }
        VorbisComments::parse(&packets[1][7..])?.apply(&mut file.tags);

        if !is_vorbis_packet(&packets[2], 0x05) {
            return Err(Error::malformed("third Ogg packet is not a Vorbis setup header"));
        }

        file.last_granule = find_last_granule(&mut cursor, file.audio_start, options.ogg_block_size)?;
        debug!(
            audio_start = file.audio_start,
            sample_rate = file.sample_rate,
            granule = ?file.last_granule,
            "Parsed Ogg Vorbis headers"
        );
        Ok(file)
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.last_granule
            .and_then(|granule| AudioLayout::derive_duration_ms(granule, u64::from(self.sample_rate)))
    }

    pub fn layout(&self) -> AudioLayout {
        let audio_byte_size = self.file_size.saturating_sub(self.audio_start);
        let duration_ms = self.duration_ms();
        let bitrate = duration_ms
            .and_then(|ms| AudioLayout::derive_bitrate(audio_byte_size, ms))
            .or_else(|| u32::try_from(self.bitrate_nominal).ok().filter(|b| *b > 0));
        AudioLayout {
            file_size: self.file_size,
            audio_start_offset: self.audio_start,
            audio_byte_size,
            sample_rate: Some(self.sample_rate).filter(|rate| *rate > 0),
            channel_count: Some(self.channels),
            bits_per_sample: None,
            total_samples: self.last_granule,
            duration_ms,
            bitrate,
        }
    }

    pub fn info(&self) -> TagMap {
        let mut info = TagMap::new();
        info.insert("serial_number".into(), self.serial.into());
        info.insert("version".into(), self.vorbis_version.into());
        info.insert("bitrate_upper".into(), i64::from(self.bitrate_upper).into());
        info.insert("bitrate_nominal".into(), i64::from(self.bitrate_nominal).into());
        info.insert("bitrate_lower".into(), i64::from(self.bitrate_lower).into());
        info
    }
}

/// Read one page at the cursor, returning its header and body.
pub fn read_page<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> Result<(PageHeader, Bytes)> {
    let offset = cursor.position();
    let head = cursor.take(PAGE_HEADER_SIZE)?;
    if &head[..4] != OGG_MARKER {
        return Err(Error::malformed(format!(
            "missing OggS capture pattern at offset {}",
            offset
        )));
    }
    if head[4] != 0 {
        return Err(Error::unsupported(format!("Ogg stream version {}", head[4])));
    }

    let mut granule = [0u8; 8];
    granule.copy_from_slice(&head[6..14]);
    let segment_count = usize::from(head[26]);
    let segments = cursor.take(segment_count)?.to_vec();
    let body_len = segments.iter().map(|lace| usize::from(*lace)).sum();
    let body = cursor.take(body_len)?;

    let page = PageHeader {
        header_type: head[5],
        granule: u64::from_le_bytes(granule),
        serial: le_u32(&head, 14),
        sequence: le_u32(&head, 18),
        segments,
    };
    trace!(offset, sequence = page.sequence, body_len, "Read Ogg page");
    Ok((page, body))
}

/// Granule position of the last page starting in the final `window` bytes.
fn find_last_granule<R: Read + Seek>(
    cursor: &mut ByteCursor<R>,
    audio_start: u64,
    window: usize,
) -> Result<Option<u64>> {
    let size = cursor.size();
    let from = size.saturating_sub(window as u64).max(audio_start);
    if from >= size {
        return Ok(None);
    }
    cursor.seek_to(from)?;
    let avail = cursor.fill_up_to((size - from) as usize)?;
    let raw = cursor.window();

    let last = (0..(avail + 1).saturating_sub(PAGE_HEADER_SIZE))
        .rev()
        .find(|&i| &raw[i..i + 4] == OGG_MARKER);
    Ok(last.and_then(|i| {
        let mut granule = [0u8; 8];
        granule.copy_from_slice(&raw[i + 6..i + 14]);
        Some(u64::from_le_bytes(granule)).filter(|g| *g != u64::MAX)
    }))
}

fn is_vorbis_packet(packet: &[u8], kind: u8) -> bool {
    packet.len() >= 7 && packet[0] == kind && &packet[1..7] == b"vorbis"
}

fn le_u32(raw: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}
