//! FLAC stream parsing and seeking.
//!
//! [`FlacFile::parse`] reads the `fLaC` marker and the metadata blocks that
//! follow it. The first byte after the last metadata block is the audio start.
//! Seeking lives in [`seek`].

pub mod frame;
pub mod metadata;
pub mod seek;

pub use frame::{parse_frame_header, Blocking, FrameHeader};
pub use metadata::{BlockHeader, BlockType, SeekPoint, StreamInfo};
pub use seek::LocatedFrame;

use crate::cursor::ByteCursor;
use crate::id3::{self, Id3Decoder, SkipId3};
use crate::vorbis::VorbisComments;
use crate::{Error, Result, ScanOptions};
use metadata::{parse_application, parse_cuesheet, parse_picture, parse_seektable};
use sonoscan_common::{AudioLayout, TagMap, TagValue};
use std::io::{Read, Seek};
use tracing::{debug, trace};

/// Stream marker at the start of every native FLAC stream.
pub const FLAC_MARKER: &[u8; 4] = b"fLaC";

/// A parsed FLAC stream.
#[derive(Debug, Clone)]
pub struct FlacFile {
    pub file_size: u64,
    pub stream_info: StreamInfo,
    /// Ascending by sample number, placeholders removed.
    pub seek_points: Vec<SeekPoint>,
    /// Offset of the first audio frame.
    pub audio_start: u64,
    /// Version of a leading ID3v2 tag, e.g. `ID3v2.4.0`.
    pub id3_version: Option<String>,
    pub tags: TagMap,
    block_size: usize,
    max_seek_probes: u32,
}

impl FlacFile {
    pub fn parse<R: Read + Seek>(reader: R, options: &ScanOptions) -> Result<Self> {
        Self::parse_with_id3(reader, options, &mut SkipId3)
    }

    /// Parse, handing a leading ID3v2 tag to `decoder`.
    pub fn parse_with_id3<R: Read + Seek>(
        reader: R,
        options: &ScanOptions,
        decoder: &mut dyn Id3Decoder,
    ) -> Result<Self> {
        let mut cursor = ByteCursor::new(reader, options.flac_block_size)?;
        let file_size = cursor.size();
        let mut tags = TagMap::new();

        let id3_version = id3::read_leading_tag(&mut cursor, decoder, &mut tags)?;

        let marker_at = cursor.position();
        if &cursor.read_fourcc()? != FLAC_MARKER {
            return Err(Error::malformed(format!(
                "missing fLaC marker at offset {}",
                marker_at
            )));
        }

        let mut stream_info = None;
        let mut seek_points = Vec::new();
        let mut pictures = Vec::new();
        let mut applications = TagMap::new();

        loop {
            let offset = cursor.position();
            let header = BlockHeader::parse(cursor.read_fourcc()?);
            let length = u64::from(header.length);
            if length > cursor.remaining() {
                return Err(Error::malformed(format!(
                    "{:?} block at {} declares {} bytes, {} remain",
                    header.block_type,
                    offset,
                    length,
                    cursor.remaining()
                )));
            }

            match header.block_type {
                BlockType::StreamInfo => {
                    let body = cursor.take(length as usize)?;
                    stream_info = Some(StreamInfo::parse(&body)?);
                }
                BlockType::SeekTable => {
                    seek_points = parse_seektable(cursor.take(length as usize)?);
                }
                BlockType::VorbisComment => {
                    let body = cursor.take(length as usize)?;
                    VorbisComments::parse(&body)?.apply(&mut tags);
                }
                BlockType::CueSheet => {
                    let body = cursor.take(length as usize)?;
                    let rate = stream_info.map_or(0, |info: StreamInfo| info.sample_rate);
                    let lines = parse_cuesheet(body, rate, options.source_name.as_deref())?;
                    tags.insert(
                        "CUESHEET_BLOCK".into(),
                        TagValue::List(lines.into_iter().map(TagValue::Text).collect()),
                    );
                }
                BlockType::Picture => {
                    let body = cursor.take(length as usize)?;
                    pictures.push(TagValue::Map(parse_picture(body, options.include_artwork)?));
                }
                BlockType::Application => {
                    let (id, payload) = parse_application(cursor.take(length as usize)?)?;
                    applications.insert(id, payload.into());
                }
                BlockType::Padding | BlockType::Reserved(_) => {
                    trace!(block = ?header.block_type, offset, length, "Skipping metadata block");
                    cursor.skip(length)?;
                }
            }

            if header.is_last {
                break;
            }
        }

        let stream_info =
            stream_info.ok_or_else(|| Error::malformed("no STREAMINFO metadata block"))?;
        if !pictures.is_empty() {
            tags.insert("ALLPICTURES".into(), TagValue::List(pictures));
        }
        if !applications.is_empty() {
            tags.insert("APPLICATION".into(), TagValue::Map(applications));
        }

        let audio_start = cursor.position();
        debug!(
            audio_start,
            sample_rate = stream_info.sample_rate,
            total_samples = stream_info.total_samples,
            seek_points = seek_points.len(),
            "Parsed FLAC metadata"
        );

        Ok(Self {
            file_size,
            stream_info,
            seek_points,
            audio_start,
            id3_version,
            tags,
            block_size: options.flac_block_size,
            max_seek_probes: options.max_seek_probes,
        })
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let info = &self.stream_info;
        if info.total_samples == 0 {
            return None;
        }
        AudioLayout::derive_duration_ms(info.total_samples, u64::from(info.sample_rate))
    }

    pub fn layout(&self) -> AudioLayout {
        let info = &self.stream_info;
        let audio_byte_size = self.file_size.saturating_sub(self.audio_start);
        let duration_ms = self.duration_ms();
        AudioLayout {
            file_size: self.file_size,
            audio_start_offset: self.audio_start,
            audio_byte_size,
            sample_rate: Some(info.sample_rate).filter(|rate| *rate > 0),
            channel_count: Some(info.channels),
            bits_per_sample: Some(info.bits_per_sample),
            total_samples: Some(info.total_samples).filter(|total| *total > 0),
            duration_ms,
            bitrate: duration_ms.and_then(|ms| AudioLayout::derive_bitrate(audio_byte_size, ms)),
        }
    }

    /// STREAMINFO details that do not fit [`AudioLayout`].
    pub fn info(&self) -> TagMap {
        let info = &self.stream_info;
        let mut out = TagMap::new();
        out.insert("minimum_blocksize".into(), u32::from(info.min_block_size).into());
        out.insert("maximum_blocksize".into(), u32::from(info.max_block_size).into());
        out.insert("minimum_framesize".into(), info.min_frame_size.into());
        out.insert("maximum_framesize".into(), info.max_frame_size.into());
        out.insert("md5".into(), info.md5_hex().into());
        out.insert("seek_points".into(), TagValue::Integer(self.seek_points.len() as i64));
        if let Some(version) = &self.id3_version {
            out.insert("id3_version".into(), version.as_str().into());
        }
        out
    }
}
