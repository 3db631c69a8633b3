//! MP4 / QuickTime audio parsing and seeking.
//!
//! Parsing walks the box tree once and keeps, for the first audio track, the
//! sample tables plus the location of every box the seek rewrite touches.
//! In [`ParseMode::Scan`] the per-sample size and chunk offset arrays are only
//! counted; [`ParseMode::Seek`] loads them so the tables can be rewritten.

mod atoms;
mod esds;
mod ilst;
mod parser;
mod rewrite;
mod sample_table;
mod walker;

pub use atoms::{BoxRecord, BoxType, HandlerType};
pub use esds::{parse_alac, parse_esds, AlacConfig, EsdsConfig, AAC_SAMPLE_RATES};
pub use rewrite::{splice_header, table_replacements, Replacement};
pub use sample_table::{
    compute_new_table_sizes, encode_chunk_offsets, rewrite_tables, shift_chunk_offsets,
    EncodedTables, HeaderLayout, RewrittenTables, SampleLocation, SampleSizes, SampleTable,
    SampleToChunk, TableSizes, TimeToSample,
};
pub use walker::{read_box_header, BoxVisitor, BoxWalker, Visit};

use crate::cursor::ByteCursor;
use crate::{Error, FramePosition, Result, ScanOptions};
use bytes::Bytes;
use parser::Mp4Parser;
use sonoscan_common::{AudioLayout, TagMap, TagValue};
use std::io::{Read, Seek};
use tracing::{debug, warn};

/// How much of the sample tables to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Layout and tags only; per-sample arrays are counted, not loaded.
    Scan,
    /// Load every table so the file can be seeked and rewritten.
    Seek,
}

/// Brands from the ftyp box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileType {
    pub major_brand: String,
    pub minor_version: u32,
    pub compatible_brands: Vec<String>,
}

/// Audio sample description from stsd and its codec configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleDescription {
    /// Sample entry fourcc (mp4a, alac, ...).
    pub codec: Option<BoxType>,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub sample_rate: u32,
    pub object_type_indication: Option<u8>,
    pub audio_object_type: Option<u8>,
    pub avg_bitrate: Option<u32>,
    pub max_bitrate: Option<u32>,
}

/// Boxes of one track that the seek rewrite needs to find again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackBoxes {
    pub trak: BoxRecord,
    pub mdia: Option<BoxRecord>,
    pub minf: Option<BoxRecord>,
    pub stbl: Option<BoxRecord>,
    pub stts: Option<BoxRecord>,
    pub stsc: Option<BoxRecord>,
    pub stsz: Option<BoxRecord>,
    /// stco or co64.
    pub stco: Option<BoxRecord>,
}

/// Per-track information.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub track_id: u32,
    pub handler: HandlerType,
    /// Media timescale (ticks per second).
    pub timescale: u32,
    /// Duration in media timescale units.
    pub duration: u64,
    pub description: SampleDescription,
    pub table: SampleTable,
    pub boxes: TrackBoxes,
}

impl TrackInfo {
    fn new(trak: BoxRecord) -> Self {
        Self {
            track_id: 0,
            handler: HandlerType::Unknown([0; 4]),
            timescale: 0,
            duration: 0,
            description: SampleDescription::default(),
            table: SampleTable::default(),
            boxes: TrackBoxes {
                trak,
                mdia: None,
                minf: None,
                stbl: None,
                stts: None,
                stsc: None,
                stsz: None,
                stco: None,
            },
        }
    }

    /// Sample rate from the description, falling back to the media timescale.
    pub fn sample_rate(&self) -> Option<u32> {
        match self.description.sample_rate {
            0 if self.timescale > 0 => Some(self.timescale),
            0 => None,
            rate => Some(rate),
        }
    }

    /// Names of the mandatory sample tables this track lacks.
    pub fn missing_tables(&self) -> Vec<&'static str> {
        let boxes = &self.boxes;
        [
            ("stts", boxes.stts),
            ("stsc", boxes.stsc),
            ("stsz", boxes.stsz),
            ("stco", boxes.stco),
        ]
        .into_iter()
        .filter(|(_, record)| record.is_none())
        .map(|(name, _)| name)
        .collect()
    }

    /// Duration in milliseconds from the media header.
    pub fn duration_ms(&self) -> Option<u64> {
        AudioLayout::derive_duration_ms(self.duration, self.timescale as u64)
    }
}

/// A located MP4 sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplePosition {
    pub location: SampleLocation,
    /// Absolute file offset of the sample.
    pub byte_offset: u64,
    /// Start time in media timescale units.
    pub time: u64,
}

/// Result of a seek rewrite.
#[derive(Debug, Clone)]
pub struct Mp4Seek {
    pub sample: u32,
    /// Offset in the original file where the caller resumes streaming.
    pub start_offset: u64,
    /// Rewritten header to send before the data at `start_offset`.
    pub header: Bytes,
    pub tables: SampleTable,
}

/// A parsed MP4 file.
#[derive(Debug, Clone)]
pub struct Mp4File {
    pub file_size: u64,
    pub mode: ParseMode,
    pub file_type: Option<FileType>,
    /// Movie timescale from mvhd.
    pub timescale: u32,
    /// Movie duration in movie timescale units.
    pub duration: u64,
    pub tracks: Vec<TrackInfo>,
    /// Index into `tracks` of the first audio track.
    pub current: Option<usize>,
    pub moov: Option<BoxRecord>,
    pub mdat: Option<BoxRecord>,
    pub tags: TagMap,
}

impl Mp4File {
    fn empty(file_size: u64, mode: ParseMode) -> Self {
        Self {
            file_size,
            mode,
            file_type: None,
            timescale: 0,
            duration: 0,
            tracks: Vec::new(),
            current: None,
            moov: None,
            mdat: None,
            tags: TagMap::new(),
        }
    }

    /// Parse an MP4 file from a seekable reader.
    pub fn parse<R: Read + Seek>(reader: R, mode: ParseMode, options: &ScanOptions) -> Result<Self> {
        let mut cursor = ByteCursor::new(reader, options.mp4_block_size)?;
        let size = cursor.size();
        let mut parser = Mp4Parser::new(mode, options.include_artwork, size);
        BoxWalker::new(options.max_box_depth).walk(&mut cursor, 0, size, &mut parser)?;
        let file = parser.finish()?;

        if let Some(track) = file.current_track() {
            debug!(
                track_id = track.track_id,
                codec = %track.description.codec.map(|c| c.to_string()).unwrap_or_default(),
                samples = track.table.sample_count(),
                "Selected audio track"
            );
            let missing = track.missing_tables();
            if !missing.is_empty() {
                warn!(track_id = track.track_id, ?missing, "Audio track is missing sample tables");
            } else if let Err(e) = track.table.check_sample_counts() {
                warn!(track_id = track.track_id, error = %e, "Inconsistent sample tables");
            }
        }
        Ok(file)
    }

    /// The audio track used for layout and seeking.
    pub fn current_track(&self) -> Option<&TrackInfo> {
        self.current.and_then(|i| self.tracks.get(i))
    }

    /// Duration in milliseconds, from mvhd or else the audio track's mdhd.
    pub fn duration_ms(&self) -> Option<u64> {
        AudioLayout::derive_duration_ms(self.duration, self.timescale as u64)
            .filter(|ms| *ms > 0)
            .or_else(|| self.current_track().and_then(TrackInfo::duration_ms))
    }

    /// Structural layout of the audio payload.
    pub fn layout(&self) -> AudioLayout {
        let mut layout = AudioLayout {
            file_size: self.file_size,
            ..Default::default()
        };
        if let Some(mdat) = &self.mdat {
            layout.audio_start_offset = mdat.payload_offset;
            layout.audio_byte_size = mdat.payload_size();
        }
        if let Some(track) = self.current_track() {
            layout.sample_rate = track.sample_rate();
            layout.channel_count = u8::try_from(track.description.channels)
                .ok()
                .filter(|c| *c > 0);
            layout.bits_per_sample = u8::try_from(track.description.bits_per_sample)
                .ok()
                .filter(|b| *b > 0);
            // media ticks are PCM samples only when the timescale is the sample rate
            if track.boxes.stts.is_some() && layout.sample_rate == Some(track.timescale) {
                layout.total_samples = Some(track.table.duration());
            }
        }
        layout.duration_ms = self.duration_ms();
        layout.bitrate = layout
            .duration_ms
            .and_then(|ms| AudioLayout::derive_bitrate(layout.audio_byte_size, ms));
        layout
    }

    /// Descriptive entries: brands, per-track details.
    pub fn info(&self) -> TagMap {
        let mut info = TagMap::new();
        if let Some(ftyp) = &self.file_type {
            info.insert("major_brand".into(), ftyp.major_brand.clone().into());
            info.insert("minor_version".into(), ftyp.minor_version.into());
            info.insert(
                "compatible_brands".into(),
                TagValue::List(
                    ftyp.compatible_brands
                        .iter()
                        .map(|b| TagValue::from(b.as_str()))
                        .collect(),
                ),
            );
        }

        let tracks = self.tracks.iter().map(track_info).collect();
        info.insert("tracks".into(), TagValue::List(tracks));
        info
    }

    /// Missing-table report for the current audio track.
    pub fn incomplete(&self) -> Option<Error> {
        let track = self.current_track()?;
        let missing = track.missing_tables();
        (!missing.is_empty()).then(|| Error::IncompleteTrack {
            track_id: track.track_id,
            missing,
        })
    }

    /// The audio track with the tables a seek needs.
    fn seekable_track(&self, target: u64) -> Result<&TrackInfo> {
        let track = self
            .current_track()
            .ok_or_else(|| Error::unseekable("no audio track"))?;
        Self::check_seekable(track, target)
    }

    fn check_seekable(track: &TrackInfo, target: u64) -> Result<&TrackInfo> {
        if track.boxes.stbl.is_none() || track.boxes.stts.is_none() {
            return Err(Error::SeekOutOfRange { target, limit: 0 });
        }
        let missing = track.missing_tables();
        if !missing.is_empty() {
            return Err(Error::IncompleteTrack {
                track_id: track.track_id,
                missing,
            });
        }
        Ok(track)
    }

    /// Track with the given `tkhd` id.
    pub fn track(&self, track_id: u32) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.track_id == track_id)
    }

    /// Resolve a playback time to a sample index of the audio track.
    pub fn sample_for_time(&self, time_ms: u64) -> Result<u32> {
        let track = self.seekable_track(time_ms)?;
        let ticks = (time_ms as u128 * track.timescale as u128 / 1000) as u64;
        track
            .table
            .sample_at_time(ticks)
            .ok_or_else(|| Error::SeekOutOfRange {
                target: time_ms,
                limit: AudioLayout::derive_duration_ms(
                    track.table.duration(),
                    track.timescale as u64,
                )
                .unwrap_or(0),
            })
    }

    /// Chunk, intra-chunk index and absolute offset of a sample.
    pub fn locate_sample(&self, sample: u32) -> Result<SamplePosition> {
        let track = self.seekable_track(sample as u64)?;
        let total = track.table.sample_count();
        if sample as u64 >= total {
            return Err(Error::SeekOutOfRange {
                target: sample as u64,
                limit: total,
            });
        }
        if self.mode != ParseMode::Seek {
            return Err(Error::unseekable("file was parsed in scan mode"));
        }
        let location = track.table.locate(sample)?;
        Ok(SamplePosition {
            location,
            byte_offset: track.table.sample_offset(&location)?,
            time: track.table.time_of_sample(sample),
        })
    }

    /// Byte offset of the sample covering `time_ms`, without rewriting.
    pub fn find_frame(&self, time_ms: u64) -> Result<FramePosition> {
        let sample = self.sample_for_time(time_ms)?;
        let position = self.locate_sample(sample)?;
        Ok(FramePosition {
            byte_offset: position.byte_offset,
            sample: sample as u64,
        })
    }

    /// Rewrite the header so playback starts at the sample covering `time_ms`.
    pub fn seek_time<R: Read + Seek>(&self, reader: R, time_ms: u64) -> Result<Mp4Seek> {
        let sample = self.sample_for_time(time_ms)?;
        self.seek_sample(reader, sample)
    }

    /// Rewrite the header so playback starts at `sample`.
    ///
    /// `reader` must be the same source this file was parsed from; it is
    /// read again for the header bytes.
    pub fn seek_sample<R: Read + Seek>(&self, reader: R, sample: u32) -> Result<Mp4Seek> {
        self.check_mode()?;
        let track = self.seekable_track(sample as u64)?;
        self.rewrite_for(reader, track, sample)
    }

    /// Rewrite the header so playback of track `track_id` starts at `sample`.
    ///
    /// The chunk offsets of every other track move with the data.
    pub fn seek_track_sample<R: Read + Seek>(
        &self,
        reader: R,
        track_id: u32,
        sample: u32,
    ) -> Result<Mp4Seek> {
        self.check_mode()?;
        let track = self
            .track(track_id)
            .ok_or_else(|| Error::unseekable(format!("no track with id {}", track_id)))?;
        let track = Self::check_seekable(track, sample as u64)?;
        self.rewrite_for(reader, track, sample)
    }

    fn check_mode(&self) -> Result<()> {
        if self.mode != ParseMode::Seek {
            return Err(Error::unseekable("file was parsed in scan mode"));
        }
        Ok(())
    }

    fn rewrite_for<R: Read + Seek>(
        &self,
        reader: R,
        track: &TrackInfo,
        sample: u32,
    ) -> Result<Mp4Seek> {
        let (moov, mdat) = match (self.moov, self.mdat) {
            (Some(moov), Some(mdat)) if moov.offset() < mdat.offset() => (moov, mdat),
            (Some(_), Some(_)) => return Err(Error::unseekable("moov follows mdat")),
            _ => return Err(Error::unseekable("no mdat box")),
        };

        let boxes = &track.boxes;
        let (Some(stts), Some(stsc), Some(stsz), Some(stco)) =
            (boxes.stts, boxes.stsc, boxes.stsz, boxes.stco)
        else {
            return Err(Error::unseekable("sample tables incomplete"));
        };
        let layout = HeaderLayout {
            data_offset: mdat.payload_offset,
            table_sizes: TableSizes {
                stts: stts.size,
                stsc: stsc.size,
                stsz: stsz.size,
                stco: stco.size,
            },
        };

        let sizes = compute_new_table_sizes(&track.table, sample)?;
        let rewritten = rewrite_tables(&track.table, sample, &sizes, &layout)?;
        let mut replacements =
            table_replacements(stts, stsc, stsz, stco, rewritten.table.encode()?);
        for other in &self.tracks {
            if std::ptr::eq(other, track) {
                continue;
            }
            let Some(other_stco) = other.boxes.stco else {
                continue;
            };
            if other.table.chunk_offsets.len() != other.table.chunk_count as usize {
                return Err(Error::unseekable(format!(
                    "chunk offsets of track {} were not loaded",
                    other.track_id
                )));
            }
            let shifted = shift_chunk_offsets(
                &other.table.chunk_offsets,
                rewritten.start_offset,
                rewritten.data_offset,
            );
            replacements.push((
                other_stco,
                encode_chunk_offsets(&shifted, other.table.large_offsets)?,
            ));
        }
        debug!(
            sample,
            track_id = track.track_id,
            start_offset = rewritten.start_offset,
            old_tables = layout.table_sizes.total(),
            new_tables = sizes.total(),
            companions = replacements.len() - 4,
            "Rewriting sample tables"
        );

        let mut cursor = ByteCursor::new(reader, mdat.payload_offset as usize)?;
        cursor.seek_to(mdat.offset())?;
        // only a literal zero matters here, byte order does not
        let mdat_zero_size = cursor.peek_u32_le()? == 0;
        cursor.seek_to(0)?;
        let original = cursor.take(mdat.payload_offset as usize)?;

        let ancestors: Vec<BoxRecord> = [
            Some(moov),
            Some(boxes.trak),
            boxes.mdia,
            boxes.minf,
            boxes.stbl,
        ]
        .into_iter()
        .flatten()
        .collect();

        let header = splice_header(
            &original,
            &ancestors,
            &replacements,
            &mdat,
            mdat_zero_size,
            mdat.end().saturating_sub(rewritten.start_offset),
        )?;

        Ok(Mp4Seek {
            sample,
            start_offset: rewritten.start_offset,
            header,
            tables: rewritten.table,
        })
    }
}

fn track_info(track: &TrackInfo) -> TagValue {
    let mut map = TagMap::new();
    let description = &track.description;
    map.insert("id".into(), track.track_id.into());
    map.insert("handler".into(), track.handler.as_str().into());
    map.insert("timescale".into(), track.timescale.into());
    if let Some(ms) = track.duration_ms() {
        map.insert("duration".into(), TagValue::Integer(ms as i64));
    }
    if let Some(codec) = description.codec {
        map.insert("encoding".into(), codec.to_string().into());
    }
    if description.channels > 0 {
        map.insert("channels".into(), u32::from(description.channels).into());
    }
    if description.bits_per_sample > 0 {
        map.insert(
            "bits_per_sample".into(),
            u32::from(description.bits_per_sample).into(),
        );
    }
    if let Some(rate) = track.sample_rate() {
        map.insert("samplerate".into(), rate.into());
    }
    if let Some(avg) = description.avg_bitrate {
        map.insert("avg_bitrate".into(), avg.into());
    }
    if let Some(max) = description.max_bitrate {
        map.insert("max_bitrate".into(), max.into());
    }
    if let Some(aot) = description.audio_object_type {
        map.insert("audio_object_type".into(), u32::from(aot).into());
    }
    TagValue::Map(map)
}
