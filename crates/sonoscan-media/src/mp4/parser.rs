//! Box visitor that builds an [`Mp4File`] from the box tree.

use super::esds::{parse_alac, parse_esds};
use super::ilst;
use super::walker::{BoxVisitor, Visit};
use super::{
    BoxRecord, BoxType, FileType, HandlerType, Mp4File, ParseMode, SampleSizes, SampleToChunk,
    TimeToSample, TrackInfo,
};
use crate::cursor::ByteCursor;
use crate::{Error, Result};
use bytes::{Buf, Bytes};
use sonoscan_common::{insert_multi, TagValue};
use std::io::{Read, Seek};
use tracing::{debug, trace};

/// Maximum payload read into memory for a single leaf box (64 MB).
const MAX_LEAF_SIZE: u64 = 64 * 1024 * 1024;

/// Bytes of an audio sample entry before any version-specific extension.
const AUDIO_ENTRY_SIZE: u64 = 28;

/// iTunes item currently being assembled.
#[derive(Debug)]
struct PendingItem {
    item: BoxType,
    name: Option<String>,
    values: Vec<TagValue>,
}

pub(super) struct Mp4Parser {
    mode: ParseMode,
    include_artwork: bool,
    file: Mp4File,
    track: Option<TrackInfo>,
    ancestors: Vec<BoxType>,
    item: Option<PendingItem>,
}

impl Mp4Parser {
    pub(super) fn new(mode: ParseMode, include_artwork: bool, file_size: u64) -> Self {
        Self {
            mode,
            include_artwork,
            file: Mp4File::empty(file_size, mode),
            track: None,
            ancestors: Vec::new(),
            item: None,
        }
    }

    pub(super) fn finish(self) -> Result<Mp4File> {
        if self.file.moov.is_none() {
            return Err(Error::malformed("no moov box"));
        }
        Ok(self.file)
    }

    fn parent(&self) -> Option<BoxType> {
        self.ancestors.last().copied()
    }

    fn grandparent(&self) -> Option<BoxType> {
        self.ancestors.iter().rev().nth(1).copied()
    }

    fn audio_track(&mut self) -> Option<&mut TrackInfo> {
        self.track.as_mut().filter(|t| t.handler.is_audio())
    }

    fn dispatch<R: Read + Seek>(
        &mut self,
        cursor: &mut ByteCursor<R>,
        record: &BoxRecord,
        depth: usize,
    ) -> Result<Visit> {
        let parent = self.parent();

        if parent == Some(BoxType::ILST) {
            self.item = Some(PendingItem {
                item: record.box_type,
                name: None,
                values: Vec::new(),
            });
            return Ok(Visit::Descend(0));
        }
        if parent == Some(BoxType::STSD) {
            return self.parse_sample_entry(cursor, record);
        }
        if self.grandparent() == Some(BoxType::ILST) {
            return self.parse_item_child(cursor, record);
        }

        let in_track = self.track.is_some();
        match (record.box_type, parent) {
            (BoxType::FTYP, None) => self.parse_ftyp(cursor, record),
            (BoxType::MOOV, None) => {
                self.file.moov = Some(*record);
                Ok(Visit::Descend(0))
            }
            (BoxType::MDAT, None) => {
                if self.file.mdat.is_none() {
                    self.file.mdat = Some(*record);
                }
                Ok(Visit::Skip)
            }
            (BoxType::MVHD, Some(BoxType::MOOV)) => self.parse_mvhd(cursor, record),
            (BoxType::TRAK, Some(BoxType::MOOV)) => {
                self.track = Some(TrackInfo::new(*record));
                Ok(Visit::Descend(0))
            }
            (BoxType::TKHD, _) if in_track => self.parse_tkhd(cursor, record),
            (BoxType::MDIA, Some(BoxType::TRAK)) => {
                if let Some(track) = self.track.as_mut() {
                    track.boxes.mdia = Some(*record);
                }
                Ok(Visit::Descend(0))
            }
            (BoxType::MDHD, Some(BoxType::MDIA)) => self.parse_mdhd(cursor, record),
            (BoxType::HDLR, Some(BoxType::MDIA)) => self.parse_hdlr(cursor, record),
            (BoxType::MINF, Some(BoxType::MDIA)) => {
                if let Some(track) = self.track.as_mut() {
                    track.boxes.minf = Some(*record);
                }
                Ok(Visit::Descend(0))
            }
            (BoxType::STBL, Some(BoxType::MINF)) => {
                let seeking = self.mode == ParseMode::Seek;
                let Some(track) = self.track.as_mut() else {
                    return Ok(Visit::Skip);
                };
                track.boxes.stbl = Some(*record);
                // a seek moves every track's chunks, so their offsets are needed
                if track.handler.is_audio() || seeking {
                    Ok(Visit::Descend(0))
                } else {
                    debug!(
                        track_id = track.track_id,
                        handler = %track.handler.as_str(),
                        "Skipping non-audio sample tables"
                    );
                    Ok(Visit::Skip)
                }
            }
            (BoxType::STSD, Some(BoxType::STBL)) => {
                if record.payload_size() < 8 {
                    return Ok(Visit::Skip);
                }
                Ok(Visit::Descend(8))
            }
            (BoxType::STTS, Some(BoxType::STBL)) => self.parse_stts(cursor, record),
            (BoxType::STSC, Some(BoxType::STBL)) => self.parse_stsc(cursor, record),
            (BoxType::STSZ, Some(BoxType::STBL)) => self.parse_stsz(cursor, record),
            (BoxType::STCO | BoxType::CO64, Some(BoxType::STBL)) => {
                self.parse_chunk_offsets(cursor, record)
            }
            (BoxType::ESDS, _)
                if self.grandparent() == Some(BoxType::STSD) || parent == Some(BoxType::WAVE) =>
            {
                self.parse_esds(cursor, record)
            }
            (BoxType::ALAC, _) if self.grandparent() == Some(BoxType::STSD) => {
                self.parse_alac(cursor, record)
            }
            (BoxType::WAVE, _) if self.grandparent() == Some(BoxType::STSD) => {
                Ok(Visit::Descend(0))
            }
            (BoxType::UDTA, Some(BoxType::MOOV | BoxType::TRAK)) => Ok(Visit::Descend(0)),
            (BoxType::META, Some(BoxType::UDTA | BoxType::MOOV)) => {
                // ISO meta is a full box; QuickTime meta goes straight to children
                let head = cursor.peek(record.payload_size().min(8) as usize)?;
                if head.len() == 8 && &head[4..8] == b"hdlr" {
                    Ok(Visit::Descend(0))
                } else {
                    Ok(Visit::Descend(4u64.min(record.payload_size())))
                }
            }
            (BoxType::ILST, Some(BoxType::META)) => Ok(Visit::Descend(0)),
            _ => {
                trace!(box_type = %record.box_type, depth, "Unhandled box");
                Ok(Visit::Skip)
            }
        }
    }

    fn parse_ftyp<R: Read + Seek>(
        &mut self,
        cursor: &mut ByteCursor<R>,
        record: &BoxRecord,
    ) -> Result<Visit> {
        let mut data = read_payload(cursor, record)?;
        if data.remaining() < 8 {
            return Err(Error::malformed("ftyp shorter than 8 bytes"));
        }
        let major = fourcc_string(data.get_u32());
        let minor = data.get_u32();
        let mut compatible = Vec::new();
        while data.remaining() >= 4 {
            compatible.push(fourcc_string(data.get_u32()));
        }
        self.file.file_type = Some(FileType {
            major_brand: major,
            minor_version: minor,
            compatible_brands: compatible,
        });
        Ok(Visit::Consumed)
    }

    fn parse_mvhd<R: Read + Seek>(
        &mut self,
        cursor: &mut ByteCursor<R>,
        record: &BoxRecord,
    ) -> Result<Visit> {
        let data = read_payload(cursor, record)?;
        let (timescale, duration) = read_timing(&data, "mvhd")?;
        self.file.timescale = timescale;
        self.file.duration = duration;
        Ok(Visit::Consumed)
    }

    fn parse_tkhd<R: Read + Seek>(
        &mut self,
        cursor: &mut ByteCursor<R>,
        record: &BoxRecord,
    ) -> Result<Visit> {
        let data = read_payload(cursor, record)?;
        let id_at = if data.first() == Some(&1) { 20 } else { 12 };
        let id = data
            .get(id_at..id_at + 4)
            .ok_or_else(|| Error::malformed("tkhd too short for a track id"))?;
        if let Some(track) = self.track.as_mut() {
            track.track_id = u32::from_be_bytes([id[0], id[1], id[2], id[3]]);
        }
        Ok(Visit::Consumed)
    }

    fn parse_mdhd<R: Read + Seek>(
        &mut self,
        cursor: &mut ByteCursor<R>,
        record: &BoxRecord,
    ) -> Result<Visit> {
        let data = read_payload(cursor, record)?;
        let (timescale, duration) = read_timing(&data, "mdhd")?;
        if let Some(track) = self.track.as_mut() {
            track.timescale = timescale;
            track.duration = duration;
        }
        Ok(Visit::Consumed)
    }

    fn parse_hdlr<R: Read + Seek>(
        &mut self,
        cursor: &mut ByteCursor<R>,
        record: &BoxRecord,
    ) -> Result<Visit> {
        let data = read_payload(cursor, record)?;
        let code = data
            .get(8..12)
            .ok_or_else(|| Error::malformed("hdlr too short for a handler type"))?;
        if let Some(track) = self.track.as_mut() {
            track.handler = HandlerType::from_bytes([code[0], code[1], code[2], code[3]]);
        }
        Ok(Visit::Consumed)
    }

    fn parse_sample_entry<R: Read + Seek>(
        &mut self,
        cursor: &mut ByteCursor<R>,
        record: &BoxRecord,
    ) -> Result<Visit> {
        let Some(track) = self.audio_track() else {
            return Ok(Visit::Skip);
        };
        // only the first description drives the layout
        if track.description.codec.is_some() || record.payload_size() < AUDIO_ENTRY_SIZE {
            return Ok(Visit::Skip);
        }

        let mut entry = cursor.take(AUDIO_ENTRY_SIZE as usize)?;
        entry.advance(8); // reserved, data reference index
        let version = entry.get_u16();
        entry.advance(6); // revision, vendor
        let description = &mut track.description;
        description.codec = Some(record.box_type);
        description.channels = entry.get_u16();
        description.bits_per_sample = entry.get_u16();
        entry.advance(4); // compression id, packet size
        description.sample_rate = entry.get_u32() >> 16;

        let extension = match version {
            1 => 16,
            2 => 36,
            _ => 0,
        };
        if version == 2 && record.payload_size() >= AUDIO_ENTRY_SIZE + extension {
            let mut v2 = cursor.take(extension as usize)?;
            v2.advance(4); // struct size
            description.sample_rate = v2.get_f64() as u32;
            description.channels = v2.get_u32() as u16;
            v2.advance(4);
            description.bits_per_sample = v2.get_u32() as u16;
        }

        let children_at = AUDIO_ENTRY_SIZE + extension;
        if record.payload_size() > children_at {
            Ok(Visit::Descend(children_at))
        } else {
            Ok(Visit::Consumed)
        }
    }

    fn parse_esds<R: Read + Seek>(
        &mut self,
        cursor: &mut ByteCursor<R>,
        record: &BoxRecord,
    ) -> Result<Visit> {
        let config = parse_esds(read_payload(cursor, record)?)?;
        if let Some(track) = self.audio_track() {
            let description = &mut track.description;
            description.object_type_indication = Some(config.object_type_indication);
            description.audio_object_type = config.audio_object_type;
            description.avg_bitrate = (config.avg_bitrate > 0).then_some(config.avg_bitrate);
            description.max_bitrate = (config.max_bitrate > 0).then_some(config.max_bitrate);
            if let Some(rate) = config.sample_rate {
                description.sample_rate = rate;
            }
            if let Some(channels) = config.channel_config.filter(|c| *c > 0) {
                description.channels = channels as u16;
            }
        }
        Ok(Visit::Consumed)
    }

    fn parse_alac<R: Read + Seek>(
        &mut self,
        cursor: &mut ByteCursor<R>,
        record: &BoxRecord,
    ) -> Result<Visit> {
        let config = parse_alac(read_payload(cursor, record)?)?;
        if let Some(track) = self.audio_track() {
            let description = &mut track.description;
            description.sample_rate = config.sample_rate;
            description.channels = config.channels as u16;
            description.bits_per_sample = config.bit_depth as u16;
            description.avg_bitrate = (config.avg_bitrate > 0).then_some(config.avg_bitrate);
        }
        Ok(Visit::Consumed)
    }

    fn parse_stts<R: Read + Seek>(
        &mut self,
        cursor: &mut ByteCursor<R>,
        record: &BoxRecord,
    ) -> Result<Visit> {
        let Some(track) = self.audio_track() else {
            return Ok(Visit::Skip);
        };
        let mut data = read_payload(cursor, record)?;
        let count = table_entries(&mut data, 8, record)?;
        track.table.time_to_sample = (0..count)
            .map(|_| TimeToSample {
                sample_count: data.get_u32(),
                sample_delta: data.get_u32(),
            })
            .collect();
        track.boxes.stts = Some(*record);
        Ok(Visit::Consumed)
    }

    fn parse_stsc<R: Read + Seek>(
        &mut self,
        cursor: &mut ByteCursor<R>,
        record: &BoxRecord,
    ) -> Result<Visit> {
        let Some(track) = self.audio_track() else {
            return Ok(Visit::Skip);
        };
        let mut data = read_payload(cursor, record)?;
        let count = table_entries(&mut data, 12, record)?;
        let mut runs: Vec<SampleToChunk> = Vec::with_capacity(count);
        for _ in 0..count {
            let run = SampleToChunk {
                first_chunk: data.get_u32(),
                samples_per_chunk: data.get_u32(),
                description_index: data.get_u32(),
            };
            let ascending = runs.last().map_or(run.first_chunk >= 1, |prev| {
                run.first_chunk > prev.first_chunk
            });
            if !ascending {
                return Err(Error::malformed(format!(
                    "stsc first chunk {} out of order",
                    run.first_chunk
                )));
            }
            runs.push(run);
        }
        track.table.sample_to_chunk = runs;
        track.boxes.stsc = Some(*record);
        Ok(Visit::Consumed)
    }

    fn parse_stsz<R: Read + Seek>(
        &mut self,
        cursor: &mut ByteCursor<R>,
        record: &BoxRecord,
    ) -> Result<Visit> {
        let mode = self.mode;
        let Some(track) = self.audio_track() else {
            return Ok(Visit::Skip);
        };
        if record.payload_size() < 12 {
            return Err(Error::malformed("stsz shorter than its fixed fields"));
        }
        let mut head = cursor.take(12)?;
        head.advance(4); // version/flags
        let size = head.get_u32();
        let count = head.get_u32();

        track.table.sample_sizes = if size != 0 {
            SampleSizes::Uniform { size, count }
        } else if mode == ParseMode::Scan {
            check_entry_room(count as u64, 4, record.payload_size() - 12, record)?;
            SampleSizes::Deferred { count }
        } else {
            let available = record.payload_size() - 12;
            check_entry_room(count as u64, 4, available, record)?;
            let mut data = cursor.take(count as usize * 4)?;
            SampleSizes::Varying((0..count).map(|_| data.get_u32()).collect())
        };
        track.boxes.stsz = Some(*record);
        Ok(Visit::Consumed)
    }

    fn parse_chunk_offsets<R: Read + Seek>(
        &mut self,
        cursor: &mut ByteCursor<R>,
        record: &BoxRecord,
    ) -> Result<Visit> {
        let mode = self.mode;
        let Some(track) = self.track.as_mut() else {
            return Ok(Visit::Skip);
        };
        let large = record.box_type == BoxType::CO64;
        let width = if large { 8 } else { 4 };
        if record.payload_size() < 8 {
            return Err(Error::malformed(format!(
                "{} shorter than its fixed fields",
                record.box_type
            )));
        }
        let mut head = cursor.take(8)?;
        head.advance(4); // version/flags
        let count = head.get_u32();
        check_entry_room(count as u64, width, record.payload_size() - 8, record)?;

        if mode == ParseMode::Seek {
            let mut data = cursor.take(count as usize * width as usize)?;
            track.table.chunk_offsets = (0..count)
                .map(|_| {
                    if large {
                        data.get_u64()
                    } else {
                        data.get_u32() as u64
                    }
                })
                .collect();
        }
        track.table.chunk_count = count;
        track.table.large_offsets = large;
        track.boxes.stco = Some(*record);
        Ok(Visit::Consumed)
    }

    fn parse_item_child<R: Read + Seek>(
        &mut self,
        cursor: &mut ByteCursor<R>,
        record: &BoxRecord,
    ) -> Result<Visit> {
        let include_artwork = self.include_artwork;
        let Some(item) = self.item.as_mut() else {
            return Ok(Visit::Skip);
        };
        match record.box_type {
            BoxType::DATA => {
                let payload = read_payload(cursor, record)?;
                if let Some(value) = ilst::decode_data(item.item, payload, include_artwork) {
                    item.values.push(value);
                }
                Ok(Visit::Consumed)
            }
            BoxType::NAME if item.item == BoxType::FREEFORM => {
                item.name = ilst::decode_name(read_payload(cursor, record)?);
                Ok(Visit::Consumed)
            }
            _ => Ok(Visit::Skip),
        }
    }

    fn finish_item(&mut self) {
        let Some(item) = self.item.take() else {
            return;
        };
        let key = match (item.item, item.name) {
            (BoxType::FREEFORM, Some(name)) => name.to_uppercase(),
            (BoxType::FREEFORM, None) => return,
            (code, _) => ilst::item_key(code),
        };
        for value in item.values {
            insert_multi(&mut self.file.tags, key.clone(), value);
        }
    }
}

impl BoxVisitor for Mp4Parser {
    fn visit<R: Read + Seek>(
        &mut self,
        cursor: &mut ByteCursor<R>,
        record: &BoxRecord,
        depth: usize,
    ) -> Result<Visit> {
        let visit = self.dispatch(cursor, record, depth)?;
        if let Visit::Descend(_) = visit {
            self.ancestors.push(record.box_type);
        }
        Ok(visit)
    }

    fn leave(&mut self, record: &BoxRecord) -> Result<()> {
        self.ancestors.pop();
        if self.parent() == Some(BoxType::ILST) {
            self.finish_item();
        } else if record.box_type == BoxType::TRAK {
            if let Some(track) = self.track.take() {
                if track.handler.is_audio() && self.file.current.is_none() {
                    self.file.current = Some(self.file.tracks.len());
                }
                self.file.tracks.push(track);
            }
        }
        Ok(())
    }
}

/// Read a whole leaf payload into memory.
fn read_payload<R: Read + Seek>(cursor: &mut ByteCursor<R>, record: &BoxRecord) -> Result<Bytes> {
    if record.payload_size() > MAX_LEAF_SIZE {
        return Err(Error::malformed(format!(
            "{} payload of {} bytes exceeds the {} byte limit",
            record.box_type,
            record.payload_size(),
            MAX_LEAF_SIZE
        )));
    }
    cursor.seek_to(record.payload_offset)?;
    cursor.take(record.payload_size() as usize)
}

/// Consume version/flags and the entry count, checking the entries fit.
fn table_entries(data: &mut Bytes, width: u64, record: &BoxRecord) -> Result<usize> {
    if data.remaining() < 8 {
        return Err(Error::malformed(format!(
            "{} shorter than its fixed fields",
            record.box_type
        )));
    }
    data.advance(4);
    let count = data.get_u32() as u64;
    check_entry_room(count, width, data.remaining() as u64, record)?;
    Ok(count as usize)
}

fn check_entry_room(count: u64, width: u64, available: u64, record: &BoxRecord) -> Result<()> {
    if count * width > available {
        return Err(Error::malformed(format!(
            "{} declares {} entries but holds only {} bytes",
            record.box_type, count, available
        )));
    }
    Ok(())
}

/// (timescale, duration) from an mvhd or mdhd payload.
fn read_timing(data: &[u8], what: &str) -> Result<(u32, u64)> {
    let too_short = || Error::malformed(format!("{} too short", what));
    match data.first() {
        Some(1) => {
            let raw = data.get(20..32).ok_or_else(too_short)?;
            let timescale = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let duration = u64::from_be_bytes([
                raw[4], raw[5], raw[6], raw[7], raw[8], raw[9], raw[10], raw[11],
            ]);
            Ok((timescale, duration))
        }
        Some(_) => {
            let raw = data.get(12..20).ok_or_else(too_short)?;
            let timescale = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let duration = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);
            Ok((timescale, duration as u64))
        }
        None => Err(too_short()),
    }
}

fn fourcc_string(code: u32) -> String {
    BoxType(code.to_be_bytes()).to_string()
}
