//! Sample-accurate frame location in a FLAC stream.
//!
//! A seek first tries the tightest SEEKTABLE point at or before the target,
//! confirming that a valid frame with the expected first sample starts there.
//! Without a usable point the audio region is bisected with a bounded number of
//! probes, each probe scanning forward for the next valid frame header.

use super::frame::{parse_frame_header, FrameHeader, MAX_FRAME_HEADER};
use super::metadata::SeekPoint;
use super::FlacFile;
use crate::cursor::ByteCursor;
use crate::{Error, FramePosition, Result};
use std::io::{Read, Seek};
use tracing::{debug, trace};

/// A frame found in the audio region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedFrame {
    pub offset: u64,
    pub first_sample: u64,
    pub block_size: u32,
}

impl LocatedFrame {
    pub fn contains(&self, sample: u64) -> bool {
        sample >= self.first_sample && sample < self.first_sample + u64::from(self.block_size)
    }
}

impl From<LocatedFrame> for FramePosition {
    fn from(frame: LocatedFrame) -> Self {
        FramePosition {
            byte_offset: frame.offset,
            sample: frame.first_sample,
        }
    }
}

impl FlacFile {
    /// Locate the frame containing `target` (a sample index).
    pub fn seek_sample<R: Read + Seek>(&self, reader: R, target: u64) -> Result<FramePosition> {
        let total = self.stream_info.total_samples;
        if total > 0 && target >= total {
            return Err(Error::SeekOutOfRange {
                target,
                limit: total,
            });
        }

        let mut cursor = ByteCursor::new(reader, self.block_size)?;
        let end = cursor.size();
        let mut low = self.audio_start;
        let mut high = end;
        let mut best = None;

        let tightest = self
            .seek_points
            .iter()
            .enumerate()
            .rev()
            .find(|(_, point)| point.sample_number <= target);
        if let Some((index, point)) = tightest {
            match self.confirm_point(&mut cursor, point)? {
                Some(frame) => {
                    if frame.contains(target) {
                        debug!(target, offset = frame.offset, "Seek point frame contains target");
                        return Ok(frame.into());
                    }
                    low = frame.offset + 1;
                    high = match self.seek_points.get(index + 1) {
                        Some(next) => self
                            .confirm_point(&mut cursor, next)?
                            .filter(|next| next.first_sample > target && next.offset >= low)
                            .map_or(end, |next| next.offset),
                        None => end,
                    };
                    best = Some(frame);
                }
                None => debug!(
                    sample = point.sample_number,
                    offset = point.stream_offset,
                    "Seek point does not land on a matching frame, bisecting"
                ),
            }
        }

        let narrowed = best.is_some();
        let mut found = self.bisect(&mut cursor, target, low, high, best)?;
        if narrowed && !found.map_or(false, |frame| frame.contains(target)) {
            debug!(target, "Seek point range missed the target, bisecting the whole stream");
            let full = self.bisect(&mut cursor, target, self.audio_start, end, None)?;
            found = match (found, full) {
                (Some(narrow), Some(full))
                    if !full.contains(target) && full.first_sample <= narrow.first_sample =>
                {
                    Some(narrow)
                }
                (narrow, full) => full.or(narrow),
            };
        }
        found
            .map(FramePosition::from)
            .ok_or_else(|| Error::unseekable("no valid FLAC frame in the audio region"))
    }

    /// Locate the frame containing the sample at `time_ms`.
    pub fn find_frame<R: Read + Seek>(&self, reader: R, time_ms: u64) -> Result<FramePosition> {
        let rate = self.stream_info.sample_rate;
        if rate == 0 {
            return Err(Error::unseekable("stream has no sample rate"));
        }
        let target = (u128::from(time_ms) * u128::from(rate) / 1000) as u64;
        self.seek_sample(reader, target)
    }

    /// Check every seek point against the frame found at its offset.
    pub fn verify_seek_points<R: Read + Seek>(&self, reader: R) -> Result<Vec<(SeekPoint, bool)>> {
        let mut cursor = ByteCursor::new(reader, self.block_size)?;
        let mut checked = Vec::with_capacity(self.seek_points.len());
        for point in &self.seek_points {
            let confirmed = self.confirm_point(&mut cursor, point)?.is_some();
            checked.push((*point, confirmed));
        }
        Ok(checked)
    }

    fn confirm_point<R: Read + Seek>(
        &self,
        cursor: &mut ByteCursor<R>,
        point: &SeekPoint,
    ) -> Result<Option<LocatedFrame>> {
        // an offset past the addressable range marks a corrupt point
        let Some(offset) = self.audio_start.checked_add(point.stream_offset) else {
            return Ok(None);
        };
        if offset >= cursor.size() {
            return Ok(None);
        }
        Ok(self
            .frame_at(cursor, offset)?
            .filter(|frame| frame.first_sample == point.sample_number))
    }

    /// Bisect `[low, high)` for the frame holding `target`, falling back to
    /// the closest frame below it when the budget runs out.
    fn bisect<R: Read + Seek>(
        &self,
        cursor: &mut ByteCursor<R>,
        target: u64,
        mut low: u64,
        mut high: u64,
        mut best: Option<LocatedFrame>,
    ) -> Result<Option<LocatedFrame>> {
        // The first probe lands on `low` so early targets resolve to the
        // first frame without a search.
        let mut next_probe = best.is_none().then_some(low);
        let mut probes = 0;

        while probes < self.max_seek_probes && low < high {
            let probe = next_probe.take().unwrap_or(low + (high - low) / 2);
            probes += 1;
            match self.next_frame(cursor, probe, high)? {
                None => high = probe,
                Some(frame) if frame.first_sample > target => high = probe,
                Some(frame) => {
                    trace!(probe, offset = frame.offset, sample = frame.first_sample, "Probe");
                    if frame.contains(target) {
                        debug!(target, probes, offset = frame.offset, "Located frame");
                        return Ok(Some(frame));
                    }
                    if best.map_or(true, |b| frame.first_sample > b.first_sample) {
                        best = Some(frame);
                    }
                    low = frame.offset + 1;
                }
            }
        }

        debug!(target, probes, "Probe budget exhausted or range empty");
        Ok(best)
    }

    /// Decode a frame header exactly at `offset`.
    fn frame_at<R: Read + Seek>(
        &self,
        cursor: &mut ByteCursor<R>,
        offset: u64,
    ) -> Result<Option<LocatedFrame>> {
        cursor.seek_to(offset)?;
        let avail = cursor.fill_up_to(MAX_FRAME_HEADER)?;
        Ok(parse_frame_header(&cursor.window()[..avail])
            .filter(|header| self.plausible(header))
            .map(|header| self.locate(offset, &header)))
    }

    /// Scan forward from `from` for the first valid frame starting before `limit`.
    fn next_frame<R: Read + Seek>(
        &self,
        cursor: &mut ByteCursor<R>,
        from: u64,
        limit: u64,
    ) -> Result<Option<LocatedFrame>> {
        if from >= limit || from >= cursor.size() {
            return Ok(None);
        }
        cursor.seek_to(from)?;

        loop {
            let base = cursor.position();
            if base >= limit {
                return Ok(None);
            }
            let avail = cursor.fill_up_to(self.block_size.max(MAX_FRAME_HEADER * 2))?;
            let at_eof = cursor.remaining() == avail as u64;
            if avail < 2 {
                return Ok(None);
            }
            let scan_end = if at_eof {
                avail - 1
            } else {
                avail - MAX_FRAME_HEADER
            };
            let scan_end = scan_end.min(usize::try_from(limit - base).unwrap_or(usize::MAX));

            let window = cursor.window();
            let hit = (0..scan_end).find_map(|i| {
                if window[i] != 0xFF || window[i + 1] & 0xFE != 0xF8 {
                    return None;
                }
                let stop = (i + MAX_FRAME_HEADER).min(avail);
                parse_frame_header(&window[i..stop])
                    .filter(|header| self.plausible(header))
                    .map(|header| (i, header))
            });

            if let Some((i, header)) = hit {
                return Ok(Some(self.locate(base + i as u64, &header)));
            }
            if at_eof {
                return Ok(None);
            }
            cursor.consume(scan_end)?;
        }
    }

    /// Reject headers that contradict STREAMINFO.
    fn plausible(&self, header: &FrameHeader) -> bool {
        let info = &self.stream_info;
        if header.channels != info.channels {
            return false;
        }
        if matches!(header.sample_rate, Some(rate) if info.sample_rate != 0 && rate != info.sample_rate)
        {
            return false;
        }
        if matches!(header.bits_per_sample, Some(bits) if bits != info.bits_per_sample) {
            return false;
        }
        if info.max_block_size != 0 && header.block_size > u32::from(info.max_block_size) {
            return false;
        }
        let first = header.first_sample(u32::from(info.max_block_size));
        info.total_samples == 0 || first < info.total_samples
    }

    fn locate(&self, offset: u64, header: &FrameHeader) -> LocatedFrame {
        LocatedFrame {
            offset,
            first_sample: header.first_sample(u32::from(self.stream_info.max_block_size)),
            block_size: header.block_size,
        }
    }
}
