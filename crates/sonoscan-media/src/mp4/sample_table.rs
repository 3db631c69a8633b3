//! MP4 sample tables and the seek-table rewrite engine.
//!
//! A track's sample layout is described by four run-length encoded tables:
//! - stts: time-to-sample runs (sample count, sample duration)
//! - stsc: sample-to-chunk runs, each valid until the next run's first chunk
//! - stco/co64: absolute file offset of every chunk
//! - stsz: per-sample byte sizes, or one size shared by every sample
//!
//! Seeking produces a shorter table set that starts at the target sample.
//! Sizing and rewriting are separate pure functions so the new header length
//! is known before any chunk offset is shifted.

use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Box header plus version/flags plus entry count.
const TABLE_PREFIX: u64 = 16;

/// One time-to-sample run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeToSample {
    pub sample_count: u32,
    pub sample_delta: u32,
}

/// One sample-to-chunk run. `first_chunk` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleToChunk {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub description_index: u32,
}

/// Sample byte sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSizes {
    /// Every sample has the same size.
    Uniform { size: u32, count: u32 },
    /// One entry per sample.
    Varying(Vec<u32>),
    /// Per-sample sizes exist in the file but were not loaded (scan mode).
    Deferred { count: u32 },
}

impl Default for SampleSizes {
    fn default() -> Self {
        Self::Uniform { size: 0, count: 0 }
    }
}

impl SampleSizes {
    /// Number of samples described.
    pub fn count(&self) -> u64 {
        match self {
            Self::Uniform { count, .. } | Self::Deferred { count } => *count as u64,
            Self::Varying(sizes) => sizes.len() as u64,
        }
    }
}

/// In-memory sample tables of one track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleTable {
    pub time_to_sample: Vec<TimeToSample>,
    pub sample_to_chunk: Vec<SampleToChunk>,
    /// Absolute chunk offsets. Empty in scan mode; `chunk_count` is always set.
    pub chunk_offsets: Vec<u64>,
    pub chunk_count: u32,
    pub sample_sizes: SampleSizes,
    /// Offsets come from (and are written back as) `co64`.
    pub large_offsets: bool,
}

/// Where a sample sits inside the chunk layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLocation {
    pub sample: u32,
    /// 0-based chunk index.
    pub chunk: u32,
    /// Index of the sample within its chunk.
    pub sample_in_chunk: u32,
    /// Index of the sample-to-chunk run covering the chunk.
    pub run_index: usize,
}

impl SampleLocation {
    /// Index of the first sample of the chunk.
    pub fn first_sample_in_chunk(&self) -> u32 {
        self.sample - self.sample_in_chunk
    }
}

/// Encoded sizes of the four table boxes, headers included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableSizes {
    pub stts: u64,
    pub stsc: u64,
    pub stsz: u64,
    pub stco: u64,
}

impl TableSizes {
    pub fn total(&self) -> u64 {
        self.stts + self.stsc + self.stsz + self.stco
    }
}

/// Geometry of the original header that the rewrite must account for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    /// Offset of the first byte after the mdat header.
    pub data_offset: u64,
    /// Sizes of the table boxes as they appear in the file.
    pub table_sizes: TableSizes,
}

impl HeaderLayout {
    /// Length of the rewritten header given the new table sizes.
    pub fn rewritten_data_offset(&self, new_sizes: &TableSizes) -> Result<u64> {
        (self.data_offset + new_sizes.total())
            .checked_sub(self.table_sizes.total())
            .ok_or_else(|| Error::malformed("table boxes larger than the header holding them"))
    }
}

/// Tables re-based at a target sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenTables {
    pub table: SampleTable,
    /// Offset in the original file where streaming resumes.
    pub start_offset: u64,
    /// Offset of the same byte in the rewritten stream.
    pub data_offset: u64,
}

/// Encoded replacement table boxes.
#[derive(Debug, Clone)]
pub struct EncodedTables {
    pub stts: Bytes,
    pub stsc: Bytes,
    pub stsz: Bytes,
    pub stco: Bytes,
}

impl SampleTable {
    /// Total samples according to the time-to-sample runs.
    pub fn sample_count(&self) -> u64 {
        self.time_to_sample
            .iter()
            .map(|run| run.sample_count as u64)
            .sum()
    }

    /// Total duration in media timescale units.
    pub fn duration(&self) -> u64 {
        self.time_to_sample
            .iter()
            .map(|run| run.sample_count as u64 * run.sample_delta as u64)
            .sum()
    }

    /// Number of chunks covered by the run at `index`.
    fn run_chunks(&self, index: usize) -> u64 {
        let run = &self.sample_to_chunk[index];
        let next_first = self
            .sample_to_chunk
            .get(index + 1)
            .map(|next| next.first_chunk as u64)
            .unwrap_or(self.chunk_count as u64 + 1);
        next_first.saturating_sub(run.first_chunk as u64)
    }

    /// Total samples according to the sample-to-chunk runs.
    pub fn chunk_sample_count(&self) -> u64 {
        (0..self.sample_to_chunk.len())
            .map(|i| self.run_chunks(i) * self.sample_to_chunk[i].samples_per_chunk as u64)
            .sum()
    }

    /// Error unless sample-to-chunk and time-to-sample agree on the sample count.
    pub fn check_sample_counts(&self) -> Result<()> {
        let from_chunks = self.chunk_sample_count();
        let from_times = self.sample_count();
        if from_chunks != from_times {
            return Err(Error::malformed(format!(
                "sample-to-chunk describes {} samples, time-to-sample {}",
                from_chunks, from_times
            )));
        }
        Ok(())
    }

    /// Sample covering media time `t` (in timescale units).
    ///
    /// Exact per run: no interpolation across run boundaries.
    pub fn sample_at_time(&self, t: u64) -> Option<u32> {
        let mut run_start_time = 0u64;
        let mut run_start_sample = 0u64;
        for run in &self.time_to_sample {
            let run_duration = run.sample_count as u64 * run.sample_delta as u64;
            if t < run_start_time + run_duration {
                let into = (t - run_start_time) / run.sample_delta.max(1) as u64;
                return u32::try_from(run_start_sample + into).ok();
            }
            run_start_time += run_duration;
            run_start_sample += run.sample_count as u64;
        }
        None
    }

    /// Media time at which `sample` starts.
    pub fn time_of_sample(&self, sample: u32) -> u64 {
        let mut remaining = sample as u64;
        let mut time = 0u64;
        for run in &self.time_to_sample {
            let take = remaining.min(run.sample_count as u64);
            time += take * run.sample_delta as u64;
            remaining -= take;
            if remaining == 0 {
                break;
            }
        }
        time
    }

    /// Find the chunk holding `sample` via the sample-to-chunk runs.
    pub fn locate(&self, sample: u32) -> Result<SampleLocation> {
        let mut run_first_sample = 0u64;
        for (index, run) in self.sample_to_chunk.iter().enumerate() {
            let run_samples = self.run_chunks(index) * run.samples_per_chunk as u64;
            if (sample as u64) < run_first_sample + run_samples {
                let into = sample as u64 - run_first_sample;
                let spc = run.samples_per_chunk as u64;
                let chunk = (run.first_chunk as u64 - 1) + into / spc;
                return Ok(SampleLocation {
                    sample,
                    chunk: chunk as u32,
                    sample_in_chunk: (into % spc) as u32,
                    run_index: index,
                });
            }
            run_first_sample += run_samples;
        }
        Err(Error::SeekOutOfRange {
            target: sample as u64,
            limit: run_first_sample,
        })
    }

    /// Absolute file offset of a located sample.
    pub fn sample_offset(&self, location: &SampleLocation) -> Result<u64> {
        let chunk_offset = *self
            .chunk_offsets
            .get(location.chunk as usize)
            .ok_or_else(|| {
                Error::malformed(format!(
                    "chunk {} missing from a table of {} offsets",
                    location.chunk,
                    self.chunk_offsets.len()
                ))
            })?;

        let within = match &self.sample_sizes {
            SampleSizes::Uniform { size, .. } => {
                *size as u64 * location.sample_in_chunk as u64
            }
            SampleSizes::Varying(sizes) => {
                let first = location.first_sample_in_chunk() as usize;
                let preceding = sizes
                    .get(first..location.sample as usize)
                    .ok_or_else(|| Error::malformed("sample size table shorter than track"))?;
                preceding.iter().map(|s| *s as u64).sum()
            }
            SampleSizes::Deferred { .. } => {
                return Err(Error::unseekable("sample sizes were not loaded"));
            }
        };

        Ok(chunk_offset + within)
    }

    /// Canonical encoded sizes of these tables.
    pub fn encoded_sizes(&self) -> TableSizes {
        let stsz_entries = match &self.sample_sizes {
            SampleSizes::Varying(sizes) => sizes.len() as u64,
            _ => 0,
        };
        let offset_width = if self.large_offsets { 8 } else { 4 };
        TableSizes {
            stts: TABLE_PREFIX + 8 * self.time_to_sample.len() as u64,
            stsc: TABLE_PREFIX + 12 * self.sample_to_chunk.len() as u64,
            stsz: TABLE_PREFIX + 4 + 4 * stsz_entries,
            stco: TABLE_PREFIX + offset_width * self.chunk_count as u64,
        }
    }

    /// Drop everything before the located sample, leaving offsets unshifted
    /// except for the first chunk, which starts at the sample itself.
    fn truncated(&self, location: &SampleLocation, start_offset: u64) -> Result<SampleTable> {
        let target = location.sample;

        let mut time_to_sample = Vec::with_capacity(self.time_to_sample.len());
        let mut skipped = 0u64;
        for run in &self.time_to_sample {
            let run_end = skipped + run.sample_count as u64;
            if run_end <= target as u64 {
                skipped = run_end;
                continue;
            }
            let drop = (target as u64).saturating_sub(skipped) as u32;
            time_to_sample.push(TimeToSample {
                sample_count: run.sample_count - drop,
                sample_delta: run.sample_delta,
            });
            skipped = run_end;
        }

        let chunk = location.chunk;
        let run = self.sample_to_chunk[location.run_index];
        let run_last_chunk = self.run_chunks(location.run_index) as u32 + run.first_chunk - 1;
        let mut sample_to_chunk = Vec::with_capacity(self.sample_to_chunk.len() + 1);
        if location.sample_in_chunk > 0 {
            sample_to_chunk.push(SampleToChunk {
                first_chunk: 1,
                samples_per_chunk: run.samples_per_chunk - location.sample_in_chunk,
                description_index: run.description_index,
            });
            if run_last_chunk > chunk + 1 {
                sample_to_chunk.push(SampleToChunk {
                    first_chunk: 2,
                    ..run
                });
            }
        } else {
            sample_to_chunk.push(SampleToChunk {
                first_chunk: 1,
                ..run
            });
        }
        for later in &self.sample_to_chunk[location.run_index + 1..] {
            sample_to_chunk.push(SampleToChunk {
                first_chunk: later.first_chunk - chunk,
                ..*later
            });
        }

        let mut chunk_offsets = self
            .chunk_offsets
            .get(chunk as usize..)
            .ok_or_else(|| Error::malformed("chunk offset table shorter than chunk count"))?
            .to_vec();
        if let Some(first) = chunk_offsets.first_mut() {
            *first = start_offset;
        }

        let sample_sizes = match &self.sample_sizes {
            SampleSizes::Uniform { size, count } => SampleSizes::Uniform {
                size: *size,
                count: count.saturating_sub(target),
            },
            SampleSizes::Varying(sizes) => {
                SampleSizes::Varying(sizes.get(target as usize..).unwrap_or_default().to_vec())
            }
            SampleSizes::Deferred { .. } => {
                return Err(Error::unseekable("sample sizes were not loaded"));
            }
        };

        Ok(SampleTable {
            time_to_sample,
            sample_to_chunk,
            chunk_offsets,
            chunk_count: self.chunk_count - chunk,
            sample_sizes,
            large_offsets: self.large_offsets,
        })
    }

    /// Encode the four table boxes.
    pub fn encode(&self) -> Result<EncodedTables> {
        let sizes = self.encoded_sizes();

        let mut stts = BytesMut::with_capacity(sizes.stts as usize);
        write_table_prefix(&mut stts, sizes.stts, b"stts", self.time_to_sample.len())?;
        for run in &self.time_to_sample {
            stts.put_u32(run.sample_count);
            stts.put_u32(run.sample_delta);
        }

        let mut stsc = BytesMut::with_capacity(sizes.stsc as usize);
        write_table_prefix(&mut stsc, sizes.stsc, b"stsc", self.sample_to_chunk.len())?;
        for run in &self.sample_to_chunk {
            stsc.put_u32(run.first_chunk);
            stsc.put_u32(run.samples_per_chunk);
            stsc.put_u32(run.description_index);
        }

        let mut stsz = BytesMut::with_capacity(sizes.stsz as usize);
        stsz.put_u32(box_size(sizes.stsz)?);
        stsz.put_slice(b"stsz");
        stsz.put_u32(0); // version/flags
        match &self.sample_sizes {
            SampleSizes::Uniform { size, count } => {
                stsz.put_u32(*size);
                stsz.put_u32(*count);
            }
            SampleSizes::Varying(entries) => {
                stsz.put_u32(0);
                stsz.put_u32(entries.len() as u32);
                for size in entries {
                    stsz.put_u32(*size);
                }
            }
            SampleSizes::Deferred { .. } => {
                return Err(Error::unseekable("sample sizes were not loaded"));
            }
        }

        let stco = encode_chunk_offsets(&self.chunk_offsets, self.large_offsets)?;

        Ok(EncodedTables {
            stts: stts.freeze(),
            stsc: stsc.freeze(),
            stsz: stsz.freeze(),
            stco,
        })
    }
}

/// Encode a chunk offset table as stco, or co64 when `large` is set.
pub fn encode_chunk_offsets(offsets: &[u64], large: bool) -> Result<Bytes> {
    let width = if large { 8 } else { 4 };
    let size = TABLE_PREFIX + width * offsets.len() as u64;
    let mut out = BytesMut::with_capacity(size as usize);
    if large {
        write_table_prefix(&mut out, size, b"co64", offsets.len())?;
        for offset in offsets {
            out.put_u64(*offset);
        }
    } else {
        write_table_prefix(&mut out, size, b"stco", offsets.len())?;
        for offset in offsets {
            let offset = u32::try_from(*offset).map_err(|_| {
                Error::unseekable("chunk offset no longer fits a 32-bit stco entry")
            })?;
            out.put_u32(offset);
        }
    }
    Ok(out.freeze())
}

/// Move the chunk offsets of a track that is not being seeked so they follow
/// the data shift of a seek from `start_offset` to `data_offset`.
///
/// Chunks before the seek point are no longer delivered; they are pinned to
/// `data_offset` so every entry still points inside the new stream.
pub fn shift_chunk_offsets(offsets: &[u64], start_offset: u64, data_offset: u64) -> Vec<u64> {
    offsets
        .iter()
        .map(|offset| match offset.checked_sub(start_offset) {
            Some(relative) => data_offset.saturating_add(relative),
            None => data_offset,
        })
        .collect()
}

fn box_size(size: u64) -> Result<u32> {
    u32::try_from(size).map_err(|_| Error::unseekable("rewritten table exceeds 4 GiB"))
}

fn write_table_prefix(buf: &mut BytesMut, size: u64, code: &[u8; 4], entries: usize) -> Result<()> {
    buf.put_u32(box_size(size)?);
    buf.put_slice(code);
    buf.put_u32(0); // version/flags
    buf.put_u32(entries as u32);
    Ok(())
}

/// Measure the table boxes that a seek to `target_sample` would produce.
pub fn compute_new_table_sizes(table: &SampleTable, target_sample: u32) -> Result<TableSizes> {
    let location = locate_target(table, target_sample)?;
    // the start offset does not change any size
    Ok(table.truncated(&location, 0)?.encoded_sizes())
}

/// Re-base the tables at `target_sample`.
///
/// `sizes` must come from [`compute_new_table_sizes`] for the same target.
/// Every retained chunk offset is shifted so the target sample lands right
/// after the rewritten header.
pub fn rewrite_tables(
    table: &SampleTable,
    target_sample: u32,
    sizes: &TableSizes,
    layout: &HeaderLayout,
) -> Result<RewrittenTables> {
    let location = locate_target(table, target_sample)?;
    let start_offset = table.sample_offset(&location)?;
    let data_offset = layout.rewritten_data_offset(sizes)?;

    let mut rewritten = table.truncated(&location, start_offset)?;
    for offset in &mut rewritten.chunk_offsets {
        let relative = offset.checked_sub(start_offset).ok_or_else(|| {
            Error::unseekable(format!(
                "chunk at {} precedes the seek point at {}",
                offset, start_offset
            ))
        })?;
        *offset = data_offset + relative;
    }

    if rewritten.encoded_sizes() != *sizes {
        return Err(Error::unseekable(
            "table sizes were measured for a different seek target",
        ));
    }
    Ok(RewrittenTables {
        table: rewritten,
        start_offset,
        data_offset,
    })
}

fn locate_target(table: &SampleTable, target_sample: u32) -> Result<SampleLocation> {
    let total = table.sample_count();
    if target_sample as u64 >= total {
        return Err(Error::SeekOutOfRange {
            target: target_sample as u64,
            limit: total,
        });
    }
    table.check_sample_counts()?;
    table.locate(target_sample)
}
