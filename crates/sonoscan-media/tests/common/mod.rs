//! Byte-level fixture builders for the integration tests.

#![allow(dead_code)]

use bytes::{BufMut, BytesMut};

// ---------------------------------------------------------------------------
// MP4
// ---------------------------------------------------------------------------

/// A plain box: 32-bit size, type, payload.
pub fn mp4_box(code: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(payload.len() + 8);
    buf.put_u32((payload.len() + 8) as u32);
    buf.put_slice(code);
    buf.put_slice(payload);
    buf.to_vec()
}

/// A full box: version and flags ahead of the payload.
pub fn full_box(code: &[u8; 4], version: u8, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![version, 0, 0, 0];
    body.extend_from_slice(payload);
    mp4_box(code, &body)
}

fn concat(parts: &[Vec<u8>]) -> Vec<u8> {
    parts.concat()
}

/// Description of a single-track M4A file.
#[derive(Debug, Clone)]
pub struct Mp4Fixture {
    pub timescale: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// `(sample_count, sample_delta)` runs.
    pub stts: Vec<(u32, u32)>,
    /// `(first_chunk, samples_per_chunk)` runs.
    pub stsc: Vec<(u32, u32)>,
    pub chunk_count: u32,
    /// One size per sample; written as a uniform stsz when all are equal.
    pub sample_sizes: Vec<u32>,
    pub with_tags: bool,
    pub use_co64: bool,
    /// Place mdat ahead of moov.
    pub mdat_first: bool,
    /// Omit the stsc box.
    pub drop_stsc: bool,
    /// Omit the whole stbl.
    pub drop_stbl: bool,
    /// Add a second, text track whose two chunks share the first and last
    /// audio chunk offsets.
    pub text_track: bool,
}

impl Default for Mp4Fixture {
    /// 150 AAC frames of 1024 ticks at 44.1 kHz, ten per chunk, 100 bytes each.
    fn default() -> Self {
        Self {
            timescale: 44_100,
            sample_rate: 44_100,
            channels: 2,
            stts: vec![(100, 1024), (50, 1024)],
            stsc: vec![(1, 10)],
            chunk_count: 15,
            sample_sizes: vec![100; 150],
            with_tags: true,
            use_co64: false,
            mdat_first: false,
            drop_stsc: false,
            drop_stbl: false,
            text_track: false,
        }
    }
}

/// A built file plus the facts tests assert against.
#[derive(Debug, Clone)]
pub struct BuiltMp4 {
    pub bytes: Vec<u8>,
    /// Offset of the first mdat payload byte.
    pub data_offset: u64,
    pub chunk_offsets: Vec<u64>,
    pub mdat_offset: u64,
    /// Chunk offsets of the text track, when there is one.
    pub text_offsets: Vec<u64>,
}

impl Mp4Fixture {
    pub fn samples_per_chunk(&self, chunk: u32) -> u32 {
        self.stsc
            .iter()
            .rev()
            .find(|(first, _)| *first <= chunk + 1)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    fn chunk_offsets(&self, data_offset: u64) -> Vec<u64> {
        let mut offsets = Vec::new();
        let mut offset = data_offset;
        let mut sample = 0usize;
        for chunk in 0..self.chunk_count {
            offsets.push(offset);
            for _ in 0..self.samples_per_chunk(chunk) {
                offset += u64::from(self.sample_sizes.get(sample).copied().unwrap_or(0));
                sample += 1;
            }
        }
        offsets
    }

    fn ftyp(&self) -> Vec<u8> {
        mp4_box(b"ftyp", b"M4A \0\0\x02\0M4A isommp42")
    }

    fn mvhd(&self) -> Vec<u8> {
        let duration: u64 = self
            .stts
            .iter()
            .map(|(count, delta)| u64::from(*count) * u64::from(*delta))
            .sum();
        let mut p = BytesMut::new();
        p.put_u32(0); // creation
        p.put_u32(0); // modification
        p.put_u32(self.timescale);
        p.put_u32(duration as u32);
        p.put_slice(&[0; 80]);
        full_box(b"mvhd", 0, &p)
    }

    fn tkhd(&self, track_id: u32) -> Vec<u8> {
        let mut p = BytesMut::new();
        p.put_u32(0);
        p.put_u32(0);
        p.put_u32(track_id);
        p.put_slice(&[0; 72]);
        full_box(b"tkhd", 0, &p)
    }

    fn mdhd(&self) -> Vec<u8> {
        let duration: u64 = self
            .stts
            .iter()
            .map(|(count, delta)| u64::from(*count) * u64::from(*delta))
            .sum();
        let mut p = BytesMut::new();
        p.put_u32(0);
        p.put_u32(0);
        p.put_u32(self.timescale);
        p.put_u32(duration as u32);
        p.put_u32(0x55C4_0000); // language, quality
        full_box(b"mdhd", 0, &p)
    }

    fn hdlr(&self) -> Vec<u8> {
        let mut p = BytesMut::new();
        p.put_u32(0);
        p.put_slice(b"soun");
        p.put_slice(&[0; 12]);
        p.put_slice(b"SoundHandler\0");
        full_box(b"hdlr", 0, &p)
    }

    fn esds(&self) -> Vec<u8> {
        let mut p = BytesMut::new();
        p.put_u8(0x03);
        p.put_u8(25);
        p.put_u16(0); // ES_ID
        p.put_u8(0); // flags
        p.put_u8(0x04);
        p.put_u8(17);
        p.put_u8(0x40); // MPEG-4 audio
        p.put_u8(0x15);
        p.put_slice(&[0, 0, 0]);
        p.put_u32(160_000);
        p.put_u32(128_000);
        p.put_u8(0x05);
        p.put_u8(2);
        p.put_slice(&[0x12, 0x10]); // AAC LC, 44.1 kHz, stereo
        p.put_u8(0x06);
        p.put_u8(1);
        p.put_u8(0x02);
        full_box(b"esds", 0, &p)
    }

    fn stsd(&self) -> Vec<u8> {
        let mut entry = BytesMut::new();
        entry.put_slice(&[0; 6]);
        entry.put_u16(1); // data reference index
        entry.put_u16(0); // version
        entry.put_u16(0); // revision
        entry.put_u32(0); // vendor
        entry.put_u16(self.channels);
        entry.put_u16(16);
        entry.put_u32(0); // compression id, packet size
        entry.put_u32(self.sample_rate << 16);
        entry.put_slice(&self.esds());
        let mp4a = mp4_box(b"mp4a", &entry);

        let mut p = BytesMut::new();
        p.put_u32(1);
        p.put_slice(&mp4a);
        full_box(b"stsd", 0, &p)
    }

    fn stbl(&self, chunk_offsets: &[u64]) -> Vec<u8> {
        let mut stts = BytesMut::new();
        stts.put_u32(self.stts.len() as u32);
        for (count, delta) in &self.stts {
            stts.put_u32(*count);
            stts.put_u32(*delta);
        }

        let mut stsc = BytesMut::new();
        stsc.put_u32(self.stsc.len() as u32);
        for (first, per_chunk) in &self.stsc {
            stsc.put_u32(*first);
            stsc.put_u32(*per_chunk);
            stsc.put_u32(1);
        }

        let mut stsz = BytesMut::new();
        let uniform = self
            .sample_sizes
            .first()
            .filter(|first| self.sample_sizes.iter().all(|s| s == *first));
        match uniform {
            Some(size) => {
                stsz.put_u32(*size);
                stsz.put_u32(self.sample_sizes.len() as u32);
            }
            None => {
                stsz.put_u32(0);
                stsz.put_u32(self.sample_sizes.len() as u32);
                for size in &self.sample_sizes {
                    stsz.put_u32(*size);
                }
            }
        }

        let mut stco = BytesMut::new();
        stco.put_u32(chunk_offsets.len() as u32);
        for offset in chunk_offsets {
            if self.use_co64 {
                stco.put_u64(*offset);
            } else {
                stco.put_u32(*offset as u32);
            }
        }
        let stco_code = if self.use_co64 { b"co64" } else { b"stco" };

        let mut children = vec![self.stsd(), full_box(b"stts", 0, &stts)];
        if !self.drop_stsc {
            children.push(full_box(b"stsc", 0, &stsc));
        }
        children.push(full_box(b"stsz", 0, &stsz));
        children.push(full_box(stco_code, 0, &stco));
        mp4_box(b"stbl", &concat(&children))
    }

    fn text_offsets(&self, chunk_offsets: &[u64]) -> Vec<u64> {
        if !self.text_track {
            return Vec::new();
        }
        [chunk_offsets.first(), chunk_offsets.last()]
            .into_iter()
            .flatten()
            .copied()
            .collect()
    }

    fn text_trak(&self, offsets: &[u64]) -> Vec<u8> {
        let mut hdlr = BytesMut::new();
        hdlr.put_u32(0);
        hdlr.put_slice(b"text");
        hdlr.put_slice(&[0; 12]);
        hdlr.put_slice(b"TextHandler\0");

        let mut mdhd = BytesMut::new();
        mdhd.put_u32(0);
        mdhd.put_u32(0);
        mdhd.put_u32(1000);
        mdhd.put_u32(2000);
        mdhd.put_u32(0x55C4_0000);

        let mut stts = BytesMut::new();
        stts.put_u32(1);
        stts.put_u32(offsets.len() as u32);
        stts.put_u32(1000);
        let mut stsc = BytesMut::new();
        stsc.put_u32(1);
        stsc.put_slice(&[0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1]);
        let mut stsz = BytesMut::new();
        stsz.put_u32(20);
        stsz.put_u32(offsets.len() as u32);
        let mut stco = BytesMut::new();
        stco.put_u32(offsets.len() as u32);
        for offset in offsets {
            stco.put_u32(*offset as u32);
        }

        let stbl = mp4_box(
            b"stbl",
            &concat(&[
                full_box(b"stsd", 0, &[0, 0, 0, 0]),
                full_box(b"stts", 0, &stts),
                full_box(b"stsc", 0, &stsc),
                full_box(b"stsz", 0, &stsz),
                full_box(b"stco", 0, &stco),
            ]),
        );
        let minf = mp4_box(b"minf", &concat(&[full_box(b"nmhd", 0, &[]), stbl]));
        let mdia = mp4_box(
            b"mdia",
            &concat(&[full_box(b"mdhd", 0, &mdhd), full_box(b"hdlr", 0, &hdlr), minf]),
        );
        mp4_box(b"trak", &concat(&[self.tkhd(2), mdia]))
    }

    fn udta(&self) -> Vec<u8> {
        let data = |type_code: u32, value: &[u8]| {
            let mut p = type_code.to_be_bytes().to_vec();
            p.extend_from_slice(&[0; 4]);
            p.extend_from_slice(value);
            mp4_box(b"data", &p)
        };
        let title = mp4_box(b"\xa9nam", &data(1, b"Fixture Song"));
        let artist = mp4_box(b"\xa9ART", &data(1, b"Fixture Artist"));
        let track = mp4_box(b"trkn", &data(0, &[0, 0, 0, 3, 0, 12, 0, 0]));
        let cover = mp4_box(b"covr", &data(13, &[0xFF, 0xD8, 0xFF, 0xE0]));
        let freeform = mp4_box(
            b"----",
            &concat(&[
                full_box(b"mean", 0, b"com.apple.iTunes"),
                full_box(b"name", 0, b"iTunSMPB"),
                data(1, b" 00000000 00000840"),
            ]),
        );
        let ilst = mp4_box(b"ilst", &concat(&[title, artist, track, cover, freeform]));

        let mut hdlr = BytesMut::new();
        hdlr.put_u32(0);
        hdlr.put_slice(b"mdir");
        hdlr.put_slice(b"appl");
        hdlr.put_slice(&[0; 9]);
        let meta = full_box(b"meta", 0, &concat(&[full_box(b"hdlr", 0, &hdlr), ilst]));
        mp4_box(b"udta", &concat(&[meta, vec![0, 0, 0, 0]]))
    }

    fn moov(&self, chunk_offsets: &[u64]) -> Vec<u8> {
        let mut minf_children = vec![full_box(b"smhd", 0, &[0; 4])];
        if !self.drop_stbl {
            minf_children.push(self.stbl(chunk_offsets));
        }
        let minf = mp4_box(b"minf", &concat(&minf_children));
        let mdia = mp4_box(b"mdia", &concat(&[self.mdhd(), self.hdlr(), minf]));
        let trak = mp4_box(b"trak", &concat(&[self.tkhd(1), mdia]));

        let mut children = vec![self.mvhd(), trak];
        if self.text_track {
            children.push(self.text_trak(&self.text_offsets(chunk_offsets)));
        }
        if self.with_tags {
            children.push(self.udta());
        }
        mp4_box(b"moov", &concat(&children))
    }

    fn mdat(&self) -> Vec<u8> {
        let total: u32 = self.sample_sizes.iter().sum();
        let payload: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
        mp4_box(b"mdat", &payload)
    }

    pub fn build(&self) -> BuiltMp4 {
        let ftyp = self.ftyp();
        let mdat = self.mdat();
        // moov has the same length whatever the offsets are
        let placeholder = vec![0; self.chunk_count as usize];
        let moov_len = self.moov(&placeholder).len() as u64;

        let (mdat_offset, chunk_offsets, bytes) = if self.mdat_first {
            let mdat_offset = ftyp.len() as u64;
            let offsets = self.chunk_offsets(mdat_offset + 8);
            let bytes = concat(&[ftyp, mdat, self.moov(&offsets)]);
            (mdat_offset, offsets, bytes)
        } else {
            let mdat_offset = ftyp.len() as u64 + moov_len;
            let offsets = self.chunk_offsets(mdat_offset + 8);
            let bytes = concat(&[ftyp, self.moov(&offsets), mdat]);
            (mdat_offset, offsets, bytes)
        };

        BuiltMp4 {
            bytes,
            data_offset: mdat_offset + 8,
            text_offsets: self.text_offsets(&chunk_offsets),
            chunk_offsets,
            mdat_offset,
        }
    }
}

// ---------------------------------------------------------------------------
// FLAC
// ---------------------------------------------------------------------------

/// CRC-8, polynomial 0x07, as in FLAC frame headers.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// FLAC "UTF-8" coding of a frame or sample number.
pub fn utf8_number(value: u64) -> Vec<u8> {
    if value < 0x80 {
        return vec![value as u8];
    }
    let mut len = 2;
    while len < 7 && value >= 1u64 << (5 * len + 1) {
        len += 1;
    }
    let mut out = vec![0u8; len];
    let mut v = value;
    for byte in out.iter_mut().skip(1).rev() {
        *byte = 0x80 | (v & 0x3F) as u8;
        v >>= 6;
    }
    out[0] = (0xFF00u16 >> len) as u8 | v as u8;
    out
}

/// Description of a fixed-blocksize FLAC stream.
#[derive(Debug, Clone)]
pub struct FlacFixture {
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: u8,
    pub block_size: u16,
    pub total_samples: u64,
    /// Bytes of filler after each frame header.
    pub frame_payload: usize,
    /// Seek point every N frames; `None` for no SEEKTABLE.
    pub seek_every: Option<u64>,
    pub comments: Vec<String>,
    pub id3_prefix: bool,
    /// Added to every seek point offset, making the points stale.
    pub seek_skew: u64,
}

impl Default for FlacFixture {
    /// 30 s of 44.1 kHz stereo in 4096-sample blocks.
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            bits_per_sample: 16,
            block_size: 4096,
            total_samples: 1_323_000,
            frame_payload: 40,
            seek_every: Some(32),
            comments: vec!["TITLE=Fixture".into(), "ARTIST=One".into(), "ARTIST=Two".into()],
            id3_prefix: false,
            seek_skew: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuiltFlac {
    pub bytes: Vec<u8>,
    pub audio_start: u64,
    /// `(first sample, absolute offset)` of every frame.
    pub frames: Vec<(u64, u64)>,
}

impl FlacFixture {
    pub fn frame_count(&self) -> u64 {
        self.total_samples.div_ceil(u64::from(self.block_size))
    }

    fn streaminfo(&self) -> Vec<u8> {
        let mut p = BytesMut::new();
        p.put_u16(self.block_size);
        p.put_u16(self.block_size);
        p.put_slice(&[0, 0, 16]);
        p.put_slice(&[0, 0x40, 0]);
        let packed: u64 = u64::from(self.sample_rate) << 44
            | u64::from(self.channels - 1) << 41
            | u64::from(self.bits_per_sample - 1) << 36
            | self.total_samples;
        p.put_u64(packed);
        p.put_slice(&[0x5A; 16]);
        p.to_vec()
    }

    fn frame(&self, index: u64) -> Vec<u8> {
        let first = index * u64::from(self.block_size);
        let samples = (self.total_samples - first).min(u64::from(self.block_size));

        let rate_code = match self.sample_rate {
            44_100 => 9,
            48_000 => 10,
            _ => 0,
        };
        let depth_code = match self.bits_per_sample {
            16 => 4,
            24 => 6,
            _ => 0,
        };
        let (block_code, trailing): (u8, Vec<u8>) = if samples == 4096 {
            (12, Vec::new())
        } else {
            (7, ((samples - 1) as u16).to_be_bytes().to_vec())
        };

        let mut header = vec![
            0xFF,
            0xF8,
            (block_code << 4) | rate_code,
            ((self.channels - 1) << 4) | (depth_code << 1),
        ];
        header.extend(utf8_number(index));
        header.extend(trailing);
        header.push(crc8(&header));
        // filler without sync-like bytes
        header.extend((0..self.frame_payload).map(|i| (i % 0x7F) as u8));
        header
    }

    fn block(kind: u8, last: bool, body: &[u8]) -> Vec<u8> {
        let mut out = vec![kind | if last { 0x80 } else { 0 }];
        out.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        out.extend_from_slice(body);
        out
    }

    fn vorbis_comments(&self) -> Vec<u8> {
        let vendor = b"reference libFLAC 1.4.3";
        let mut out = (vendor.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(vendor);
        out.extend_from_slice(&(self.comments.len() as u32).to_le_bytes());
        for comment in &self.comments {
            out.extend_from_slice(&(comment.len() as u32).to_le_bytes());
            out.extend_from_slice(comment.as_bytes());
        }
        out
    }

    pub fn build(&self) -> BuiltFlac {
        let frames: Vec<Vec<u8>> = (0..self.frame_count()).map(|i| self.frame(i)).collect();
        let mut relative = Vec::with_capacity(frames.len());
        let mut offset = 0u64;
        for frame in &frames {
            relative.push(offset);
            offset += frame.len() as u64;
        }

        let mut out = Vec::new();
        if self.id3_prefix {
            out.extend_from_slice(&[b'I', b'D', b'3', 4, 0, 0, 0, 0, 0, 20]);
            out.extend_from_slice(&[0; 20]);
        }
        out.extend_from_slice(b"fLaC");
        out.extend(Self::block(0, false, &self.streaminfo()));

        if let Some(every) = self.seek_every {
            let mut table = BytesMut::new();
            for (index, rel) in relative.iter().enumerate().step_by(every as usize) {
                table.put_u64(index as u64 * u64::from(self.block_size));
                table.put_u64(*rel + self.seek_skew);
                table.put_u16(self.block_size);
            }
            // one placeholder point
            table.put_u64(u64::MAX);
            table.put_u64(0);
            table.put_u16(0);
            out.extend(Self::block(3, false, &table));
        }
        out.extend(Self::block(4, false, &self.vorbis_comments()));
        out.extend(Self::block(1, true, &[0; 64]));

        let audio_start = out.len() as u64;
        let frames_at = relative
            .iter()
            .enumerate()
            .map(|(i, rel)| (i as u64 * u64::from(self.block_size), audio_start + rel))
            .collect();
        for frame in frames {
            out.extend(frame);
        }

        BuiltFlac {
            bytes: out,
            audio_start,
            frames: frames_at,
        }
    }
}
