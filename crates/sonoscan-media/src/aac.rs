//! Raw AAC in ADTS framing.
//!
//! Every frame is walked to count frames and bytes. Bitrate and duration come
//! from those totals, not from header fields.

use crate::cursor::ByteCursor;
use crate::id3::{self, Id3Decoder, SkipId3};
use crate::mp4::AAC_SAMPLE_RATES;
use crate::{Result, ScanOptions};
use sonoscan_common::{AudioLayout, TagMap};
use std::io::{Read, Seek};
use tracing::debug;

/// Profile names indexed by the 2-bit ADTS profile field.
pub static AAC_PROFILES: [&str; 4] = ["Main", "LC", "SSR", "LTP"];

/// Bytes of fixed header needed to read a frame length.
const ADTS_PROBE: usize = 6;

/// Whether `raw` starts with an ADTS sync word (layer bits zero).
pub fn is_adts_sync(raw: &[u8]) -> bool {
    raw.len() >= 2 && raw[0] == 0xFF && raw[1] & 0xF6 == 0xF0
}

/// Summary of an ADTS stream.
#[derive(Debug, Clone, Default)]
pub struct AdtsFile {
    pub file_size: u64,
    /// Offset of the first frame sync, after any ID3v2 tag and junk.
    pub audio_start: u64,
    pub id3_version: Option<String>,
    pub tags: TagMap,
    pub frames: u32,
    /// Sum of every frame length seen, including a final partial frame.
    pub total_frame_bytes: u64,
    pub profile: u8,
    pub sample_rate: u32,
    pub channels: u8,
}

impl AdtsFile {
    pub fn parse<R: Read + Seek>(reader: R, options: &ScanOptions) -> Result<Self> {
        Self::parse_with_id3(reader, options, &mut SkipId3)
    }

    pub fn parse_with_id3<R: Read + Seek>(
        reader: R,
        options: &ScanOptions,
        decoder: &mut dyn Id3Decoder,
    ) -> Result<Self> {
        let mut cursor = ByteCursor::new(reader, options.aac_block_size)?;
        let mut file = AdtsFile {
            file_size: cursor.size(),
            ..Default::default()
        };
        file.id3_version = id3::read_leading_tag(&mut cursor, decoder, &mut file.tags)?;

        loop {
            if cursor.fill_up_to(ADTS_PROBE)? < ADTS_PROBE {
                debug!(offset = cursor.position(), "No ADTS sync found");
                file.audio_start = cursor.position();
                return Ok(file);
            }
            if is_adts_sync(cursor.window()) {
                break;
            }
            cursor.consume(1)?;
        }
        file.audio_start = cursor.position();

        loop {
            if cursor.fill_up_to(ADTS_PROBE)? < ADTS_PROBE {
                break;
            }
            let raw = cursor.window();
            if !is_adts_sync(raw) {
                break;
            }
            if file.frames == 0 {
                file.profile = (raw[2] & 0xC0) >> 6;
                file.sample_rate = AAC_SAMPLE_RATES[usize::from((raw[2] & 0x3C) >> 2)];
                file.channels = ((raw[2] & 0x01) << 2) | ((raw[3] & 0xC0) >> 6);
            }

            let frame_length = (u64::from(raw[3] & 0x03) << 11)
                | (u64::from(raw[4]) << 3)
                | u64::from(raw[5] >> 5);
            file.total_frame_bytes += frame_length;
            if frame_length == 0 || frame_length > cursor.remaining() {
                break;
            }
            cursor.skip(frame_length)?;
            file.frames += 1;
        }

        debug!(
            audio_start = file.audio_start,
            frames = file.frames,
            sample_rate = file.sample_rate,
            "Counted ADTS frames"
        );
        Ok(file)
    }

    pub fn profile_name(&self) -> &'static str {
        AAC_PROFILES[usize::from(self.profile & 0x03)]
    }

    /// Average bitrate in bits per second.
    ///
    /// Computed as kilobytes per frame times frames per second, rounded to
    /// whole kbit/s and scaled back up.
    pub fn bitrate(&self) -> u32 {
        let frames_per_sec = self.sample_rate as f32 / 1024.0;
        let bytes_per_frame = if self.frames == 0 {
            0.0
        } else {
            self.total_frame_bytes as f32 / (self.frames as f32 * 1000.0)
        };
        let kbps = (8.0 * f64::from(bytes_per_frame) * f64::from(frames_per_sec) + 0.5) as u32;
        kbps * 1000
    }

    /// Duration in milliseconds. A stream without a sample rate reports 1 s.
    pub fn duration_ms(&self) -> u64 {
        let frames_per_sec = self.sample_rate as f32 / 1024.0;
        let seconds = if frames_per_sec == 0.0 {
            1.0
        } else {
            self.frames as f32 / frames_per_sec
        };
        (seconds * 1000.0) as u64
    }

    pub fn layout(&self) -> AudioLayout {
        let has_frames = self.frames > 0;
        AudioLayout {
            file_size: self.file_size,
            audio_start_offset: self.audio_start,
            audio_byte_size: self.file_size.saturating_sub(self.audio_start),
            sample_rate: has_frames.then_some(self.sample_rate),
            channel_count: has_frames.then_some(self.channels),
            bits_per_sample: None,
            total_samples: has_frames.then(|| u64::from(self.frames) * 1024),
            duration_ms: has_frames.then(|| self.duration_ms()),
            bitrate: has_frames.then(|| self.bitrate()),
        }
    }

    pub fn info(&self) -> TagMap {
        let mut info = TagMap::new();
        if self.frames > 0 {
            info.insert("profile".into(), self.profile_name().into());
            info.insert("frames".into(), self.frames.into());
        }
        if let Some(version) = &self.id3_version {
            info.insert("id3_version".into(), version.as_str().into());
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// An ADTS frame of `len` bytes: LC, 44.1 kHz, stereo.
    fn frame(len: usize) -> Vec<u8> {
        let mut raw = vec![0u8; len];
        raw[0] = 0xFF;
        raw[1] = 0xF1;
        raw[2] = (1 << 6) | (4 << 2);
        raw[3] = (2 << 6) | ((len >> 11) as u8 & 0x03);
        raw[4] = (len >> 3) as u8;
        raw[5] = ((len & 0x07) as u8) << 5;
        raw
    }

    #[test]
    fn test_counts_frames() {
        let mut raw = Vec::new();
        for _ in 0..43 {
            raw.extend(frame(372));
        }
        let file = AdtsFile::parse(Cursor::new(raw), &ScanOptions::default()).unwrap();
        assert_eq!(file.frames, 43);
        assert_eq!(file.sample_rate, 44_100);
        assert_eq!(file.channels, 2);
        assert_eq!(file.profile_name(), "LC");
        // 43 / (44100 / 1024) s
        assert_eq!(file.duration_ms(), 998);
        // 0.372 kB * 8 * 43.066 frames/s = 128.16 -> 128 kbit/s
        assert_eq!(file.bitrate(), 128_000);
    }

    #[test]
    fn test_skips_id3_and_junk() {
        let mut raw = vec![b'I', b'D', b'3', 4, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0];
        raw.extend_from_slice(&[0x00, 0x12]);
        raw.extend(frame(100));
        raw.extend(frame(100));
        let file = AdtsFile::parse(Cursor::new(raw), &ScanOptions::default()).unwrap();
        assert_eq!(file.id3_version.as_deref(), Some("ID3v2.4.0"));
        assert_eq!(file.audio_start, 16);
        assert_eq!(file.frames, 2);
    }

    #[test]
    fn test_partial_last_frame_counts_bytes_only() {
        let mut raw = frame(200);
        raw.extend(&frame(200)[..50]);
        let file = AdtsFile::parse(Cursor::new(raw), &ScanOptions::default()).unwrap();
        assert_eq!(file.frames, 1);
        assert_eq!(file.total_frame_bytes, 400);
    }

    #[test]
    fn test_no_sync() {
        let file = AdtsFile::parse(Cursor::new(vec![0u8; 64]), &ScanOptions::default()).unwrap();
        assert_eq!(file.frames, 0);
        assert_eq!(file.layout().duration_ms, None);
    }
}
