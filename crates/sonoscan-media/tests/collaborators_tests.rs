//! Ogg Vorbis, ADTS and ID3 handling through the top-level scan API.

use sonoscan_common::{AudioFormat, TagMap, TagValue};
use sonoscan_media::id3::Id3Decoder;
use sonoscan_media::{scan, scan_file, scan_with_id3, Error, ScanOptions};
use std::io::{Cursor, Write};
use tempfile::Builder;

fn ogg_page(granule: u64, sequence: u32, packets: &[&[u8]]) -> Vec<u8> {
    let mut lacing = Vec::new();
    let mut body = Vec::new();
    for packet in packets {
        let mut left = packet.len();
        while left >= 255 {
            lacing.push(255u8);
            left -= 255;
        }
        lacing.push(left as u8);
        body.extend_from_slice(packet);
    }
    let mut out = b"OggS".to_vec();
    out.extend_from_slice(&[0, if sequence == 0 { 0x02 } else { 0 }]);
    out.extend_from_slice(&granule.to_le_bytes());
    out.extend_from_slice(&0x1234u32.to_le_bytes());
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.push(lacing.len() as u8);
    out.extend(lacing);
    out.extend(body);
    out
}

fn vorbis_packet(kind: u8, rest: &[u8]) -> Vec<u8> {
    let mut raw = vec![kind];
    raw.extend_from_slice(b"vorbis");
    raw.extend_from_slice(rest);
    raw
}

/// Three header pages then audio pages ending at `last_granule`.
fn vorbis_stream(sample_rate: u32, last_granule: u64) -> (Vec<u8>, u64) {
    let mut ident = 0u32.to_le_bytes().to_vec();
    ident.push(1);
    ident.extend_from_slice(&sample_rate.to_le_bytes());
    ident.extend_from_slice(&0i32.to_le_bytes());
    ident.extend_from_slice(&96_000i32.to_le_bytes());
    ident.extend_from_slice(&0i32.to_le_bytes());
    ident.extend_from_slice(&[0xB8, 0x01]);

    let mut comments = 6u32.to_le_bytes().to_vec();
    comments.extend_from_slice(b"libogg");
    comments.extend_from_slice(&2u32.to_le_bytes());
    for entry in ["title=Outro", "GENRE=Ambient"] {
        comments.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        comments.extend_from_slice(entry.as_bytes());
    }
    comments.push(1);

    let mut raw = ogg_page(0, 0, &[&vorbis_packet(1, &ident)]);
    raw.extend(ogg_page(
        0,
        1,
        &[&vorbis_packet(3, &comments), &vorbis_packet(5, &[0x33; 600])],
    ));
    let audio_start = raw.len() as u64;
    for (sequence, granule) in (2u32..).zip([last_granule / 2, last_granule]) {
        raw.extend(ogg_page(granule, sequence, &[&[0x55; 700]]));
    }
    (raw, audio_start)
}

/// ADTS stream of `count` LC frames at 44.1 kHz stereo.
fn adts_frames(count: usize, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(count * len);
    for _ in 0..count {
        let mut raw = vec![0u8; len];
        raw[0] = 0xFF;
        raw[1] = 0xF1;
        raw[2] = (1 << 6) | (4 << 2);
        raw[3] = (2 << 6) | ((len >> 11) as u8 & 0x03);
        raw[4] = (len >> 3) as u8;
        raw[5] = ((len & 0x07) as u8) << 5 | 0x1F;
        raw[6] = 0xFC;
        out.extend(raw);
    }
    out
}

fn id3_tag(body: &[u8]) -> Vec<u8> {
    let size = body.len() as u32;
    let mut out = vec![b'I', b'D', b'3', 3, 0, 0];
    out.extend_from_slice(&[
        (size >> 21) as u8 & 0x7F,
        (size >> 14) as u8 & 0x7F,
        (size >> 7) as u8 & 0x7F,
        size as u8 & 0x7F,
    ]);
    out.extend_from_slice(body);
    out
}

/// Pulls the body of the tag out as a single `COMMENT` value.
struct BodyAsComment {
    calls: usize,
}

impl Id3Decoder for BodyAsComment {
    fn decode(&mut self, tag: &[u8]) -> sonoscan_media::Result<TagMap> {
        self.calls += 1;
        let mut tags = TagMap::new();
        let body = String::from_utf8_lossy(&tag[10..]).into_owned();
        tags.insert("COMMENT".into(), TagValue::Text(body));
        Ok(tags)
    }
}

#[test]
fn test_scan_ogg_vorbis() {
    let (raw, audio_start) = vorbis_stream(48_000, 240_000);
    let result = scan(Cursor::new(raw.clone()), &ScanOptions::default()).unwrap();

    assert_eq!(result.format, AudioFormat::Ogg);
    assert_eq!(result.layout.sample_rate, Some(48_000));
    assert_eq!(result.layout.channel_count, Some(1));
    assert_eq!(result.layout.audio_start_offset, audio_start);
    assert_eq!(result.layout.duration_ms, Some(5_000));
    assert_eq!(result.tags["TITLE"].as_text(), Some("Outro"));
    assert_eq!(result.tags["GENRE"].as_text(), Some("Ambient"));
    assert_eq!(result.tags["VENDOR"].as_text(), Some("libogg"));
}

#[test]
fn test_ogg_granule_outside_tail_block() {
    let (raw, _) = vorbis_stream(48_000, 240_000);
    // a tail window smaller than the last page cannot see its header
    let options = ScanOptions {
        ogg_block_size: 64,
        ..Default::default()
    };
    let result = scan(Cursor::new(raw), &options).unwrap();
    assert_eq!(result.layout.sample_rate, Some(48_000));
    assert_eq!(result.layout.bitrate, Some(96_000));
}

#[test]
fn test_scan_adts_with_id3_decoder() {
    let mut raw = id3_tag(b"liner notes");
    let audio_start = raw.len() as u64;
    raw.extend(adts_frames(43, 372));

    let mut decoder = BodyAsComment { calls: 0 };
    let result = scan_with_id3(Cursor::new(raw), &ScanOptions::default(), &mut decoder).unwrap();

    assert_eq!(decoder.calls, 1);
    assert_eq!(result.format, AudioFormat::Aac);
    assert_eq!(result.tags["COMMENT"].as_text(), Some("liner notes"));
    assert_eq!(result.info["id3_version"].as_text(), Some("ID3v2.3.0"));
    assert_eq!(result.info["profile"].as_text(), Some("LC"));
    assert_eq!(result.info["frames"].as_integer(), Some(43));
    assert_eq!(result.layout.audio_start_offset, audio_start);
    assert_eq!(result.layout.duration_ms, Some(998));
    assert_eq!(result.layout.bitrate, Some(128_000));
}

#[test]
fn test_id3_past_end_of_file() {
    let mut raw = id3_tag(&[0; 40]);
    raw.extend(adts_frames(2, 100));
    raw.truncate(30);
    let err = scan_file_bytes(&raw, ".aac").unwrap_err();
    assert!(matches!(err, Error::MalformedContainer(_)));
}

#[test]
fn test_scan_file_extension_fallback() {
    // nothing sniffable, so the extension decides
    let result = scan_file_bytes(&[0x11; 64], ".aac").unwrap();
    assert_eq!(result.format, AudioFormat::Aac);
    assert_eq!(result.layout.duration_ms, None);
    assert!(result.info.get("frames").is_none());

    let err = scan_file_bytes(&[0x11; 64], ".txt").unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}

#[test]
fn test_scan_file_sniffs_before_extension() {
    let (raw, _) = vorbis_stream(44_100, 441_000);
    let result = scan_file_bytes(&raw, ".flac").unwrap();
    assert_eq!(result.format, AudioFormat::Ogg);
    assert_eq!(result.layout.duration_ms, Some(10_000));
}

fn scan_file_bytes(raw: &[u8], suffix: &str) -> sonoscan_media::Result<sonoscan_media::ScanResult> {
    let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(raw).unwrap();
    file.flush().unwrap();
    scan_file(file.path(), &ScanOptions::default())
}
