//! Integration tests for FLAC parsing and frame seeking.

mod common;

use common::FlacFixture;
use sonoscan_common::AudioFormat;
use sonoscan_media::flac::{FlacFile, SeekPoint};
use sonoscan_media::{find_frame, scan, Error, FramePosition, ScanOptions};
use std::io::Cursor;

fn parse(bytes: &[u8]) -> FlacFile {
    FlacFile::parse(Cursor::new(bytes.to_vec()), &ScanOptions::default()).unwrap()
}

#[test]
fn test_scan_streaminfo_layout() {
    let built = FlacFixture::default().build();
    let result = scan(Cursor::new(built.bytes.clone()), &ScanOptions::default()).unwrap();

    assert_eq!(result.format, AudioFormat::Flac);
    let layout = &result.layout;
    assert_eq!(layout.sample_rate, Some(44_100));
    assert_eq!(layout.channel_count, Some(2));
    assert_eq!(layout.bits_per_sample, Some(16));
    assert_eq!(layout.total_samples, Some(1_323_000));
    assert_eq!(layout.duration_ms, Some(30_000));
    assert_eq!(layout.audio_start_offset, built.audio_start);

    let audio_bytes = built.bytes.len() as u64 - built.audio_start;
    assert_eq!(layout.audio_byte_size, audio_bytes);
    assert_eq!(layout.bitrate, Some((audio_bytes * 8000 / 30_000) as u32));

    assert_eq!(result.tags["TITLE"].as_text(), Some("Fixture"));
    assert_eq!(result.tags["ARTIST"].as_list().map(|l| l.len()), Some(2));
    assert_eq!(result.tags["VENDOR"].as_text(), Some("reference libFLAC 1.4.3"));
    assert_eq!(result.info["maximum_blocksize"].as_integer(), Some(4096));
    assert_eq!(result.info["md5"].as_text(), Some("5a".repeat(16).as_str()));
    assert_eq!(result.info["seek_points"].as_integer(), Some(11));
}

#[test]
fn test_seek_points_confirm_against_frames() {
    let built = FlacFixture::default().build();
    let file = parse(&built.bytes);
    let checked = file.verify_seek_points(Cursor::new(built.bytes)).unwrap();
    assert_eq!(checked.len(), 11);
    assert!(checked.iter().all(|(_, confirmed)| *confirmed));
}

#[test]
fn test_seek_midpoint_with_seektable() {
    let built = FlacFixture::default().build();
    let file = parse(&built.bytes);

    let position = file.seek_sample(Cursor::new(built.bytes.clone()), 661_500).unwrap();
    assert!(position.sample <= 661_500);
    assert!(661_500 - position.sample < 4096);
    assert_eq!(position.byte_offset, built.frames[161].1);
}

#[test]
fn test_seek_midpoint_by_bisection() {
    let fixture = FlacFixture {
        seek_every: None,
        ..Default::default()
    };
    let built = fixture.build();
    let file = parse(&built.bytes);
    assert!(file.seek_points.is_empty());

    let position = file.seek_sample(Cursor::new(built.bytes.clone()), 661_500).unwrap();
    assert_eq!(
        position,
        FramePosition {
            byte_offset: built.frames[161].1,
            sample: 161 * 4096,
        }
    );
}

#[test]
fn test_stale_seek_points_fall_back_to_bisection() {
    let fixture = FlacFixture {
        seek_skew: 3,
        ..Default::default()
    };
    let built = fixture.build();
    let file = parse(&built.bytes);
    let checked = file.verify_seek_points(Cursor::new(built.bytes.clone())).unwrap();
    assert!(checked.iter().all(|(_, confirmed)| !*confirmed));

    let position = file.seek_sample(Cursor::new(built.bytes.clone()), 661_500).unwrap();
    assert_eq!(position.byte_offset, built.frames[161].1);
}

#[test]
fn test_stale_upper_seek_point_does_not_bound_the_search() {
    let built = FlacFixture::default().build();
    let mut file = parse(&built.bytes);
    // the second point claims sample 819200 but sits on frame 10
    file.seek_points = vec![
        SeekPoint {
            sample_number: 0,
            stream_offset: 0,
            frame_samples: 4096,
        },
        SeekPoint {
            sample_number: 200 * 4096,
            stream_offset: built.frames[10].1 - built.audio_start,
            frame_samples: 4096,
        },
    ];

    let position = file.seek_sample(Cursor::new(built.bytes.clone()), 661_500).unwrap();
    assert_eq!(
        position,
        FramePosition {
            byte_offset: built.frames[161].1,
            sample: 161 * 4096,
        }
    );
}

#[test]
fn test_seek_point_offset_past_u64_is_ignored() {
    let built = FlacFixture::default().build();
    let mut file = parse(&built.bytes);
    file.seek_points = vec![SeekPoint {
        sample_number: 160 * 4096,
        stream_offset: u64::MAX - 5,
        frame_samples: 4096,
    }];

    let checked = file.verify_seek_points(Cursor::new(built.bytes.clone())).unwrap();
    assert_eq!(checked.len(), 1);
    assert!(!checked[0].1);

    let position = file.seek_sample(Cursor::new(built.bytes.clone()), 661_500).unwrap();
    assert_eq!(position.byte_offset, built.frames[161].1);

    // the same point as the upper bound of a confirmed one
    file.seek_points.insert(
        0,
        SeekPoint {
            sample_number: 100 * 4096,
            stream_offset: built.frames[100].1 - built.audio_start,
            frame_samples: 4096,
        },
    );
    file.seek_points[1].sample_number = 170 * 4096;
    let position = file.seek_sample(Cursor::new(built.bytes), 661_500).unwrap();
    assert_eq!(position.byte_offset, built.frames[161].1);
}

#[test]
fn test_first_sample_is_audio_start() {
    for seek_every in [Some(32), None] {
        let fixture = FlacFixture {
            seek_every,
            ..Default::default()
        };
        let built = fixture.build();
        let file = parse(&built.bytes);
        let position = file.seek_sample(Cursor::new(built.bytes), 0).unwrap();
        assert_eq!(position.sample, 0);
        assert_eq!(position.byte_offset, file.audio_start);
    }
}

#[test]
fn test_last_sample_lands_in_last_frame() {
    let built = FlacFixture::default().build();
    let file = parse(&built.bytes);
    let position = file
        .seek_sample(Cursor::new(built.bytes.clone()), 1_322_999)
        .unwrap();
    let (first, offset) = *built.frames.last().unwrap();
    assert_eq!(position.sample, first);
    assert_eq!(position.byte_offset, offset);
}

#[test]
fn test_seek_to_total_samples_is_out_of_range() {
    let built = FlacFixture::default().build();
    let file = parse(&built.bytes);
    let err = file
        .seek_sample(Cursor::new(built.bytes), 1_323_000)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::SeekOutOfRange {
            target: 1_323_000,
            limit: 1_323_000
        }
    ));
}

#[test]
fn test_find_frame_by_time() {
    let built = FlacFixture::default().build();
    let position = find_frame(Cursor::new(built.bytes.clone()), 15_000, &ScanOptions::default())
        .unwrap();
    assert_eq!(position.sample, 161 * 4096);
    assert_eq!(position.byte_offset, built.frames[161].1);
}

#[test]
fn test_no_frames_is_unseekable() {
    let fixture = FlacFixture {
        seek_every: None,
        ..Default::default()
    };
    let built = fixture.build();
    let metadata_only = &built.bytes[..built.audio_start as usize];
    let file = parse(metadata_only);
    let err = file
        .seek_sample(Cursor::new(metadata_only.to_vec()), 1000)
        .unwrap_err();
    assert!(matches!(err, Error::UnseekableStream(_)));
}

#[test]
fn test_leading_id3_tag() {
    let fixture = FlacFixture {
        id3_prefix: true,
        ..Default::default()
    };
    let built = fixture.build();
    let result = scan(Cursor::new(built.bytes.clone()), &ScanOptions::default()).unwrap();
    assert_eq!(result.format, AudioFormat::Flac);
    assert_eq!(result.info["id3_version"].as_text(), Some("ID3v2.4.0"));
    assert_eq!(result.layout.audio_start_offset, built.audio_start);

    let file = parse(&built.bytes);
    let position = file.seek_sample(Cursor::new(built.bytes), 0).unwrap();
    assert_eq!(position.byte_offset, built.audio_start);
}

#[test]
fn test_missing_marker() {
    let mut bytes = FlacFixture::default().build().bytes;
    bytes[0] = b'X';
    let err = FlacFile::parse(Cursor::new(bytes), &ScanOptions::default()).unwrap_err();
    assert!(matches!(err, Error::MalformedContainer(_)));
}

#[test]
fn test_missing_streaminfo() {
    let mut bytes = b"fLaC".to_vec();
    bytes.extend_from_slice(&[0x81, 0, 0, 4, 0, 0, 0, 0]);
    let err = FlacFile::parse(Cursor::new(bytes), &ScanOptions::default()).unwrap_err();
    assert!(matches!(err, Error::MalformedContainer(_)));
}

#[test]
fn test_block_longer_than_file() {
    let mut bytes = b"fLaC".to_vec();
    bytes.extend_from_slice(&[0x80, 0, 0, 34]);
    bytes.extend_from_slice(&[0; 10]);
    let err = FlacFile::parse(Cursor::new(bytes), &ScanOptions::default()).unwrap_err();
    assert!(matches!(err, Error::MalformedContainer(_)));
}
