//! Container sniffing from leading bytes.

use crate::aac::is_adts_sync;
use crate::cursor::ByteCursor;
use crate::id3::{Id3Header, ID3_HEADER_SIZE};
use crate::Result;
use sonoscan_common::AudioFormat;
use std::io::{Read, Seek};

/// Box types that may open an MP4 file.
const MP4_LEADING_BOXES: [&[u8; 4]; 6] = [b"ftyp", b"moov", b"mdat", b"free", b"skip", b"wide"];

const SNIFF_SIZE: usize = 12;

/// Classify a stream by its first bytes.
pub fn sniff_bytes(head: &[u8]) -> Option<AudioFormat> {
    if head.len() >= 8 && MP4_LEADING_BOXES.iter().any(|code| &head[4..8] == *code) {
        return Some(AudioFormat::Mp4);
    }
    if head.starts_with(b"fLaC") {
        return Some(AudioFormat::Flac);
    }
    if head.starts_with(b"OggS") {
        return Some(AudioFormat::Ogg);
    }
    if is_adts_sync(head) {
        return Some(AudioFormat::Aac);
    }
    None
}

/// Classify a seekable stream, looking past a leading ID3v2 tag.
///
/// Only FLAC and ADTS are recognised behind an ID3v2 tag.
pub fn sniff_format<R: Read + Seek>(reader: &mut R) -> Result<Option<AudioFormat>> {
    let mut cursor = ByteCursor::new(&mut *reader, 64)?;
    let avail = cursor.fill_up_to(SNIFF_SIZE)?;
    let head = &cursor.window()[..avail];

    let Some(id3) = Id3Header::detect(head) else {
        return Ok(sniff_bytes(head));
    };
    if avail < ID3_HEADER_SIZE || id3.total_size() >= cursor.size() {
        return Ok(None);
    }
    cursor.seek_to(id3.total_size())?;
    let avail = cursor.fill_up_to(SNIFF_SIZE)?;
    Ok(sniff_bytes(&cursor.window()[..avail])
        .filter(|format| matches!(format, AudioFormat::Flac | AudioFormat::Aac)))
}
