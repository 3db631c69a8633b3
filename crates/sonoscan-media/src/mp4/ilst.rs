//! iTunes-style metadata item decoding (`moov/udta/meta/ilst`).

use super::BoxType;
use bytes::{Buf, Bytes};
use sonoscan_common::TagValue;

const TYPE_IMPLICIT: u32 = 0;
const TYPE_UTF8: u32 = 1;
const TYPE_UTF16: u32 = 2;
const TYPE_JPEG: u32 = 13;
const TYPE_PNG: u32 = 14;
const TYPE_SIGNED_INT: u32 = 21;
const TYPE_UNSIGNED_INT: u32 = 22;
const TYPE_BMP: u32 = 27;

/// Tag key for an item box: the copyright-sign prefix dropped, upper-cased.
pub fn item_key(item: BoxType) -> String {
    let code = match item.0 {
        [0xA9, rest @ ..] => String::from_utf8_lossy(&rest).into_owned(),
        code => String::from_utf8_lossy(&code).into_owned(),
    };
    code.to_uppercase()
}

/// Decode a `data` box payload for the given item.
///
/// Returns `None` for empty values and for artwork when artwork is excluded.
pub fn decode_data(item: BoxType, mut payload: Bytes, include_artwork: bool) -> Option<TagValue> {
    if payload.remaining() < 8 {
        return None;
    }
    let type_code = payload.get_u32() & 0x00FF_FFFF;
    payload.advance(4); // locale

    match (&item.0, type_code) {
        (b"trkn" | b"disk", _) => decode_pair(&payload),
        (b"covr", _) | (_, TYPE_JPEG | TYPE_PNG | TYPE_BMP) => {
            include_artwork.then(|| TagValue::Binary(payload.to_vec()))
        }
        (_, TYPE_UTF8) => text(&payload),
        (_, TYPE_UTF16) => utf16(&payload),
        (_, TYPE_SIGNED_INT | TYPE_UNSIGNED_INT) => {
            decode_integer(&payload, type_code == TYPE_SIGNED_INT)
        }
        (b"gnre", TYPE_IMPLICIT) => decode_integer(&payload, false),
        (_, TYPE_IMPLICIT) if matches!(payload.len(), 1 | 2 | 4 | 8) => {
            decode_integer(&payload, false)
        }
        _ => (!payload.is_empty()).then(|| TagValue::Binary(payload.to_vec())),
    }
}

/// Decode the UTF-8 payload of a freeform `name` box (after version/flags).
pub fn decode_name(mut payload: Bytes) -> Option<String> {
    if payload.remaining() < 4 {
        return None;
    }
    payload.advance(4);
    let name = String::from_utf8_lossy(&payload).into_owned();
    (!name.is_empty()).then_some(name)
}

fn text(raw: &[u8]) -> Option<TagValue> {
    let s = String::from_utf8_lossy(raw);
    let s = s.trim_end_matches('\0');
    (!s.is_empty()).then(|| TagValue::Text(s.to_string()))
}

fn utf16(raw: &[u8]) -> Option<TagValue> {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    let s = String::from_utf16_lossy(&units);
    let s = s.trim_end_matches('\0');
    (!s.is_empty()).then(|| TagValue::Text(s.to_string()))
}

fn decode_integer(raw: &[u8], signed: bool) -> Option<TagValue> {
    let value = match (raw.len(), signed) {
        (1, true) => raw[0] as i8 as i64,
        (1, false) => raw[0] as i64,
        (2, true) => i16::from_be_bytes([raw[0], raw[1]]) as i64,
        (2, false) => u16::from_be_bytes([raw[0], raw[1]]) as i64,
        (3, _) => ((raw[0] as i64) << 16) | ((raw[1] as i64) << 8) | raw[2] as i64,
        (4, true) => i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64,
        (4, false) => u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64,
        (8, _) => i64::from_be_bytes([
            raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
        ]),
        _ => return None,
    };
    Some(TagValue::Integer(value))
}

/// `trkn`/`disk`: 2 reserved bytes, number, total. Rendered as "n/m".
fn decode_pair(raw: &[u8]) -> Option<TagValue> {
    if raw.len() < 4 {
        return None;
    }
    let number = u16::from_be_bytes([raw[2], raw[3]]);
    let total = raw
        .get(4..6)
        .map(|t| u16::from_be_bytes([t[0], t[1]]))
        .unwrap_or(0);
    let value = if total > 0 {
        format!("{}/{}", number, total)
    } else {
        number.to_string()
    };
    Some(TagValue::Text(value))
}
