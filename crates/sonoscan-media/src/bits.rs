//! Bit-level helpers: FLAC CRC-8, FLAC "UTF-8" coded integers, and MPEG-4
//! descriptor lengths.

use bytes::Buf;

/// CRC-8 lookup table, polynomial x^8 + x^2 + x + 1 (0x07).
static CRC8_TABLE: [u8; 256] = build_crc8_table();

const fn build_crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-8 as used by FLAC frame headers.
pub fn crc8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, &byte| CRC8_TABLE[(crc ^ byte) as usize])
}

/// Decode a FLAC UTF-8 style coded number of up to 36 bits.
///
/// Returns the value and the number of bytes it occupied, or `None` when the
/// lead byte is invalid, a continuation byte is malformed, or `raw` is short.
pub fn read_utf8_u64(raw: &[u8]) -> Option<(u64, usize)> {
    let lead = *raw.first()?;
    let (mut value, len) = match lead {
        b if b & 0x80 == 0 => (u64::from(b), 1),
        b if b & 0xE0 == 0xC0 => (u64::from(b & 0x1F), 2),
        b if b & 0xF0 == 0xE0 => (u64::from(b & 0x0F), 3),
        b if b & 0xF8 == 0xF0 => (u64::from(b & 0x07), 4),
        b if b & 0xFC == 0xF8 => (u64::from(b & 0x03), 5),
        b if b & 0xFE == 0xFC => (u64::from(b & 0x01), 6),
        0xFE => (0, 7),
        _ => return None,
    };

    let tail = raw.get(1..len)?;
    for &byte in tail {
        if byte & 0xC0 != 0x80 {
            return None;
        }
        value = (value << 6) | u64::from(byte & 0x3F);
    }
    Some((value, len))
}

/// Decode a FLAC UTF-8 style coded number of up to 31 bits (frame numbers).
pub fn read_utf8_u32(raw: &[u8]) -> Option<(u32, usize)> {
    if raw.first() == Some(&0xFE) {
        return None;
    }
    let (value, len) = read_utf8_u64(raw)?;
    Some((u32::try_from(value).ok()?, len))
}

/// Decode an MPEG-4 descriptor length: up to four bytes of seven bits each,
/// high bit set on every byte but the last.
pub fn read_descriptor_length<B: Buf>(buf: &mut B) -> Option<u32> {
    let mut length = 0u32;
    for _ in 0..4 {
        if !buf.has_remaining() {
            return None;
        }
        let byte = buf.get_u8();
        length = (length << 7) | u32::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            break;
        }
    }
    Some(length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc8_table_known_entries() {
        assert_eq!(CRC8_TABLE[0], 0x00);
        assert_eq!(CRC8_TABLE[1], 0x07);
        assert_eq!(CRC8_TABLE[255], 0xF3);
    }

    #[test]
    fn test_crc8_check_value() {
        // CRC-8/SMBUS check value for "123456789".
        assert_eq!(crc8(b"123456789"), 0xF4);
    }

    #[test]
    fn test_utf8_single_and_multi_byte() {
        assert_eq!(read_utf8_u64(&[0x05]), Some((5, 1)));
        assert_eq!(read_utf8_u64(&[0xC2, 0x80]), Some((0x80, 2)));
        assert_eq!(read_utf8_u64(&[0xE0, 0xA0, 0x80]), Some((0x800, 3)));
        // 7-byte form carries 36 bits
        let raw = [0xFE, 0xBF, 0xBF, 0xBF, 0xBF, 0xBF, 0xBF];
        assert_eq!(read_utf8_u64(&raw), Some(((1u64 << 36) - 1, 7)));
    }

    #[test]
    fn test_utf8_rejects_bad_continuation() {
        assert_eq!(read_utf8_u64(&[0xC2, 0x41]), None);
        assert_eq!(read_utf8_u64(&[0xFF]), None);
        assert_eq!(read_utf8_u64(&[0xE0, 0xA0]), None);
    }

    #[test]
    fn test_utf8_u32_rejects_seven_byte_form() {
        let raw = [0xFE, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80];
        assert_eq!(read_utf8_u32(&raw), None);
        assert_eq!(read_utf8_u32(&[0x7F]), Some((0x7F, 1)));
    }

    #[test]
    fn test_descriptor_length() {
        let mut one: &[u8] = &[0x19];
        assert_eq!(read_descriptor_length(&mut one), Some(0x19));

        let mut padded: &[u8] = &[0x80, 0x80, 0x80, 0x22, 0xAA];
        assert_eq!(read_descriptor_length(&mut padded), Some(0x22));
        assert_eq!(padded, &[0xAA]);

        let mut short: &[u8] = &[0x81];
        assert_eq!(read_descriptor_length(&mut short), None);
    }
}
