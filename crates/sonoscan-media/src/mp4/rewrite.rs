//! Splice rewritten sample tables into the original header bytes.

use super::{BoxRecord, EncodedTables};
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// A box of the original header and the bytes that take its place.
pub type Replacement = (BoxRecord, Bytes);

/// Pair the seek track's four table boxes with their re-encoded bytes.
pub fn table_replacements(
    stts: BoxRecord,
    stsc: BoxRecord,
    stsz: BoxRecord,
    stco: BoxRecord,
    encoded: EncodedTables,
) -> Vec<Replacement> {
    vec![
        (stts, encoded.stts),
        (stsc, encoded.stsc),
        (stsz, encoded.stsz),
        (stco, encoded.stco),
    ]
}

/// Build the new header: every byte before the mdat payload, with the
/// replaced boxes swapped in and the sizes of their ancestors and of mdat
/// patched.
///
/// `original` holds bytes `[0, mdat payload offset)`. `ancestors` are the
/// boxes enclosing the resized tables (moov down to stbl); replacements
/// outside them must keep their size. `mdat_zero_size` is set when mdat
/// declared size 0 and must keep doing so. `remaining_data` is the number of
/// mdat payload bytes from the seek point to the end of mdat.
pub fn splice_header(
    original: &[u8],
    ancestors: &[BoxRecord],
    replacements: &[Replacement],
    mdat: &BoxRecord,
    mdat_zero_size: bool,
    remaining_data: u64,
) -> Result<Bytes> {
    let mut replacements: Vec<&Replacement> = replacements.iter().collect();
    replacements.sort_by_key(|(record, _)| record.offset());

    let mut delta: i64 = 0;
    let mut out = BytesMut::with_capacity(original.len() + 64);
    let mut pos = 0usize;
    for (record, bytes) in replacements {
        let start = record.offset() as usize;
        let end = record.end() as usize;
        if start < pos || end > original.len() {
            return Err(Error::unseekable(format!(
                "{} box lies outside the header",
                record.box_type
            )));
        }
        out.put_slice(&original[pos..start]);
        out.put_slice(bytes);
        delta += bytes.len() as i64 - record.size as i64;
        pos = end;
    }
    out.put_slice(&original[pos..]);

    for ancestor in ancestors {
        let new_size = ancestor
            .size
            .checked_add_signed(delta)
            .ok_or_else(|| Error::malformed("ancestor box size underflow"))?;
        patch_size(&mut out, ancestor, new_size)?;
    }

    if !mdat_zero_size {
        let new_mdat = BoxRecord {
            payload_offset: mdat
                .payload_offset
                .checked_add_signed(delta)
                .ok_or_else(|| Error::malformed("mdat moved before the file start"))?,
            ..*mdat
        };
        let new_size = mdat.header_size as u64 + remaining_data;
        patch_size(&mut out, &new_mdat, new_size)?;
    }

    Ok(out.freeze())
}

/// Overwrite a box's size field in place, keeping its header width.
fn patch_size(out: &mut BytesMut, record: &BoxRecord, new_size: u64) -> Result<()> {
    let at = record.offset() as usize;
    if record.has_large_size() {
        let field = out
            .get_mut(at + 8..at + 16)
            .ok_or_else(|| Error::malformed("box header beyond rewritten data"))?;
        field.copy_from_slice(&new_size.to_be_bytes());
    } else {
        let size = u32::try_from(new_size).map_err(|_| {
            Error::unseekable(format!(
                "{} grows beyond a 32-bit size field",
                record.box_type
            ))
        })?;
        let field = out
            .get_mut(at..at + 4)
            .ok_or_else(|| Error::malformed("box header beyond rewritten data"))?;
        field.copy_from_slice(&size.to_be_bytes());
    }
    Ok(())
}
