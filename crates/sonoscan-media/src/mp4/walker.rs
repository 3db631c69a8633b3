//! Recursive descent over nested, length-prefixed MP4 boxes.

use super::{BoxRecord, BoxType};
use crate::cursor::ByteCursor;
use crate::{Error, Result};
use std::io::{Read, Seek};
use tracing::trace;

/// What the walker should do after a visitor has seen a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Walk the children, which start this many bytes into the payload.
    Descend(u64),
    /// Advance past the payload without reading it.
    Skip,
    /// The visitor read (part of) the payload itself.
    Consumed,
}

/// Callback invoked for every box the walker reaches.
pub trait BoxVisitor {
    fn visit<R: Read + Seek>(
        &mut self,
        cursor: &mut ByteCursor<R>,
        record: &BoxRecord,
        depth: usize,
    ) -> Result<Visit>;

    /// Called after all children of a descended box have been walked.
    fn leave(&mut self, _record: &BoxRecord) -> Result<()> {
        Ok(())
    }
}

/// Box tree walker with a nesting cap.
#[derive(Debug, Clone, Copy)]
pub struct BoxWalker {
    max_depth: usize,
}

impl BoxWalker {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
        }
    }

    /// Walk every box in `[start, end)`.
    pub fn walk<R, V>(
        &self,
        cursor: &mut ByteCursor<R>,
        start: u64,
        end: u64,
        visitor: &mut V,
    ) -> Result<()>
    where
        R: Read + Seek,
        V: BoxVisitor,
    {
        self.walk_level(cursor, start, end, 0, visitor)
    }

    fn walk_level<R, V>(
        &self,
        cursor: &mut ByteCursor<R>,
        start: u64,
        end: u64,
        depth: usize,
        visitor: &mut V,
    ) -> Result<()>
    where
        R: Read + Seek,
        V: BoxVisitor,
    {
        if depth >= self.max_depth {
            return Err(Error::malformed(format!(
                "box nesting deeper than {} levels at offset {}",
                self.max_depth, start
            )));
        }

        let mut pos = start;
        while pos < end {
            if end - pos < 8 {
                // udta lists are often closed by a 4-byte zero terminator
                trace!(offset = pos, bytes = end - pos, "Ignoring trailing container bytes");
                break;
            }

            let record = read_box_header(cursor, pos, end)?;
            match visitor.visit(cursor, &record, depth)? {
                Visit::Descend(skip) => {
                    if skip > record.payload_size() {
                        return Err(Error::malformed(format!(
                            "{} children start past its payload",
                            record.box_type
                        )));
                    }
                    self.walk_level(
                        cursor,
                        record.payload_offset + skip,
                        record.end(),
                        depth + 1,
                        visitor,
                    )?;
                    visitor.leave(&record)?;
                }
                Visit::Skip => {
                    trace!(box_type = %record.box_type, size = record.size, "Skipping box");
                }
                Visit::Consumed => {
                    if cursor.position() > record.end() {
                        return Err(Error::malformed(format!(
                            "decoder for {} read past the end of the box",
                            record.box_type
                        )));
                    }
                }
            }

            pos = record.end();
        }

        Ok(())
    }
}

/// Read and validate one box header at `pos`, bounded by the container `end`.
pub fn read_box_header<R: Read + Seek>(
    cursor: &mut ByteCursor<R>,
    pos: u64,
    end: u64,
) -> Result<BoxRecord> {
    cursor.seek_to(pos)?;
    cursor.ensure_within(end, 8)?;

    let size32 = cursor.read_u32_be()?;
    let box_type = BoxType(cursor.read_fourcc()?);
    let mut header_size = 8u8;

    let size = match size32 {
        0 => end - pos,
        1 => {
            cursor.ensure_within(end, 8)?;
            header_size = 16;
            cursor.read_u64_be()?
        }
        n => n as u64,
    };

    if box_type == BoxType::UUID {
        cursor.ensure_within(end, 16)?;
        cursor.consume(16)?;
        header_size += 16;
    }

    if size < header_size as u64 {
        return Err(Error::malformed(format!(
            "{} at offset {} declares size {} below its {}-byte header",
            box_type, pos, size, header_size
        )));
    }
    match pos.checked_add(size) {
        Some(box_end) if box_end <= end => {}
        _ => {
            return Err(Error::malformed(format!(
                "{} at offset {} with size {} overruns its container ending at {}",
                box_type, pos, size, end
            )));
        }
    }

    Ok(BoxRecord {
        box_type,
        size,
        payload_offset: pos + header_size as u64,
        header_size,
    })
}
