//! Bounds-checked forward reader over a seekable byte source.
//!
//! [`ByteCursor`] keeps a lookahead window that is refilled from the source in
//! fixed-size blocks. Every parser reads through it; no parser touches the
//! underlying reader directly.

use crate::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::io::{Read, Seek, SeekFrom};

/// Forward reader with a refillable lookahead window.
///
/// Invariant: the source is always positioned at `position + window.len()`.
pub struct ByteCursor<R> {
    source: R,
    window: BytesMut,
    block_size: usize,
    position: u64,
    size: u64,
}

impl<R: Read + Seek> ByteCursor<R> {
    /// Wrap a source, measuring its size and rewinding to the start.
    pub fn new(mut source: R, block_size: usize) -> Result<Self> {
        let size = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;
        Ok(Self {
            source,
            window: BytesMut::with_capacity(block_size.max(16)),
            block_size: block_size.max(16),
            position: 0,
            size,
        })
    }

    /// Total size of the source in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Absolute offset of the next unread byte.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes left between the current position and the end of the source.
    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.position)
    }

    /// Bytes currently held in the lookahead window.
    pub fn buffered(&self) -> usize {
        self.window.len()
    }

    /// Guarantee at least `n` bytes in the window.
    pub fn ensure(&mut self, n: usize) -> Result<()> {
        while self.window.len() < n {
            let source_pos = self.position + self.window.len() as u64;
            let left = self.size.saturating_sub(source_pos);
            let want = (n - self.window.len()).max(self.block_size) as u64;
            let want = want.min(left) as usize;
            if want == 0 {
                return Err(Error::TruncatedInput {
                    need: n,
                    have: self.window.len(),
                });
            }

            let start = self.window.len();
            self.window.resize(start + want, 0);
            let read = self.source.read(&mut self.window[start..])?;
            self.window.truncate(start + read);
            if read == 0 {
                return Err(Error::TruncatedInput {
                    need: n,
                    have: self.window.len(),
                });
            }
        }
        Ok(())
    }

    /// Like [`ensure`](Self::ensure) but fills as much as possible up to `n`.
    /// Returns the number of bytes available.
    pub fn fill_up_to(&mut self, n: usize) -> Result<usize> {
        let n = n.min(self.window.len().saturating_add(self.remaining_unbuffered() as usize));
        self.ensure(n)?;
        Ok(self.window.len())
    }

    fn remaining_unbuffered(&self) -> u64 {
        self.size
            .saturating_sub(self.position + self.window.len() as u64)
    }

    /// Borrow the next `n` bytes without consuming them.
    pub fn peek(&mut self, n: usize) -> Result<&[u8]> {
        self.ensure(n)?;
        Ok(&self.window[..n])
    }

    /// Borrow whatever is buffered without refilling.
    pub fn window(&self) -> &[u8] {
        &self.window
    }

    /// Consume and return the next `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<Bytes> {
        self.ensure(n)?;
        self.position += n as u64;
        Ok(self.window.split_to(n).freeze())
    }

    /// Advance past `n` buffered-or-refillable bytes.
    pub fn consume(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.window.advance(n);
        self.position += n as u64;
        Ok(())
    }

    /// Skip `n` bytes, seeking the source when the window does not cover them.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        if n <= self.window.len() as u64 {
            return self.consume(n as usize);
        }
        let target = self
            .position
            .checked_add(n)
            .filter(|t| *t <= self.size)
            .ok_or(Error::TruncatedInput {
                need: usize::try_from(n).unwrap_or(usize::MAX),
                have: usize::try_from(self.remaining()).unwrap_or(usize::MAX),
            })?;
        self.seek_to(target)
    }

    /// Reposition the cursor to an absolute offset.
    ///
    /// Stays inside the window when possible; otherwise discards it and seeks.
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        let window_end = self.position + self.window.len() as u64;
        if offset >= self.position && offset <= window_end {
            let delta = (offset - self.position) as usize;
            self.window.advance(delta);
            self.position = offset;
            return Ok(());
        }
        if offset > self.size {
            return Err(Error::TruncatedInput {
                need: usize::try_from(offset - self.size).unwrap_or(usize::MAX),
                have: 0,
            });
        }
        self.window.clear();
        self.source.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    /// Error unless `n` more bytes fit before `end`.
    pub fn ensure_within(&self, end: u64, n: u64) -> Result<()> {
        match self.position.checked_add(n) {
            Some(stop) if stop <= end => Ok(()),
            _ => Err(Error::malformed(format!(
                "read of {} bytes at {} crosses boundary {}",
                n, self.position, end
            ))),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        self.position += 1;
        Ok(self.window.get_u8())
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        self.ensure(2)?;
        self.position += 2;
        Ok(self.window.get_u16())
    }

    pub fn read_u24_be(&mut self) -> Result<u32> {
        self.ensure(3)?;
        self.position += 3;
        Ok(self.window.get_uint(3) as u32)
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        self.ensure(4)?;
        self.position += 4;
        Ok(self.window.get_u32())
    }

    pub fn read_u64_be(&mut self) -> Result<u64> {
        self.ensure(8)?;
        self.position += 8;
        Ok(self.window.get_u64())
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.ensure(4)?;
        self.position += 4;
        Ok(self.window.get_u32_le())
    }

    /// Peek a little-endian u32 without consuming it.
    pub fn peek_u32_le(&mut self) -> Result<u32> {
        let b = self.peek(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a four-character code.
    pub fn read_fourcc(&mut self) -> Result<[u8; 4]> {
        let b = self.peek(4)?;
        let code = [b[0], b[1], b[2], b[3]];
        self.consume(4)?;
        Ok(code)
    }
}
