//! Fixed-capacity read buffer over a seekable patch source.
//!
//! The buffer refills eagerly: as soon as the last buffered byte is handed
//! out, the next chunk is pulled from the source. The source position is
//! therefore ahead of the read cursor by up to one buffer's worth, except
//! once the source is exhausted.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{PatchError, Result};

/// Reader capacity used when the caller does not pick one.
pub const DEFAULT_BUFFER_CAPACITY: usize = 512;

pub struct ByteStream<'a, R> {
    source: &'a mut R,
    buf: Vec<u8>,
    /// Number of valid bytes in `buf`.
    fill: usize,
    cursor: usize,
    source_len: u64,
    source_pos: u64,
}

impl<'a, R: Read + Seek> ByteStream<'a, R> {
    /// Allocate a zeroed buffer of `capacity` bytes over `source`, starting
    /// at the source's current position. Call [`prime`](Self::prime) before
    /// the first read.
    pub fn new(source: &'a mut R, capacity: usize) -> Result<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)?;
        buf.resize(capacity, 0);

        let source_pos = source.stream_position()?;
        let source_len = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(source_pos))?;

        Ok(Self {
            source,
            buf,
            fill: 0,
            cursor: 0,
            source_len,
            source_pos,
        })
    }

    /// First fill of the buffer.
    pub fn prime(&mut self) -> Result<()> {
        self.refill()
    }

    fn refill(&mut self) -> Result<()> {
        let remaining = self.source_len.saturating_sub(self.source_pos);
        let want = usize::try_from(remaining).map_or(self.buf.len(), |r| r.min(self.buf.len()));
        self.source.read_exact(&mut self.buf[..want])?;
        self.source_pos += want as u64;
        self.fill = want;
        self.cursor = 0;
        Ok(())
    }

    /// Next byte of the stream, refilling from the source when the buffer
    /// runs dry.
    pub fn read_byte(&mut self) -> Result<u8> {
        if self.cursor >= self.fill {
            return Err(PatchError::EndOfStream);
        }
        let byte = self.buf[self.cursor];
        self.cursor += 1;
        if self.cursor >= self.fill {
            self.refill()?;
        }
        Ok(byte)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        self.read_into(&mut out)?;
        Ok(out)
    }

    /// Fill `dst` byte by byte. On failure, bytes already copied stay in `dst`.
    pub fn read_into(&mut self, dst: &mut [u8]) -> Result<()> {
        for slot in dst.iter_mut() {
            *slot = self.read_byte()?;
        }
        Ok(())
    }

    /// Offset in the source of the next byte `read_byte` will return.
    pub fn position(&self) -> u64 {
        self.source_pos - (self.fill - self.cursor) as u64
    }

    /// Raw position of the underlying source, ahead of [`position`](Self::position)
    /// by whatever is still buffered.
    pub fn source_position(&self) -> u64 {
        self.source_pos
    }

    pub fn source_len(&self) -> u64 {
        self.source_len
    }
}
