//! In-memory ROM image.
//!
//! The image models a fixed ROM region of `MAX_ROM_SIZE` bytes of which the
//! first `len()` are the logical ROM. Writes past the logical size but inside
//! the region are kept in the backing store (zero-filled on demand) and are
//! not part of [`RomImage::as_slice`] until a resize covers them.

use crate::error::{PatchError, Result};

/// Ceiling for the logical ROM size (32 MiB).
pub const MAX_ROM_SIZE: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RomImage {
    data: Vec<u8>,
    size: usize,
}

impl RomImage {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.len() > MAX_ROM_SIZE {
            return Err(PatchError::RomTooLarge {
                size: data.len() as u64,
            });
        }
        let size = data.len();
        Ok(Self { data, size })
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// Make sure the backing store covers `[0, end)`.
    fn ensure_backing(&mut self, offset: u64, len: u64) -> Result<usize> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= MAX_ROM_SIZE as u64)
            .ok_or(PatchError::OutOfBounds { offset, len })? as usize;
        if end > self.data.len() {
            self.data.try_reserve(end - self.data.len())?;
            self.data.resize(end, 0);
        }
        Ok(end)
    }

    /// Mutable view of `len` bytes at `offset`, which may lie past the
    /// logical size.
    pub fn region_mut(&mut self, offset: u64, len: usize) -> Result<&mut [u8]> {
        let end = self.ensure_backing(offset, len as u64)?;
        Ok(&mut self.data[offset as usize..end])
    }

    pub fn fill(&mut self, offset: u64, len: usize, value: u8) -> Result<()> {
        self.region_mut(offset, len)?.fill(value);
        Ok(())
    }

    /// XOR `byte` into the ROM at `offset`. Callers keep `offset < len()`.
    pub fn xor_at(&mut self, offset: usize, byte: u8) {
        self.data[offset] ^= byte;
    }

    /// Resize for a UPS patch whose target is larger than its source.
    ///
    /// The new logical size is the next power of two at or above
    /// `patched_size`. `[base_size, new_size)` is filled with `0xFF`, then
    /// `[base_size, patched_size)` is zeroed. Nothing changes if the rounded
    /// size is over the ceiling.
    pub fn grow_for_patch(&mut self, base_size: u64, patched_size: u64) -> Result<usize> {
        let rounded = patched_size
            .checked_next_power_of_two()
            .unwrap_or(u64::MAX);
        if rounded > MAX_ROM_SIZE as u64 {
            return Err(PatchError::PatchTooLarge {
                patched_size,
                rounded_size: rounded,
            });
        }

        let new_size = rounded as usize;
        if base_size < rounded {
            self.fill(base_size, (rounded - base_size) as usize, 0xFF)?;
            self.fill(base_size, (patched_size - base_size) as usize, 0x00)?;
        }
        self.ensure_backing(0, rounded)?;
        self.size = new_size;
        Ok(new_size)
    }
}
