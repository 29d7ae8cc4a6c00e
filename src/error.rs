use std::io;
use thiserror::Error;

/// Result alias for the patch engine.
pub type Result<T> = std::result::Result<T, PatchError>;

#[derive(Debug, Error)]
pub enum PatchError {
    /// Magic mismatch. Recoverable: the dispatcher moves on to the next format.
    #[error("not a valid patch for this format")]
    InvalidPatch,

    #[error("out of memory while allocating patch buffers")]
    OutOfMemory,

    /// The patch ended in the middle of a record.
    #[error("unexpected end of patch stream")]
    EndOfStream,

    #[error("patched size 0x{patched_size:X} rounds up to 0x{rounded_size:X}, above the ROM ceiling")]
    PatchTooLarge { patched_size: u64, rounded_size: u64 },

    #[error("ROM image of {size} bytes exceeds the ROM ceiling")]
    RomTooLarge { size: u64 },

    #[error("variable-length integer does not fit in 64 bits")]
    VarintOverflow,

    #[error("write of {len} bytes at offset 0x{offset:X} falls outside the ROM region")]
    OutOfBounds { offset: u64, len: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PatchError {
    /// True for the "try the next format" class of failures.
    pub fn is_invalid_patch(&self) -> bool {
        matches!(self, PatchError::InvalidPatch)
    }
}

impl From<std::collections::TryReserveError> for PatchError {
    fn from(_: std::collections::TryReserveError) -> Self {
        PatchError::OutOfMemory
    }
}
