use anyhow::{Context, Result};
use log::{info, warn};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::buffer::{ByteStream, DEFAULT_BUFFER_CAPACITY};
use crate::error::PatchError;
use crate::ips;
use crate::patch_format::{PatchInfo, PatchSummary};
use crate::rom::RomImage;
use crate::ups;
use crate::util;

#[derive(Debug, Clone, Copy)]
pub struct PatchOptions {
    /// Capacity of the patch reader's buffer.
    pub buffer_capacity: usize,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Apply whichever supported patch `source` holds.
///
/// IPS is tried first, then UPS, each from offset 0. `InvalidPatch` from
/// both means no patch applied and the ROM is untouched. A UPS patch too
/// large for the ROM ceiling is also reported as `InvalidPatch`. Any other
/// error is fatal and the ROM may be partially written.
pub fn apply_patch<R: Read + Seek>(
    source: &mut R,
    rom: &mut RomImage,
    options: &PatchOptions,
) -> crate::error::Result<PatchSummary> {
    source.seek(SeekFrom::Start(0))?;
    match ips::apply_ips(source, rom, options.buffer_capacity) {
        Err(e) if e.is_invalid_patch() => {}
        other => return other,
    }

    source.seek(SeekFrom::Start(0))?;
    match ups::apply_ups(source, rom, options.buffer_capacity) {
        Err(PatchError::PatchTooLarge {
            patched_size,
            rounded_size,
        }) => {
            warn!(
                "UPS target of 0x{patched_size:X} bytes needs 0x{rounded_size:X}, over the ROM ceiling; skipping"
            );
            Err(PatchError::InvalidPatch)
        }
        other => other,
    }
}

/// Identify the patch format from its header without touching any ROM.
pub fn detect_patch<R: Read + Seek>(
    source: &mut R,
    options: &PatchOptions,
) -> crate::error::Result<PatchInfo> {
    source.seek(SeekFrom::Start(0))?;
    {
        let mut stream = ByteStream::new(source, options.buffer_capacity)?;
        stream.prime()?;
        match ips::expect_magic(&mut stream) {
            Ok(()) => return Ok(PatchInfo::Ips),
            Err(e) if e.is_invalid_patch() => {}
            Err(e) => return Err(e),
        }
    }

    source.seek(SeekFrom::Start(0))?;
    let mut stream = ByteStream::new(source, options.buffer_capacity)?;
    stream.prime()?;
    let header = ups::read_header(&mut stream)?;
    Ok(PatchInfo::Ups {
        base_size: header.base_size,
        patched_size: header.patched_size,
    })
}

pub enum ApplyOutcome {
    Patched {
        summary: PatchSummary,
        output: PathBuf,
        hash: [u8; 32],
    },
    /// Neither format matched; nothing was written.
    Skipped,
}

/// Patch the ROM at `rom_path` with `patch_path` and write the result to
/// `output`. The engine runs on the blocking pool.
pub async fn apply_patch_file(
    rom_path: &Path,
    patch_path: &Path,
    output: &Path,
    options: PatchOptions,
) -> Result<ApplyOutcome> {
    let rom_path = rom_path.to_path_buf();
    let patch_path = patch_path.to_path_buf();
    let output = output.to_path_buf();

    tokio::task::spawn_blocking(move || apply_patch_file_blocking(&rom_path, &patch_path, &output, &options))
        .await
        .context("Patch task panicked")?
}

fn apply_patch_file_blocking(
    rom_path: &Path,
    patch_path: &Path,
    output: &Path,
    options: &PatchOptions,
) -> Result<ApplyOutcome> {
    // Scope the mmap so it is dropped before the output (possibly the same file) is written.
    let mut rom = {
        let mapped = util::mmap_file(rom_path)?;
        RomImage::from_bytes(mapped.to_vec())
            .with_context(|| format!("Failed to load ROM: {}", rom_path.display()))?
    };

    let mut patch = std::fs::File::open(patch_path)
        .with_context(|| format!("Failed to open patch: {}", patch_path.display()))?;

    let summary = match apply_patch(&mut patch, &mut rom, options) {
        Ok(summary) => summary,
        Err(e) if e.is_invalid_patch() => {
            warn!("Patch is not valid, skipping: {}", patch_path.display());
            return Ok(ApplyOutcome::Skipped);
        }
        Err(e) => {
            return Err(anyhow::Error::from(e)).with_context(|| {
                format!(
                    "Failed to apply {} to {}",
                    patch_path.display(),
                    rom_path.display()
                )
            })
        }
    };
    info!(
        "{} patch applied: {} records, ROM 0x{:X} -> 0x{:X} bytes",
        summary.format, summary.records, summary.rom_size_before, summary.rom_size_after
    );

    let hash = util::hash_bytes(rom.as_slice());
    std::fs::write(output, rom.as_slice())
        .with_context(|| format!("Failed to write patched ROM: {}", output.display()))?;

    Ok(ApplyOutcome::Patched {
        summary,
        output: output.to_path_buf(),
        hash,
    })
}
