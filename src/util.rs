use anyhow::{Context, Result};
use memmap2::Mmap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::patch_format::PatchFormat;

/// A ROM found on disk together with the patch sitting next to it.
#[derive(Debug, Clone)]
pub struct RomEntry {
    pub rom_path: PathBuf,
    pub patch_path: PathBuf,
}

/// Map a ROM file read-only so it can be copied into a `RomImage`.
///
/// # Safety
/// Patching in place rewrites the ROM file, so the map must be dropped
/// before the output is written.
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    // SAFETY: read-only map, copied out and dropped before any write to the same path.
    unsafe {
        Mmap::map(&file)
            .with_context(|| format!("Failed to memory-map file: {}", path.display()))
    }
}

/// BLAKE3 digest of the patched image, printed after a successful apply.
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// The patch that belongs to `rom`: same stem, `.ips` preferred over `.ups`.
pub fn find_sibling_patch(rom: &Path) -> Option<PathBuf> {
    PatchFormat::ALL
        .iter()
        .map(|format| rom.with_extension(format.extension()))
        .find(|candidate| candidate.is_file())
}

/// `game.gba` -> `game.patched.gba`
pub fn default_output_path(rom: &Path) -> PathBuf {
    let stem = rom
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match rom.extension() {
        Some(ext) => format!("{stem}.patched.{}", ext.to_string_lossy()),
        None => format!("{stem}.patched"),
    };
    rom.with_file_name(name)
}

/// Walk `root` for files with `extension` that have a sibling patch.
/// Files already named `*.patched.<ext>` are outputs of an earlier run and are skipped.
pub fn scan_roms(root: &Path, extension: &str) -> Result<Vec<RomEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to read directory entry in {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        let is_output = path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s.ends_with(".patched"));
        if !matches_ext || is_output {
            continue;
        }

        if let Some(patch_path) = find_sibling_patch(path) {
            entries.push(RomEntry {
                rom_path: path.to_path_buf(),
                patch_path,
            });
        }
    }

    Ok(entries)
}
