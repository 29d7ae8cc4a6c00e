use std::fmt;

pub const IPS_MAGIC: &[u8; 5] = b"PATCH";
/// Sentinel read in place of a record offset.
pub const IPS_EOF: &[u8; 3] = b"EOF";

pub const UPS_MAGIC: &[u8; 4] = b"UPS1";
/// Three CRC32 values (source, target, patch) close every UPS file.
pub const UPS_TRAILER_LEN: u64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchFormat {
    Ips,
    Ups,
}

impl PatchFormat {
    /// Formats in the order they are tried.
    pub const ALL: [PatchFormat; 2] = [PatchFormat::Ips, PatchFormat::Ups];

    pub fn extension(self) -> &'static str {
        match self {
            PatchFormat::Ips => "ips",
            PatchFormat::Ups => "ups",
        }
    }
}

impl fmt::Display for PatchFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchFormat::Ips => f.write_str("IPS"),
            PatchFormat::Ups => f.write_str("UPS"),
        }
    }
}

/// Header facts about a patch, read without applying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchInfo {
    Ips,
    Ups { base_size: u64, patched_size: u64 },
}

impl PatchInfo {
    pub fn format(&self) -> PatchFormat {
        match self {
            PatchInfo::Ips => PatchFormat::Ips,
            PatchInfo::Ups { .. } => PatchFormat::Ups,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSummary {
    pub format: PatchFormat,
    pub records: usize,
    pub bytes_written: u64,
    pub rom_size_before: usize,
    pub rom_size_after: usize,
}
