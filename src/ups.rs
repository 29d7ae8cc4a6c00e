//! UPS patches: varint header, XOR runs, CRC32 trailer.
//!
//! The trailer CRCs are not checked. A patch applied to the wrong base ROM
//! silently produces garbage.

use log::{debug, warn};
use std::io::{Read, Seek};

use crate::buffer::ByteStream;
use crate::error::{PatchError, Result};
use crate::patch_format::{PatchFormat, PatchSummary, UPS_MAGIC, UPS_TRAILER_LEN};
use crate::rom::RomImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsHeader {
    pub base_size: u64,
    pub patched_size: u64,
}

/// Decode a UPS variable-length integer.
///
/// Seven bits per byte, least significant group first. A byte with the high
/// bit set is the last one; every earlier byte also adds an implicit 1 to
/// the next group, so no value has two encodings.
pub fn read_varint<R: Read + Seek>(stream: &mut ByteStream<'_, R>) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let octet = stream.read_byte()?;
        let last = octet & 0x80 != 0;
        let group = if last { octet & 0x7f } else { octet | 0x80 };
        let part = shift_group(group, shift)?;
        result = result.checked_add(part).ok_or(PatchError::VarintOverflow)?;
        if last {
            return Ok(result);
        }
        shift += 7;
    }
}

/// `group << shift`, failing if any bit of `group` would be shifted out.
fn shift_group(group: u8, shift: u32) -> Result<u64> {
    let group = u64::from(group);
    group
        .checked_shl(shift)
        .filter(|part| part >> shift == group)
        .ok_or(PatchError::VarintOverflow)
}

/// Check the `UPS1` magic and read the two size fields.
pub(crate) fn read_header<R: Read + Seek>(stream: &mut ByteStream<'_, R>) -> Result<UpsHeader> {
    match stream.read_array::<4>() {
        Ok(magic) if &magic == UPS_MAGIC => {}
        Ok(_) | Err(PatchError::EndOfStream) => return Err(PatchError::InvalidPatch),
        Err(e) => return Err(e),
    }
    let base_size = read_varint(stream)?;
    let patched_size = read_varint(stream)?;
    Ok(UpsHeader {
        base_size,
        patched_size,
    })
}

/// Apply a UPS patch read from the current position of `source`.
///
/// When the target is larger than the base, the ROM grows to the next power
/// of two first. Partial writes are not undone on failure.
pub fn apply_ups<R: Read + Seek>(
    source: &mut R,
    rom: &mut RomImage,
    capacity: usize,
) -> Result<PatchSummary> {
    let mut stream = ByteStream::new(source, capacity)?;
    stream.prime()?;
    let header = read_header(&mut stream)?;
    debug!(
        "UPS: base size 0x{:X}, patched size 0x{:X}",
        header.base_size, header.patched_size
    );

    let rom_size_before = rom.len();
    if header.patched_size > header.base_size {
        let new_size = rom.grow_for_patch(header.base_size, header.patched_size)?;
        debug!("UPS: ROM resized from 0x{rom_size_before:X} to 0x{new_size:X}");
    }

    let rom_size = rom.len() as u64;
    let records_end = stream.source_len().saturating_sub(UPS_TRAILER_LEN);
    let mut offset = 0u64;
    let mut records = 0usize;
    let mut bytes_written = 0u64;

    while stream.position() < records_end {
        offset = offset.saturating_add(read_varint(&mut stream)?);
        records += 1;

        while offset < rom_size {
            let byte = stream.read_byte()?;
            if byte == 0x00 {
                offset += 1;
                break;
            }
            rom.xor_at(offset as usize, byte);
            offset += 1;
            bytes_written += 1;
        }
    }

    if stream.position() > records_end {
        warn!(
            "UPS: record data ran into the checksum trailer (stopped at 0x{:X}, source at 0x{:X})",
            stream.position(),
            stream.source_position()
        );
    }
    debug!("UPS: applied {records} records, {bytes_written} bytes");

    Ok(PatchSummary {
        format: PatchFormat::Ups,
        records,
        bytes_written,
        rom_size_before,
        rom_size_after: rom.len(),
    })
}
