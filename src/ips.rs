use log::{debug, warn};
use std::io::{Read, Seek};

use crate::buffer::ByteStream;
use crate::error::{PatchError, Result};
use crate::patch_format::{PatchFormat, PatchSummary, IPS_EOF, IPS_MAGIC};
use crate::rom::RomImage;

/// Check for the `PATCH` magic. A stream too short to hold it is not IPS.
pub(crate) fn expect_magic<R: Read + Seek>(stream: &mut ByteStream<'_, R>) -> Result<()> {
    match stream.read_array::<5>() {
        Ok(magic) if &magic == IPS_MAGIC => Ok(()),
        Ok(_) | Err(PatchError::EndOfStream) => Err(PatchError::InvalidPatch),
        Err(e) => Err(e),
    }
}

/// Apply an IPS patch read from the current position of `source`.
///
/// Records are written where they say; IPS carries no target size, so the
/// logical ROM size never changes here. Offsets are not checked against the
/// ROM size: writes beyond it land in the unused part of the ROM region.
pub fn apply_ips<R: Read + Seek>(
    source: &mut R,
    rom: &mut RomImage,
    capacity: usize,
) -> Result<PatchSummary> {
    let mut stream = ByteStream::new(source, capacity)?;
    stream.prime()?;
    expect_magic(&mut stream)?;

    let rom_size = rom.len();
    let mut records = 0usize;
    let mut bytes_written = 0u64;

    loop {
        let raw_offset = stream.read_array::<3>()?;
        if &raw_offset == IPS_EOF {
            break;
        }
        let offset = u64::from(u32::from_be_bytes([0, raw_offset[0], raw_offset[1], raw_offset[2]]));
        let length = u16::from_be_bytes(stream.read_array::<2>()?);

        let written = if length == 0 {
            let run = u16::from_be_bytes(stream.read_array::<2>()?) as usize;
            let value = stream.read_byte()?;
            rom.fill(offset, run, value)?;
            run
        } else {
            let dst = rom.region_mut(offset, length as usize)?;
            stream.read_into(dst)?;
            length as usize
        };

        if offset + written as u64 > rom_size as u64 {
            warn!(
                "IPS record at 0x{offset:06X} ({written} bytes) reaches past the ROM size 0x{rom_size:X}"
            );
        }
        records += 1;
        bytes_written += written as u64;
    }

    debug!("IPS: applied {records} records, {bytes_written} bytes");

    Ok(PatchSummary {
        format: PatchFormat::Ips,
        records,
        bytes_written,
        rom_size_before: rom_size,
        rom_size_after: rom.len(),
    })
}
