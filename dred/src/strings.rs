//! Reading NUL-terminated strings out of process memory.

use encoding_rs::{UTF_16BE, UTF_16LE};
use scroll::Endian;

use crate::provider::{MemoryProvider, ProviderError};

/// Strings longer than this many code units are cut off.
pub const MAX_STRING_LENGTH: usize = 4096;

/// How many code units to ask the provider for at once.
const CHUNK_UNITS: usize = 64;

/// Read code units of `unit` bytes starting at `address` until a NUL unit.
///
/// A chunk that can't be read is retried one unit at a time, so a string that ends right
/// before the end of a mapped region still reads.
fn read_terminated<P: MemoryProvider + ?Sized>(
    provider: &P,
    address: u64,
    unit: usize,
) -> Result<Vec<u8>, ProviderError> {
    let mut out = Vec::new();
    let mut cursor = address;
    while out.len() < MAX_STRING_LENGTH * unit {
        let chunk = match provider.read_bytes(cursor, CHUNK_UNITS * unit) {
            Ok(chunk) => chunk,
            Err(_) => provider.read_bytes(cursor, unit)?,
        };
        for code_unit in chunk.chunks_exact(unit) {
            if code_unit.iter().all(|&b| b == 0) || out.len() >= MAX_STRING_LENGTH * unit {
                return Ok(out);
            }
            out.extend_from_slice(code_unit);
        }
        cursor = cursor.wrapping_add(chunk.len() as u64);
    }
    Ok(out)
}

/// Read a NUL-terminated narrow string at `address`.
///
/// Invalid UTF-8 is replaced, the driver does not promise any particular code page.
pub fn read_narrow_string<P: MemoryProvider + ?Sized>(
    provider: &P,
    address: u64,
) -> Result<String, ProviderError> {
    let bytes = read_terminated(provider, address, 1)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read a NUL-terminated UTF-16 string at `address`.
pub fn read_wide_string<P: MemoryProvider + ?Sized>(
    provider: &P,
    address: u64,
    endian: Endian,
) -> Result<String, ProviderError> {
    let bytes = read_terminated(provider, address, 2)?;
    let encoding = match endian {
        Endian::Little => UTF_16LE,
        Endian::Big => UTF_16BE,
    };
    let (s, _had_errors) = encoding.decode_without_bom_handling(&bytes);
    Ok(s.into_owned())
}
