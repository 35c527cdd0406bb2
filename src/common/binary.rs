// Little-endian decoding of fixed-size volume records
//
// Records (segment index points, map entries) arrive as whole byte slices;
// these helpers decode fields at a byte offset within a record.

use crate::error::{Aff4Error, Aff4Result};

// =============================================================================
// Field Decoders
// =============================================================================

/// Read u32 little-endian at `offset` within `buf`
pub fn u32_at(buf: &[u8], offset: usize) -> Aff4Result<u32> {
    field::<4>(buf, offset).map(u32::from_le_bytes)
}

/// Read i32 little-endian at `offset` within `buf`
pub fn i32_at(buf: &[u8], offset: usize) -> Aff4Result<i32> {
    field::<4>(buf, offset).map(i32::from_le_bytes)
}

/// Read u64 little-endian at `offset` within `buf`
pub fn u64_at(buf: &[u8], offset: usize) -> Aff4Result<u64> {
    field::<8>(buf, offset).map(u64::from_le_bytes)
}

fn field<const N: usize>(buf: &[u8], offset: usize) -> Aff4Result<[u8; N]> {
    buf.get(offset..offset + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| {
            Aff4Error::Format(format!(
                "Record too short: need {} bytes at offset {}, have {}",
                N,
                offset,
                buf.len()
            ))
        })
}

// =============================================================================
// Record Iteration
// =============================================================================

/// Split `buf` into whole `size`-byte records; a trailing partial record is ignored
pub fn records(buf: &[u8], size: usize) -> impl Iterator<Item = &[u8]> {
    buf.chunks_exact(size)
}
