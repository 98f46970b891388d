//! Bounds-checked little-endian reads for the hand-rolled format parsers.
//!
//! The pipeline only accepts little-endian inputs, so unlike a general
//! binary reader there is no endianness parameter.

use crate::error::{FlatbinError, Result};

fn truncated(offset: usize, needed: usize) -> FlatbinError {
    FlatbinError::Format(format!(
        "truncated at offset {:#x}, needed {} bytes",
        offset, needed
    ))
}

/// Trait for reading little-endian values out of a byte slice.
pub trait LeRead {
    fn read_u8(&self, offset: usize) -> Result<u8>;
    fn read_u16(&self, offset: usize) -> Result<u16>;
    fn read_u32(&self, offset: usize) -> Result<u32>;
    fn read_u64(&self, offset: usize) -> Result<u64>;
}

impl LeRead for [u8] {
    fn read_u8(&self, offset: usize) -> Result<u8> {
        self.get(offset)
            .copied()
            .ok_or_else(|| truncated(offset, 1))
    }

    fn read_u16(&self, offset: usize) -> Result<u16> {
        let bytes: [u8; 2] = self
            .get(offset..offset + 2)
            .ok_or_else(|| truncated(offset, 2))?
            .try_into()
            .unwrap();
        Ok(u16::from_le_bytes(bytes))
    }

    fn read_u32(&self, offset: usize) -> Result<u32> {
        let bytes: [u8; 4] = self
            .get(offset..offset + 4)
            .ok_or_else(|| truncated(offset, 4))?
            .try_into()
            .unwrap();
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_u64(&self, offset: usize) -> Result<u64> {
        let bytes: [u8; 8] = self
            .get(offset..offset + 8)
            .ok_or_else(|| truncated(offset, 8))?
            .try_into()
            .unwrap();
        Ok(u64::from_le_bytes(bytes))
    }
}

/// Read a NUL-terminated string starting at `offset` within `data`.
///
/// Returns an empty string when `offset` is past the end; a dangling name
/// offset yields a nameless symbol rather than a hard error.
pub fn read_cstring(data: &[u8], offset: usize) -> &[u8] {
    if offset >= data.len() {
        return &[];
    }
    let rest = &data[offset..];
    match rest.iter().position(|&b| b == 0) {
        Some(end) => &rest[..end],
        None => rest,
    }
}
