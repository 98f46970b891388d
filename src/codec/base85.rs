//! Radix-85 codec.
//!
//! 4-byte groups map to 5 characters of the RFC 1924 alphabet via big-endian
//! base-85 arithmetic. Input is zero-padded to a multiple of four; the true
//! byte length travels out-of-band, so the decoder takes it as a parameter.

use once_cell::sync::Lazy;

use crate::error::{FlatbinError, Result};

pub const ALPHABET: &[u8; 85] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz!#$%&()*+-;<=>?@^_`{|}~";

static REVERSE: Lazy<[i16; 256]> = Lazy::new(|| {
    let mut table = [-1i16; 256];
    for (i, &c) in ALPHABET.iter().enumerate() {
        table[c as usize] = i as i16;
    }
    table
});

/// Encode `data` into base-85 text.
pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(4) * 5);
    for chunk in data.chunks(4) {
        let mut group = [0u8; 4];
        group[..chunk.len()].copy_from_slice(chunk);
        let mut v = u32::from_be_bytes(group);
        let mut digits = [0u8; 5];
        for d in digits.iter_mut().rev() {
            *d = ALPHABET[(v % 85) as usize];
            v /= 85;
        }
        out.push_str(std::str::from_utf8(&digits).unwrap());
    }
    out
}

/// Decode base-85 text back into `len` bytes.
pub fn decode(text: &str, len: usize) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    if bytes.len() % 5 != 0 {
        return Err(FlatbinError::Format(format!(
            "base85 text length {} is not a multiple of 5",
            bytes.len()
        )));
    }
    let mut out = Vec::with_capacity(bytes.len() / 5 * 4);
    for chunk in bytes.chunks(5) {
        let mut v: u32 = 0;
        for &c in chunk {
            let digit = REVERSE[c as usize];
            if digit < 0 {
                return Err(FlatbinError::Format(format!(
                    "invalid base85 character {:?}",
                    c as char
                )));
            }
            v = v
                .checked_mul(85)
                .and_then(|v| v.checked_add(digit as u32))
                .ok_or_else(|| {
                    FlatbinError::Format("base85 group exceeds 32 bits".into())
                })?;
        }
        out.extend_from_slice(&v.to_be_bytes());
    }
    if len > out.len() {
        return Err(FlatbinError::Format(format!(
            "base85 text decodes to {} bytes, {} requested",
            out.len(),
            len
        )));
    }
    out.truncate(len);
    Ok(out)
}
