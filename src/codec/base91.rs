//! Radix-91 codec with 13-bit packing.
//!
//! Bytes are redistributed into 13-bit buckets: each fresh byte opens a new
//! bucket holding its 8 bits, and whenever five or more spare bits have
//! accumulated the next byte is drained 8 bits at a time into the open
//! buckets' remainders through a position/bit stack. Every completed bucket
//! renders as two base-91 digits offset from ASCII `$` (0x24), low digit
//! first, and `!` terminates the stream.
//!
//! The byte schedule is fixed: over any 13 consecutive input bytes, 8 open a
//! bucket ("append") and 5 are drained, in the pattern A A D A A D A D A A D
//! A D. The zero-run pre-pass leans on this determinism: a run of two or
//! more zero bytes (capped at 256) collapses to the token `[0x00, n-1]`, and
//! a `#` marker glyph — outside the digit alphabet — is inserted into the
//! rendered text at a character position derived from how many buckets had
//! been opened when the token entered the packer, so a decoder can find and
//! re-expand the runs.
//!
//! Denser than the radix-85 scheme at the price of decode complexity. As
//! with radix-85, the true byte length travels out-of-band.

use crate::error::{FlatbinError, Result};

const DIGIT_BASE: u8 = 0x24;
const SENTINEL: u8 = b'!';
const RUN_MARKER: u8 = b'#';
const MAX_RUN: usize = 256;

/// Role of input byte `j % 13` in the packing schedule: `true` opens a
/// bucket, `false` is drained into open remainders.
const ROLE_APPEND: [bool; 13] = [
    true, true, false, true, true, false, true, false, true, true, false, true, false,
];
/// Buckets opened before byte `j % 13` within one period.
const APPENDS_IN_PERIOD: [usize; 13] = [0, 1, 2, 2, 3, 4, 4, 5, 5, 6, 7, 7, 8];

fn appends_before(j: usize) -> usize {
    j / 13 * 8 + APPENDS_IN_PERIOD[j % 13]
}

fn is_append(j: usize) -> bool {
    ROLE_APPEND[j % 13]
}

/// Character position (in marker-free text) for a run token starting at
/// input byte `j`. Append and drain slots share a bucket count, so the
/// low bit tells them apart.
fn marker_position(j: usize) -> usize {
    2 * appends_before(j) + usize::from(is_append(j))
}

/// Pack bytes into 13-bit buckets.
fn pack(x: &[u8]) -> Vec<u16> {
    let mut out: Vec<u16> = Vec::with_capacity(x.len() * 5 / 8 + 2);
    let mut stack: Vec<(usize, u32)> = Vec::new();
    let mut cnt5 = 0i32;
    let mut i = 0usize;
    while i < x.len() {
        out.push(x[i] as u16);
        i += 1;
        cnt5 += 5;
        stack.push((out.len() - 1, 8));
        while cnt5 >= 8 {
            let mut v = if i < x.len() { x[i] as u32 } else { 0 };
            i += 1;
            let mut bit_rem = 8u32;
            while bit_rem > 0 {
                let (pos, bits) = stack.pop().expect("packer stack underflow");
                let drain = bit_rem.min(13 - bits);
                out[pos] |= ((v & ((1 << drain) - 1)) << bits) as u16;
                v >>= drain;
                bit_rem -= drain;
                if bits + drain < 13 {
                    stack.push((pos, bits + drain));
                }
            }
            cnt5 -= 8;
        }
    }
    out
}

fn render(buckets: &[u16]) -> String {
    let mut out = String::with_capacity(2 * buckets.len() + 1);
    for &v in buckets {
        out.push((DIGIT_BASE + (v % 91) as u8) as char);
        out.push((DIGIT_BASE + (v / 91) as u8) as char);
    }
    out
}

fn parse_buckets(digits: &[u8]) -> Result<Vec<u16>> {
    if digits.len() % 2 != 0 {
        return Err(FlatbinError::Format(
            "base91 text has a dangling digit".into(),
        ));
    }
    let mut buckets = Vec::with_capacity(digits.len() / 2);
    for pair in digits.chunks(2) {
        let lo = pair[0].wrapping_sub(DIGIT_BASE);
        let hi = pair[1].wrapping_sub(DIGIT_BASE);
        if lo > 90 || hi > 90 {
            return Err(FlatbinError::Format(format!(
                "invalid base91 digit pair {:?}{:?}",
                pair[0] as char, pair[1] as char
            )));
        }
        buckets.push(lo as u16 + 91 * hi as u16);
    }
    Ok(buckets)
}

/// Streaming inverse of [`pack`]: yields bytes in schedule order.
struct Unpacker<'a> {
    buckets: &'a [u16],
    stack: Vec<(usize, u32)>,
    queue: std::collections::VecDeque<u8>,
    cnt5: i32,
    next_bucket: usize,
}

impl<'a> Unpacker<'a> {
    fn new(buckets: &'a [u16]) -> Self {
        Self {
            buckets,
            stack: Vec::new(),
            queue: std::collections::VecDeque::new(),
            cnt5: 0,
            next_bucket: 0,
        }
    }
}

impl Iterator for Unpacker<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if let Some(b) = self.queue.pop_front() {
            return Some(b);
        }
        let bucket = *self.buckets.get(self.next_bucket)?;
        let first = (bucket & 0xff) as u8;
        self.stack.push((self.next_bucket, 8));
        self.next_bucket += 1;
        self.cnt5 += 5;
        while self.cnt5 >= 8 {
            let mut v = 0u32;
            let mut shift = 0u32;
            let mut bit_rem = 8u32;
            while bit_rem > 0 {
                let (pos, bits) = self.stack.pop().expect("unpacker stack underflow");
                let drain = bit_rem.min(13 - bits);
                v |= ((self.buckets[pos] as u32 >> bits) & ((1 << drain) - 1)) << shift;
                shift += drain;
                bit_rem -= drain;
                if bits + drain < 13 {
                    self.stack.push((pos, bits + drain));
                }
            }
            self.queue.push_back(v as u8);
            self.cnt5 -= 8;
        }
        Some(first)
    }
}

/// Encode without the run-length pre-pass.
pub fn encode(data: &[u8]) -> String {
    let mut out = render(&pack(data));
    out.push(SENTINEL as char);
    out
}

/// Encode with the zero-run pre-pass.
pub fn encode_rle(data: &[u8]) -> String {
    let mut reduced: Vec<u8> = Vec::with_capacity(data.len());
    let mut tokens: Vec<usize> = Vec::new();

    let mut i = 0usize;
    while i < data.len() {
        if data[i] != 0 {
            reduced.push(data[i]);
            i += 1;
            continue;
        }
        let mut run = 1usize;
        while i + run < data.len() && data[i + run] == 0 {
            run += 1;
        }
        i += run;
        while run > 0 {
            let m = run.min(MAX_RUN);
            if m >= 2 {
                tokens.push(reduced.len());
                reduced.push(0);
                reduced.push((m - 1) as u8);
            } else {
                reduced.push(0);
            }
            run -= m;
        }
    }

    let chars = render(&pack(&reduced));
    let positions: Vec<usize> = tokens.iter().map(|&j| marker_position(j)).collect();

    let mut out = String::with_capacity(chars.len() + positions.len() + 1);
    let mut next = positions.iter().peekable();
    for (c, ch) in chars.chars().enumerate() {
        while next.peek() == Some(&&c) {
            out.push(RUN_MARKER as char);
            next.next();
        }
        out.push(ch);
    }
    // tokens at the very tail land past the last rendered character
    for _ in next {
        out.push(RUN_MARKER as char);
    }
    out.push(SENTINEL as char);
    out
}

/// Decode text produced by [`encode`] back into `len` bytes.
pub fn decode(text: &str, len: usize) -> Result<Vec<u8>> {
    let digits: Vec<u8> = text
        .bytes()
        .take_while(|&b| b != SENTINEL)
        .collect();
    let buckets = parse_buckets(&digits)?;
    let out: Vec<u8> = Unpacker::new(&buckets).take(len).collect();
    if out.len() < len {
        return Err(FlatbinError::Format(format!(
            "base91 text exhausted after {} of {len} bytes",
            out.len()
        )));
    }
    Ok(out)
}

/// Decode text produced by [`encode_rle`] back into `len` bytes.
pub fn decode_rle(text: &str, len: usize) -> Result<Vec<u8>> {
    let mut digits: Vec<u8> = Vec::with_capacity(text.len());
    let mut markers: Vec<usize> = Vec::new();
    for b in text.bytes() {
        match b {
            SENTINEL => break,
            RUN_MARKER => markers.push(digits.len()),
            other => digits.push(other),
        }
    }
    let buckets = parse_buckets(&digits)?;

    let mut stream = Unpacker::new(&buckets);
    let mut next_marker = markers.iter().peekable();
    let mut out = Vec::with_capacity(len);
    let mut j = 0usize; // index into the reduced byte stream
    while out.len() < len {
        let exhausted = || FlatbinError::Format("base91 text exhausted mid-stream".into());
        if next_marker.peek() == Some(&&marker_position(j)) {
            next_marker.next();
            let zero = stream.next().ok_or_else(exhausted)?;
            if zero != 0 {
                return Err(FlatbinError::Format(format!(
                    "run token at reduced byte {j} begins with {zero:#04x}, not zero"
                )));
            }
            let n = stream.next().ok_or_else(exhausted)? as usize + 1;
            out.resize(out.len() + n, 0);
            j += 2;
        } else {
            out.push(stream.next().ok_or_else(exhausted)?);
            j += 1;
        }
    }
    if out.len() != len {
        return Err(FlatbinError::Format(format!(
            "zero run expands to {} bytes past the expected {len}",
            out.len()
        )));
    }
    Ok(out)
}
