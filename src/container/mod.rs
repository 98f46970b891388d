//! Compressed-container builder.
//!
//! Wraps image bytes in a raw LZMA1 stream with a minimal custom header
//! carrying exactly what the decompressing stub needs: literal-context bits,
//! literal-position bits, position bits and the uncompressed length. The
//! compression itself is the liblzma crate's; this module only frames the
//! raw stream.

use std::io::Write;

use liblzma::stream::{Action, Filters, LzmaOptions, Stream};
use tracing::debug;

use crate::error::{FlatbinError, Result};

/// liblzma preset flag for the -e (extreme) variants.
const PRESET_EXTREME: u32 = 1u32 << 31;

/// Header layout, chosen once at pipeline start to match what the
/// decompressing stub expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerLayout {
    /// 4 packed parameter bytes + u32 LE uncompressed length; the raw
    /// stream's constant leading zero byte is dropped and the next four
    /// bytes are reversed to shrink their later text encoding.
    Packed,
    /// Classic 13-byte LZMA header (props byte, u32 LE dict size, u64 LE
    /// uncompressed length) + the raw stream unmodified.
    Standard,
}

/// LZMA parameters; the defaults are the ones every shipped stub was built
/// against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressOptions {
    pub lc: u32,
    pub lp: u32,
    pub pb: u32,
    pub dict_size: u32,
    pub depth: u32,
    pub preset: u32,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            lc: 0,
            lp: 0,
            pb: 0,
            dict_size: 1 << 22,
            depth: 200,
            preset: 9 | PRESET_EXTREME,
        }
    }
}

impl CompressOptions {
    fn lzma_options(&self) -> Result<LzmaOptions> {
        let mut opts = LzmaOptions::new_preset(self.preset)?;
        opts.literal_context_bits(self.lc)
            .literal_position_bits(self.lp)
            .position_bits(self.pb)
            .dict_size(self.dict_size)
            .depth(self.depth);
        Ok(opts)
    }

    fn props_byte(&self) -> u8 {
        ((self.pb * 5 + self.lp) * 9 + self.lc) as u8
    }
}

/// Compress `data` into an unframed raw LZMA1 stream.
pub fn lzma_raw_compress(data: &[u8], opts: &CompressOptions) -> Result<Vec<u8>> {
    let mut filters = Filters::new();
    filters.lzma1(&opts.lzma_options()?);
    let stream = Stream::new_raw_encoder(&filters)?;
    let mut encoder = liblzma::write::XzEncoder::new_stream(Vec::new(), stream);
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress an unframed raw LZMA1 stream of known uncompressed length.
pub fn lzma_raw_decompress(
    data: &[u8],
    uncompressed_len: usize,
    opts: &CompressOptions,
) -> Result<Vec<u8>> {
    let mut filters = Filters::new();
    filters.lzma1(&opts.lzma_options()?);
    let mut stream = Stream::new_raw_decoder(&filters)?;
    let mut out = Vec::with_capacity(uncompressed_len);
    while out.len() < uncompressed_len {
        let consumed = stream.total_in() as usize;
        let produced = stream.total_out();
        out.reserve(uncompressed_len - out.len());
        stream.process_vec(&data[consumed.min(data.len())..], &mut out, Action::Run)?;
        if stream.total_out() == produced && stream.total_in() as usize == consumed {
            return Err(FlatbinError::Compress(
                "raw LZMA stream ended before the promised length".into(),
            ));
        }
    }
    out.truncate(uncompressed_len);
    Ok(out)
}

/// Build a container around `image`, with `trailer` metadata fields (e.g.
/// the entry offset, little-endian) packed directly into the stream.
pub fn build(
    image: &[u8],
    trailer: &[u8],
    layout: ContainerLayout,
    opts: &CompressOptions,
) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(image.len() + trailer.len());
    payload.extend_from_slice(image);
    payload.extend_from_slice(trailer);

    let raw = lzma_raw_compress(&payload, opts)?;
    debug!(
        payload = payload.len(),
        raw = raw.len(),
        ?layout,
        "container compressed"
    );

    let mut out = Vec::with_capacity(raw.len() + 16);
    match layout {
        ContainerLayout::Packed => {
            let len = u32::try_from(payload.len()).map_err(|_| {
                FlatbinError::SizeConstraint(format!(
                    "payload of {} bytes exceeds the packed header's u32 length",
                    payload.len()
                ))
            })?;
            out.push(((1u32 << opts.pb) - 1) as u8);
            out.push(((1u32 << opts.lp) - 1) as u8);
            out.push(opts.lc as u8);
            out.push((opts.lp + opts.lc + 8) as u8);
            out.extend_from_slice(&len.to_le_bytes());

            // The raw stream always begins with a zero byte (range coder
            // init); the stub reinserts it, so drop it here.
            match raw.first() {
                Some(0) => {}
                other => {
                    return Err(FlatbinError::Compress(format!(
                        "raw stream does not start with the constant filler byte: {other:?}"
                    )))
                }
            }
            let mut body = raw[1..].to_vec();
            while body.len() < 4 {
                body.push(0);
            }
            body[..4].reverse();
            out.extend_from_slice(&body);
        }
        ContainerLayout::Standard => {
            out.push(opts.props_byte());
            out.extend_from_slice(&opts.dict_size.to_le_bytes());
            out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
            out.extend_from_slice(&raw);
        }
    }
    Ok(out)
}

/// Invert [`build`]: parse either header layout, restore the raw stream and
/// decompress it. Returns the payload (image plus any trailer fields).
pub fn unframe(container: &[u8], layout: ContainerLayout, opts: &CompressOptions) -> Result<Vec<u8>> {
    match layout {
        ContainerLayout::Packed => {
            if container.len() < 8 {
                return Err(FlatbinError::Format("packed container too short".into()));
            }
            let header = &container[..4];
            let expected = [
                ((1u32 << opts.pb) - 1) as u8,
                ((1u32 << opts.lp) - 1) as u8,
                opts.lc as u8,
                (opts.lp + opts.lc + 8) as u8,
            ];
            if header != expected {
                return Err(FlatbinError::Format(format!(
                    "packed header {header:02x?} does not match parameters {expected:02x?}"
                )));
            }
            let len = u32::from_le_bytes(container[4..8].try_into().unwrap()) as usize;
            let mut raw = Vec::with_capacity(container.len() - 7);
            raw.push(0); // reinsert the dropped filler byte
            raw.extend_from_slice(&container[8..]);
            if raw.len() >= 5 {
                raw[1..5].reverse();
            }
            lzma_raw_decompress(&raw, len, opts)
        }
        ContainerLayout::Standard => {
            if container.len() < 13 {
                return Err(FlatbinError::Format("standard container too short".into()));
            }
            if container[0] != opts.props_byte() {
                return Err(FlatbinError::Format(format!(
                    "props byte {:#04x} does not match parameters",
                    container[0]
                )));
            }
            let len = u64::from_le_bytes(container[5..13].try_into().unwrap()) as usize;
            lzma_raw_decompress(&container[13..], len, opts)
        }
    }
}
