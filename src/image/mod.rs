//! Flat-image extraction.
//!
//! Turns a parsed ELF or PE executable into its minimal in-memory layout: a
//! contiguous byte buffer whose gaps are zero, plus the export-symbol table
//! and (for PE) base-relocation bounds the runtime stub needs. All addresses
//! in the result are relative to the trimmed image start.

pub mod elf;
pub mod pe;
pub mod utils;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FlatbinError, Result};

/// Reserved symbol prefix for functions the image exposes to the host.
pub const EXPORT_PREFIX: &str = "_flat_export_";
/// Reserved symbol prefix for host functions the image calls back into.
pub const IMPORT_PREFIX: &str = "_flat_import_";

/// The low end of the image is trimmed down to this alignment.
pub const TRIM_ALIGN: u64 = 128;

/// A flat loadable memory image.
///
/// Once produced, the buffer is mutated only through [`ExecutableImage::patch`];
/// the size and entry point never change silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableImage {
    pub data: Vec<u8>,
    /// Entry-point offset relative to the start of `data`.
    pub entrypoint_offset: u64,
}

impl ExecutableImage {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Overwrite `bytes.len()` bytes at `offset`.
    ///
    /// This is the only sanctioned mutation of an extracted image.
    pub fn patch(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                FlatbinError::SizeConstraint(format!(
                    "patch of {} bytes at {:#x} exceeds image size {:#x}",
                    bytes.len(),
                    offset,
                    self.data.len()
                ))
            })?;
        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }
}

/// A symbol exported by (or imported into) the image, filtered to the
/// reserved name-prefix convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSymbol {
    /// Full mangled name, reserved prefix included.
    pub name: String,
    /// Address relative to the trimmed image start.
    pub address: u64,
}

/// PE base-relocation bookkeeping carried alongside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeRelocInfo {
    pub image_base: u64,
    /// Offset of the preserved `.reloc` bytes within the trimmed image.
    pub off_reloc: u64,
    pub size_reloc: u64,
}

/// Result of a successful extraction.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub image: ExecutableImage,
    pub exports: Vec<ExportSymbol>,
    pub pe: Option<PeRelocInfo>,
}

impl Extraction {
    /// The structured record downstream consumers (template splicing,
    /// bindgen) read; serialized as JSON like the record the loader stubs
    /// were built against.
    pub fn record(&self) -> LoaderRecord {
        LoaderRecord {
            entrypoint_offset: self.image.entrypoint_offset,
            exports: self
                .exports
                .iter()
                .map(|e| (e.name.clone(), e.address))
                .collect(),
            pe_image_base: self.pe.map(|p| p.image_base),
            pe_off_reloc: self.pe.map(|p| p.off_reloc),
            pe_size_reloc: self.pe.map(|p| p.size_reloc),
        }
    }
}

/// Structured extraction record (spec'd output of the extractor stage).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoaderRecord {
    pub entrypoint_offset: u64,
    pub exports: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pe_image_base: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pe_off_reloc: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pe_size_reloc: Option<u64>,
}

impl LoaderRecord {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| FlatbinError::Format(format!("record serialization: {e}")))
    }
}

/// Extract the flat image from raw executable bytes, dispatching on format.
pub fn extract(data: &[u8]) -> Result<Extraction> {
    // Cheap sniff before the hand-rolled parsers take over; anything the
    // object crate cannot classify as ELF/PE is rejected up front.
    let kind = object::FileKind::parse(data)
        .map_err(|e| FlatbinError::Format(format!("unrecognized executable: {e}")))?;
    debug!(?kind, len = data.len(), "extracting flat image");
    match kind {
        object::FileKind::Elf32 | object::FileKind::Elf64 => elf::extract(data),
        object::FileKind::Pe32 | object::FileKind::Pe64 => pe::extract(data),
        other => Err(FlatbinError::Format(format!(
            "unsupported executable kind: {other:?}"
        ))),
    }
}

/// Extract from a file on disk, memory-mapping the input.
pub fn extract_path<P: AsRef<Path>>(path: P) -> Result<Extraction> {
    let file = std::fs::File::open(path.as_ref())?;
    // Safety: the input is treated as exclusively owned for the run.
    let map = unsafe { memmap2::Mmap::map(&file)? };
    extract(&map)
}

/// Round `lowest` down to the trim alignment.
pub(crate) fn trim_boundary(lowest: u64) -> u64 {
    lowest - lowest % TRIM_ALIGN
}

/// Flip the loader-handshake byte at the entry point from `clc` to `stc`.
///
/// The runtime stub executes this byte first and uses the carry flag to tell
/// a loader launch apart from a plain OS launch.
pub(crate) fn patch_handshake(image: &mut ExecutableImage) -> Result<()> {
    let off = image.entrypoint_offset as usize;
    match image.data.get(off) {
        Some(0xf8) => {
            image.data[off] = 0xf9;
            Ok(())
        }
        Some(&other) => Err(FlatbinError::PatternMismatch {
            offset: image.entrypoint_offset,
            message: format!("entry byte {other:#04x} is not clc (0xf8)"),
        }),
        None => Err(FlatbinError::Format(format!(
            "entry point {:#x} outside image of {:#x} bytes",
            image.entrypoint_offset,
            image.data.len()
        ))),
    }
}
