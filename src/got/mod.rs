//! GOT-indirection elimination.
//!
//! Statically rewrites GOT-relative call/jump/compare sequences in a
//! statically-linked PIE into direct form so the GOT can be dropped from the
//! image. The work list comes from an external disassembly listing
//! ([`listing`]); the supported instruction forms are the closed set in
//! [`patch`]. An empty work list is the sole non-error no-op.

pub mod listing;
pub mod patch;

use std::path::Path;

use tracing::{debug, info};

use crate::error::{FlatbinError, Result};
use crate::image::elf;

pub use listing::{parse_listing, run_objdump, IndirectSite, OBJDUMP_OFFSET_WRAP};
pub use patch::Indirection;

/// Rewrite every site in place. Returns the number of patches applied.
///
/// Each site's byte dump must still match the binary exactly; a mismatch
/// (including re-running over already-patched code) is fatal rather than a
/// silent double patch.
pub fn eliminate(binary: &mut [u8], sites: &[IndirectSite]) -> Result<usize> {
    for site in sites {
        let form = Indirection::classify(&site.bytes).ok_or_else(|| {
            FlatbinError::PatternMismatch {
                offset: site.file_offset,
                message: format!("unknown indirection: {:02x?}", site.bytes),
            }
        })?;

        let start = site.file_offset as usize;
        let end = start + form.len();
        let current = binary.get(start..end).ok_or_else(|| {
            FlatbinError::SizeConstraint(format!(
                "site at {start:#x} extends past binary of {:#x} bytes",
                binary.len()
            ))
        })?;
        if current != site.bytes.as_slice() {
            return Err(FlatbinError::PatternMismatch {
                offset: site.file_offset,
                message: format!(
                    "binary bytes {current:02x?} disagree with listing {:02x?}",
                    site.bytes
                ),
            });
        }

        let slot = site.slot_offset as usize;
        let target = binary
            .get(slot..slot + 8)
            .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
            .ok_or_else(|| {
                FlatbinError::SizeConstraint(format!(
                    "GOT slot offset {slot:#x} outside binary of {:#x} bytes",
                    binary.len()
                ))
            })?;

        let replacement = form.patch(site.address, target)?;
        binary[start..end].copy_from_slice(&replacement);
        debug!(
            address = site.address,
            offset = site.file_offset,
            ?form,
            target,
            "rewrote indirection"
        );
    }
    Ok(sites.len())
}

/// Full elimination pass over an ELF file on disk: locate the GOT section,
/// run the external disassembler once, and rewrite every recognized site.
///
/// A binary without a GOT section comes back unchanged.
pub fn eliminate_elf(path: &Path) -> Result<Vec<u8>> {
    let mut binary = std::fs::read(path)?;
    let Some(got_base) = elf::section_vaddr(&binary, ".got")? else {
        info!("no .got section; nothing to eliminate");
        return Ok(binary);
    };
    let listing = run_objdump(path)?;
    let sites = parse_listing(&listing, got_base)?;
    let patched = eliminate(&mut binary, &sites)?;
    info!(patched, "GOT indirections eliminated");
    Ok(binary)
}
