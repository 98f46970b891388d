//! Disassembly-listing scan.
//!
//! The eliminator does not disassemble; it consumes the textual listing of an
//! external objdump run (`objdump -Fd -M intel`). The scan is a single
//! left-to-right pass threading an explicit accumulator of the current
//! symbol's address and file offset; instruction byte dumps that span lines
//! are folded by the one-tab continuation rule.

use std::path::Path;
use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{FlatbinError, Result};

/// File offsets reported by the verified objdump build wrap at 2 MiB for
/// GOT-slot annotations. Empirical, tool-version-specific; re-verify against
/// the actual tool before assuming it generalizes.
pub const OBJDUMP_OFFSET_WRAP: u64 = 0x20_0000;

/// `<addr> <name> (File Offset: 0x<off>):` — starts a new symbol.
static SYMBOL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9a-f]{16}) <(.+)> \(File Offset: 0x([0-9a-f]+)\):").unwrap()
});

/// An instruction line whose operand annotation resolves into the GOT:
/// `  addr:\tbytes\tmnemonic ... # target <sym> (File Offset: 0x<off>)`.
static GOT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ *([0-9a-f]+):\t([0-9a-f ]+).+# ([0-9a-f]+) <.+> \(File Offset: 0x([0-9a-f]+)\)")
        .unwrap()
});

/// One GOT-relative instruction found in the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndirectSite {
    /// Virtual address of the instruction.
    pub address: u64,
    /// Offset of the instruction's bytes within the binary file.
    pub file_offset: u64,
    /// File offset of the referenced GOT slot, wrap-corrected.
    pub slot_offset: u64,
    /// The instruction's byte dump, continuation lines folded in.
    pub bytes: Vec<u8>,
}

fn parse_hex(s: &str) -> Result<u64> {
    u64::from_str_radix(s, 16)
        .map_err(|e| FlatbinError::Tool(format!("bad hex field {s:?} in listing: {e}")))
}

fn parse_byte_dump(field: &str, out: &mut Vec<u8>) -> Result<()> {
    for tok in field.split_whitespace() {
        let byte = u8::from_str_radix(tok, 16)
            .map_err(|e| FlatbinError::Tool(format!("bad byte {tok:?} in listing: {e}")))?;
        out.push(byte);
    }
    Ok(())
}

/// Scan a listing for instructions whose annotation targets an address at or
/// above `got_base` (the virtual address of the GOT section).
pub fn parse_listing(listing: &str, got_base: u64) -> Result<Vec<IndirectSite>> {
    let mut sites: Vec<IndirectSite> = Vec::new();
    // Accumulator: the symbol the scan is currently inside of.
    let mut symbol_address: u64 = 0;
    let mut symbol_offset: u64 = 0;
    let mut pending: Option<IndirectSite> = None;

    for line in listing.lines() {
        // A line with exactly one tab continues the previous byte dump.
        if line.matches('\t').count() == 1 {
            if let Some(site) = pending.as_mut() {
                let field = line.split('\t').nth(1).unwrap_or("");
                parse_byte_dump(field, &mut site.bytes)?;
            }
            continue;
        }
        if let Some(site) = pending.take() {
            sites.push(site);
        }

        if let Some(caps) = SYMBOL_LINE.captures(line) {
            symbol_address = parse_hex(&caps[1])?;
            symbol_offset = parse_hex(&caps[3])?;
            continue;
        }
        if let Some(caps) = GOT_LINE.captures(line) {
            let target = parse_hex(&caps[3])?;
            if target < got_base {
                continue;
            }
            let address = parse_hex(&caps[1])?;
            let delta = address.checked_sub(symbol_address).ok_or_else(|| {
                FlatbinError::Tool(format!(
                    "instruction at {address:#x} precedes its symbol header at {symbol_address:#x}"
                ))
            })?;
            let slot_offset = parse_hex(&caps[4])? % OBJDUMP_OFFSET_WRAP;
            let mut bytes = Vec::new();
            parse_byte_dump(&caps[2], &mut bytes)?;
            pending = Some(IndirectSite {
                address,
                file_offset: symbol_offset + delta,
                slot_offset,
                bytes,
            });
        }
    }
    if let Some(site) = pending.take() {
        sites.push(site);
    }

    debug!(sites = sites.len(), got_base, "parsed disassembly listing");
    Ok(sites)
}

/// Run the external disassembler over `path` and return its listing.
///
/// One synchronous subprocess per pipeline run; a non-zero exit is fatal
/// with no retry.
pub fn run_objdump(path: &Path) -> Result<String> {
    let output = Command::new("objdump")
        .arg("-Fd")
        .args(["-M", "intel"])
        .arg(path)
        .output()
        .map_err(|e| FlatbinError::Tool(format!("failed to spawn objdump: {e}")))?;
    if !output.status.success() {
        return Err(FlatbinError::Tool(format!(
            "objdump exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    String::from_utf8(output.stdout)
        .map_err(|e| FlatbinError::Tool(format!("objdump output is not UTF-8: {e}")))
}
