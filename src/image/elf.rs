//! ELF extraction path.
//!
//! Validates the identification bytes (little-endian, dynamic PIE), walks the
//! section headers, and lays every `SHF_ALLOC` section out at its virtual
//! address inside a zero-filled buffer spanning the minimal address range.
//! The dynamic section is compacted down to relocation-tagged entries, and
//! the dynamic symbol table yields the reserved-prefix export symbols.

use tracing::debug;

use crate::error::{FlatbinError, Result};
use crate::image::utils::{read_cstring, LeRead};
use crate::image::{
    patch_handshake, trim_boundary, ExecutableImage, ExportSymbol, Extraction, EXPORT_PREFIX,
    IMPORT_PREFIX,
};

pub const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_DYN: u16 = 3;

const SHT_STRTAB: u32 = 3;
const SHT_DYNAMIC: u32 = 6;
const SHT_NOBITS: u32 = 8;
const SHT_DYNSYM: u32 = 11;

const SHF_ALLOC: u64 = 2;

/// Dynamic-section tags the runtime relocator consumes; everything else is
/// zeroed out of the image. DT_RELACOUNT/DT_RELCOUNT are redundant with
/// DT_RELASZ/DT_RELAENT and DT_RELSZ/DT_RELENT and are dropped too.
const DYNAMIC_KEEP_TAGS: [u64; 10] = [
    2,  // DT_PLTRELSZ
    7,  // DT_RELA
    8,  // DT_RELASZ
    9,  // DT_RELAENT
    17, // DT_REL
    18, // DT_RELSZ
    19, // DT_RELENT
    20, // DT_PLTREL
    22, // DT_TEXTREL
    23, // DT_JMPREL
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElfClass {
    Elf32,
    Elf64,
}

#[derive(Debug, Clone, Copy)]
struct SectionHeader {
    sh_name: u32,
    sh_type: u32,
    sh_flags: u64,
    sh_addr: u64,
    sh_offset: u64,
    sh_size: u64,
}

impl SectionHeader {
    fn is_alloc(&self) -> bool {
        self.sh_flags & SHF_ALLOC != 0
    }
}

fn parse_class(data: &[u8]) -> Result<ElfClass> {
    if data.len() < 52 || &data[..4] != ELF_MAGIC {
        return Err(FlatbinError::Format("invalid ELF magic".into()));
    }
    let class = match data[4] {
        ELFCLASS32 => ElfClass::Elf32,
        ELFCLASS64 => ElfClass::Elf64,
        other => {
            return Err(FlatbinError::Format(format!(
                "unsupported ELF class: {other}"
            )))
        }
    };
    if data[5] != ELFDATA2LSB {
        return Err(FlatbinError::Format(format!(
            "unsupported ELF data encoding: {} (little-endian only)",
            data[5]
        )));
    }
    if data.read_u16(16)? != ET_DYN {
        return Err(FlatbinError::Format(
            "not a dynamic PIE (e_type != ET_DYN)".into(),
        ));
    }
    Ok(class)
}

fn parse_section_headers(data: &[u8], class: ElfClass) -> Result<Vec<SectionHeader>> {
    let (e_shoff, e_shentsize, e_shnum) = match class {
        ElfClass::Elf64 => (
            data.read_u64(40)? as usize,
            data.read_u16(58)? as usize,
            data.read_u16(60)? as usize,
        ),
        ElfClass::Elf32 => (
            data.read_u32(32)? as usize,
            data.read_u16(46)? as usize,
            data.read_u16(48)? as usize,
        ),
    };

    let mut headers = Vec::with_capacity(e_shnum);
    for i in 0..e_shnum {
        let base = e_shoff + i * e_shentsize;
        let sh = match class {
            ElfClass::Elf64 => SectionHeader {
                sh_name: data.read_u32(base)?,
                sh_type: data.read_u32(base + 4)?,
                sh_flags: data.read_u64(base + 8)?,
                sh_addr: data.read_u64(base + 16)?,
                sh_offset: data.read_u64(base + 24)?,
                sh_size: data.read_u64(base + 32)?,
            },
            ElfClass::Elf32 => SectionHeader {
                sh_name: data.read_u32(base)?,
                sh_type: data.read_u32(base + 4)?,
                sh_flags: data.read_u32(base + 8)? as u64,
                sh_addr: data.read_u32(base + 12)? as u64,
                sh_offset: data.read_u32(base + 16)? as u64,
                sh_size: data.read_u32(base + 20)? as u64,
            },
        };
        headers.push(sh);
    }
    Ok(headers)
}

fn section_bytes<'a>(data: &'a [u8], sh: &SectionHeader) -> Result<&'a [u8]> {
    let start = sh.sh_offset as usize;
    let len = sh.sh_size as usize;
    data.get(start..start + len).ok_or_else(|| {
        FlatbinError::Format(format!(
            "section bytes {:#x}..{:#x} outside file of {:#x} bytes",
            start,
            start + len,
            data.len()
        ))
    })
}

/// Keep only relocation-tagged entries of a dynamic-section blob, compacted
/// to the front; the remainder is zeroed.
fn compact_dynamic(blob: &mut [u8], class: ElfClass) {
    let entsize = match class {
        ElfClass::Elf64 => 16,
        ElfClass::Elf32 => 8,
    };
    let mut dst = 0;
    for src in (0..blob.len() - blob.len() % entsize).step_by(entsize) {
        let tag = match class {
            ElfClass::Elf64 => u64::from_le_bytes(blob[src..src + 8].try_into().unwrap()),
            ElfClass::Elf32 => u32::from_le_bytes(blob[src..src + 4].try_into().unwrap()) as u64,
        };
        if DYNAMIC_KEEP_TAGS.contains(&tag) {
            blob.copy_within(src..src + entsize, dst);
            dst += entsize;
        }
    }
    blob[dst..].fill(0);
}

/// Harvest `(st_name, st_value)` pairs out of a `.dynsym` blob.
fn parse_dynsym(blob: &[u8], class: ElfClass) -> Vec<(u32, u64)> {
    let entsize = match class {
        ElfClass::Elf64 => 24,
        ElfClass::Elf32 => 16,
    };
    let mut symbols = Vec::new();
    for base in (0..blob.len() - blob.len() % entsize).step_by(entsize) {
        let (name, value) = match class {
            ElfClass::Elf64 => (
                u32::from_le_bytes(blob[base..base + 4].try_into().unwrap()),
                u64::from_le_bytes(blob[base + 8..base + 16].try_into().unwrap()),
            ),
            ElfClass::Elf32 => (
                u32::from_le_bytes(blob[base..base + 4].try_into().unwrap()),
                u32::from_le_bytes(blob[base + 4..base + 8].try_into().unwrap()) as u64,
            ),
        };
        symbols.push((name, value));
    }
    symbols
}

/// Look up a section's virtual address by name (e.g. `.got`).
///
/// Used by the indirection eliminator to bound GOT-relative annotations
/// without a second external-tool invocation.
pub fn section_vaddr(data: &[u8], name: &str) -> Result<Option<u64>> {
    let class = parse_class(data)?;
    let headers = parse_section_headers(data, class)?;
    let e_shstrndx = match class {
        ElfClass::Elf64 => data.read_u16(62)? as usize,
        ElfClass::Elf32 => data.read_u16(50)? as usize,
    };
    let shstrtab = match headers.get(e_shstrndx) {
        Some(sh) => section_bytes(data, sh).unwrap_or(&[]),
        None => &[],
    };
    Ok(headers
        .iter()
        .find(|sh| read_cstring(shstrtab, sh.sh_name as usize) == name.as_bytes())
        .map(|sh| sh.sh_addr))
}

pub fn extract(data: &[u8]) -> Result<Extraction> {
    let class = parse_class(data)?;
    let headers = parse_section_headers(data, class)?;

    let e_shstrndx = match class {
        ElfClass::Elf64 => data.read_u16(62)? as usize,
        ElfClass::Elf32 => data.read_u16(50)? as usize,
    };
    let shstrtab = match headers.get(e_shstrndx) {
        Some(sh) => section_bytes(data, sh).unwrap_or(&[]),
        None => &[],
    };

    let mut lowest: Option<u64> = None;
    let mut highest: u64 = 0;
    for sh in &headers {
        if sh.is_alloc() {
            let end = sh.sh_addr.checked_add(sh.sh_size).ok_or_else(|| {
                FlatbinError::Format(format!(
                    "section span {:#x}+{:#x} overflows the address space",
                    sh.sh_addr, sh.sh_size
                ))
            })?;
            lowest = Some(lowest.map_or(sh.sh_addr, |lo| lo.min(sh.sh_addr)));
            highest = highest.max(end);
        }
    }

    let mut memory = vec![0u8; highest as usize];
    let mut dynsym: Vec<(u32, u64)> = Vec::new();
    let mut dynstr: &[u8] = &[];

    for sh in &headers {
        if sh.sh_type == SHT_NOBITS || sh.sh_size == 0 {
            continue; // the buffer is already zero
        }
        if sh.sh_type == SHT_DYNSYM {
            dynsym = parse_dynsym(section_bytes(data, sh)?, class);
        } else if sh.sh_type == SHT_STRTAB
            && read_cstring(shstrtab, sh.sh_name as usize) == b".dynstr"
        {
            dynstr = section_bytes(data, sh)?;
        }
        if !sh.is_alloc() {
            continue;
        }
        let dst = sh.sh_addr as usize;
        let slot = &mut memory[dst..dst + sh.sh_size as usize];
        slot.copy_from_slice(section_bytes(data, sh)?);
        if sh.sh_type == SHT_DYNAMIC {
            compact_dynamic(slot, class);
        }
    }

    let mut exports = Vec::new();
    for (st_name, st_value) in dynsym {
        let name = String::from_utf8_lossy(read_cstring(dynstr, st_name as usize)).into_owned();
        if name.starts_with(EXPORT_PREFIX) || name.starts_with(IMPORT_PREFIX) {
            exports.push(ExportSymbol {
                name,
                address: st_value,
            });
        }
    }

    let entry = match class {
        ElfClass::Elf64 => data.read_u64(24)?,
        ElfClass::Elf32 => data.read_u32(24)? as u64,
    };

    finalize(memory, lowest, entry, exports)
}

/// Trim the low end of the image and shift the entry point and symbol
/// addresses identically, then flip the loader-handshake byte.
fn finalize(
    mut memory: Vec<u8>,
    lowest: Option<u64>,
    entry: u64,
    mut exports: Vec<ExportSymbol>,
) -> Result<Extraction> {
    let Some(lowest) = lowest else {
        debug!("no alloc sections; producing empty image");
        return Ok(Extraction {
            image: ExecutableImage {
                data: Vec::new(),
                entrypoint_offset: 0,
            },
            exports,
            pe: None,
        });
    };

    let boundary = trim_boundary(lowest);
    if entry < boundary {
        return Err(FlatbinError::Format(format!(
            "entry point {entry:#x} below trim boundary {boundary:#x}"
        )));
    }
    for sym in &mut exports {
        if sym.address < boundary {
            return Err(FlatbinError::Format(format!(
                "export {} at {:#x} below trim boundary {boundary:#x}",
                sym.name, sym.address
            )));
        }
        sym.address -= boundary;
    }
    memory.drain(..boundary as usize);

    let mut image = ExecutableImage {
        data: memory,
        entrypoint_offset: entry - boundary,
    };
    patch_handshake(&mut image)?;
    debug!(
        image_size = image.len(),
        entry = image.entrypoint_offset,
        boundary,
        exports = exports.len(),
        "ELF image extracted"
    );
    Ok(Extraction {
        image,
        exports,
        pe: None,
    })
}
