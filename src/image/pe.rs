//! PE extraction path.
//!
//! Builds the in-memory mapped image, zeroes every byte outside needed
//! sections, preserves the base-relocation section verbatim at the image
//! tail, and patches the relocation table's offset and size into the two
//! placeholder immediate loads at the entry point. The runtime stub reads
//! those immediates from code rather than from a header.

use tracing::debug;

use crate::error::{FlatbinError, Result};
use crate::image::utils::{read_cstring, LeRead};
use crate::image::{
    patch_handshake, trim_boundary, ExecutableImage, ExportSymbol, Extraction, PeRelocInfo,
    EXPORT_PREFIX, IMPORT_PREFIX,
};

/// `mov esi, 0x12345678; mov edx, 0x12345678` — the stub source carries
/// these placeholders right after its entry prologue. The first immediate
/// receives the relocation-table offset, the second its size.
pub const RELOC_PLACEHOLDER: [u8; 10] =
    [0xbe, 0x78, 0x56, 0x34, 0x12, 0xba, 0x78, 0x56, 0x34, 0x12];

const PE32_MAGIC: u16 = 0x10b;
const PE32PLUS_MAGIC: u16 = 0x20b;

#[derive(Debug, Clone)]
struct PeSection {
    name: String,
    virtual_address: u32,
    virtual_size: u32,
    raw_size: u32,
    raw_ptr: u32,
}

struct PeHeaders {
    entry_rva: u64,
    image_base: u64,
    size_of_image: u32,
    export_dir_rva: u32,
    export_dir_size: u32,
    sections: Vec<PeSection>,
}

fn parse_headers(data: &[u8]) -> Result<PeHeaders> {
    if data.len() < 0x40 || &data[..2] != b"MZ" {
        return Err(FlatbinError::Format("invalid DOS magic".into()));
    }
    let e_lfanew = data.read_u32(0x3c)? as usize;
    if data.get(e_lfanew..e_lfanew + 4) != Some(b"PE\0\0") {
        return Err(FlatbinError::Format("invalid PE signature".into()));
    }
    let coff = e_lfanew + 4;
    let num_sections = data.read_u16(coff + 2)? as usize;
    let size_opt = data.read_u16(coff + 16)? as usize;
    let opt = coff + 20;

    let (image_base, dir_count_off, dir_off) = match data.read_u16(opt)? {
        PE32PLUS_MAGIC => (data.read_u64(opt + 24)?, opt + 108, opt + 112),
        PE32_MAGIC => (data.read_u32(opt + 28)? as u64, opt + 92, opt + 96),
        other => {
            return Err(FlatbinError::Format(format!(
                "unsupported optional-header magic {other:#x}"
            )))
        }
    };
    let entry_rva = data.read_u32(opt + 16)? as u64;
    let size_of_image = data.read_u32(opt + 56)?;

    let dir_count = data.read_u32(dir_count_off)? as usize;
    let (export_dir_rva, export_dir_size) = if dir_count > 0 {
        (data.read_u32(dir_off)?, data.read_u32(dir_off + 4)?)
    } else {
        (0, 0)
    };

    let mut sections = Vec::with_capacity(num_sections);
    let table = opt + size_opt;
    for i in 0..num_sections {
        let base = table + i * 40;
        let raw_name = data.get(base..base + 8).ok_or_else(|| {
            FlatbinError::Format(format!("section table truncated at {base:#x}"))
        })?;
        sections.push(PeSection {
            name: String::from_utf8_lossy(read_cstring(raw_name, 0)).into_owned(),
            virtual_size: data.read_u32(base + 8)?,
            virtual_address: data.read_u32(base + 12)?,
            raw_size: data.read_u32(base + 16)?,
            raw_ptr: data.read_u32(base + 20)?,
        });
    }

    Ok(PeHeaders {
        entry_rva,
        image_base,
        size_of_image,
        export_dir_rva,
        export_dir_size,
        sections,
    })
}

/// Copy each section's raw bytes to its virtual address.
fn map_image(data: &[u8], headers: &PeHeaders) -> Result<Vec<u8>> {
    let mut mapped = vec![0u8; headers.size_of_image as usize];
    for section in &headers.sections {
        let src = section.raw_ptr as usize;
        let len = (section.raw_size as usize)
            .min(mapped.len().saturating_sub(section.virtual_address as usize));
        if len == 0 {
            continue;
        }
        let bytes = data.get(src..src + len).ok_or_else(|| {
            FlatbinError::Format(format!(
                "section {} raw bytes {:#x}..{:#x} outside file",
                section.name,
                src,
                src + len
            ))
        })?;
        let dst = section.virtual_address as usize;
        mapped[dst..dst + len].copy_from_slice(bytes);
    }
    Ok(mapped)
}

/// Walk the export directory and keep reserved-prefix names.
fn harvest_exports(mapped: &[u8], headers: &PeHeaders) -> Result<Vec<ExportSymbol>> {
    let mut exports = Vec::new();
    if headers.export_dir_rva == 0 || headers.export_dir_size == 0 {
        return Ok(exports);
    }
    let dir = headers.export_dir_rva as usize;
    let num_names = mapped.read_u32(dir + 24)? as usize;
    let functions = mapped.read_u32(dir + 28)? as usize;
    let names = mapped.read_u32(dir + 32)? as usize;
    let ordinals = mapped.read_u32(dir + 36)? as usize;

    for i in 0..num_names {
        let name_rva = mapped.read_u32(names + 4 * i)? as usize;
        let name = String::from_utf8_lossy(read_cstring(mapped, name_rva)).into_owned();
        if !(name.starts_with(EXPORT_PREFIX) || name.starts_with(IMPORT_PREFIX)) {
            continue;
        }
        let ordinal = mapped.read_u16(ordinals + 2 * i)? as usize;
        let address = mapped.read_u32(functions + 4 * ordinal)? as u64;
        exports.push(ExportSymbol { name, address });
    }
    Ok(exports)
}

/// Overwrite the two placeholder immediates at the entry point with the
/// relocation table's offset and size. The placeholder byte pattern must be
/// found exactly once.
fn patch_reloc_placeholder(image: &mut ExecutableImage, off: u32, size: u32) -> Result<()> {
    let matches: Vec<usize> = image
        .data
        .windows(RELOC_PLACEHOLDER.len())
        .enumerate()
        .filter(|(_, w)| *w == RELOC_PLACEHOLDER)
        .map(|(i, _)| i)
        .collect();
    match matches.as_slice() {
        [at] => {
            let at = *at;
            image.patch(at + 1, &off.to_le_bytes())?;
            image.patch(at + 6, &size.to_le_bytes())?;
            debug!(at, off, size, "patched relocation placeholder");
            Ok(())
        }
        [] => Err(FlatbinError::PatternMismatch {
            offset: image.entrypoint_offset,
            message: "relocation placeholder pattern not found".into(),
        }),
        many => Err(FlatbinError::PatternMismatch {
            offset: many[1] as u64,
            message: format!(
                "relocation placeholder pattern found {} times, expected exactly once",
                many.len()
            ),
        }),
    }
}

pub fn extract(data: &[u8]) -> Result<Extraction> {
    let headers = parse_headers(data)?;
    let mut mapped = map_image(data, &headers)?;
    let mut exports = harvest_exports(&mapped, &headers)?;

    // Mark bytes that must survive: every section except the debug-only
    // .pdata and the .reloc section (preserved separately).
    let mut needed = vec![false; mapped.len()];
    let mut pos_end = 0usize;
    let mut lowest: Option<u64> = None;
    let mut reloc_bytes: Vec<u8> = Vec::new();
    for section in &headers.sections {
        let va = section.virtual_address as usize;
        let sz = section.virtual_size as usize;
        match section.name.as_str() {
            ".pdata" => {}
            ".reloc" => {
                reloc_bytes = mapped
                    .get(va..va + sz)
                    .ok_or_else(|| {
                        FlatbinError::Format(format!(
                            ".reloc section {va:#x}..{:#x} outside mapped image",
                            va + sz
                        ))
                    })?
                    .to_vec();
            }
            _ => {
                if sz == 0 {
                    continue;
                }
                if va > needed.len() {
                    return Err(FlatbinError::Format(format!(
                        "section {} at {va:#x} outside SizeOfImage {:#x}",
                        section.name,
                        needed.len()
                    )));
                }
                let end = (va + sz).min(needed.len());
                needed[va..end].iter_mut().for_each(|b| *b = true);
                pos_end = pos_end.max(end);
                lowest = Some(lowest.map_or(va as u64, |lo| lo.min(va as u64)));
            }
        }
    }
    for (byte, keep) in mapped.iter_mut().zip(&needed) {
        if !keep {
            *byte = 0;
        }
    }
    mapped.truncate(pos_end);

    let Some(lowest) = lowest else {
        debug!("no needed sections; producing empty image");
        return Ok(Extraction {
            image: ExecutableImage {
                data: Vec::new(),
                entrypoint_offset: 0,
            },
            exports,
            pe: Some(PeRelocInfo {
                image_base: headers.image_base,
                off_reloc: 0,
                size_reloc: 0,
            }),
        });
    };

    let boundary = trim_boundary(lowest);
    if headers.entry_rva < boundary {
        return Err(FlatbinError::Format(format!(
            "entry point {:#x} below trim boundary {boundary:#x}",
            headers.entry_rva
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
    mapped.drain(..boundary as usize);

    // The preserved relocation bytes ride at the image tail; the stub finds
    // them through the patched immediates, not through a header.
    let off_reloc = mapped.len() as u64;
    let size_reloc = reloc_bytes.len() as u64;
    mapped.extend_from_slice(&reloc_bytes);

    let mut image = ExecutableImage {
        data: mapped,
        entrypoint_offset: headers.entry_rva - boundary,
    };
    patch_handshake(&mut image)?;
    patch_reloc_placeholder(&mut image, off_reloc as u32, size_reloc as u32)?;

    debug!(
        image_size = image.len(),
        entry = image.entrypoint_offset,
        boundary,
        off_reloc,
        size_reloc,
        exports = exports.len(),
        "PE image extracted"
    );
    Ok(Extraction {
        image,
        exports,
        pe: Some(PeRelocInfo {
            image_base: headers.image_base,
            off_reloc,
            size_reloc,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_pe() {
        assert!(extract(b"\x7fELF").is_err());
        let mut junk = vec![0u8; 0x80];
        junk[0] = b'M';
        junk[1] = b'Z';
        junk[0x3c] = 0x40;
        // no PE signature at 0x40
        assert!(extract(&junk).is_err());
    }

    #[test]
    fn placeholder_must_be_unique() {
        let mut data = vec![0u8; 64];
        data[4..14].copy_from_slice(&RELOC_PLACEHOLDER);
        let mut image = ExecutableImage {
            data: data.clone(),
            entrypoint_offset: 0,
        };
        patch_reloc_placeholder(&mut image, 0x1000, 0x40).unwrap();
        assert_eq!(&image.data[5..9], &0x1000u32.to_le_bytes());
        assert_eq!(&image.data[10..14], &0x40u32.to_le_bytes());

        // zero occurrences
        let mut empty = ExecutableImage {
            data: vec![0u8; 32],
            entrypoint_offset: 0,
        };
        assert!(patch_reloc_placeholder(&mut empty, 0, 0).is_err());

        // two occurrences
        data.extend_from_slice(&RELOC_PLACEHOLDER);
        let mut double = ExecutableImage {
            data,
            entrypoint_offset: 0,
        };
        assert!(patch_reloc_placeholder(&mut double, 0, 0).is_err());
    }
}
