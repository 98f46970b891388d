//! Synthetic executable fixtures for integration tests.
//!
//! Real toolchain outputs are too big and too unstable to check in; these
//! builders assemble the smallest ELF/PE files the extractor accepts, with
//! every field the pipeline reads under test control.

#![allow(dead_code)]

pub const SHT_PROGBITS: u32 = 1;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_DYNAMIC: u32 = 6;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_DYNSYM: u32 = 11;

pub const SHF_WRITE: u64 = 1;
pub const SHF_ALLOC: u64 = 2;
pub const SHF_EXECINSTR: u64 = 4;

struct ElfSection {
    name: &'static str,
    sh_type: u32,
    sh_flags: u64,
    addr: u64,
    bytes: Vec<u8>,
}

/// Builds a little-endian ELF64 `ET_DYN` file section by section.
pub struct Elf64Builder {
    entry: u64,
    sections: Vec<ElfSection>,
}

impl Elf64Builder {
    pub fn new(entry: u64) -> Self {
        Self {
            entry,
            sections: Vec::new(),
        }
    }

    pub fn section(
        mut self,
        name: &'static str,
        sh_type: u32,
        sh_flags: u64,
        addr: u64,
        bytes: Vec<u8>,
    ) -> Self {
        self.sections.push(ElfSection {
            name,
            sh_type,
            sh_flags,
            addr,
            bytes,
        });
        self
    }

    pub fn build(self) -> Vec<u8> {
        // String table: null name first, .shstrtab last.
        let mut shstrtab = vec![0u8];
        let mut name_offsets = Vec::with_capacity(self.sections.len());
        for s in &self.sections {
            name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(s.name.as_bytes());
            shstrtab.push(0);
        }
        let shstrtab_name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab\0");

        let shnum = self.sections.len() + 2; // null + sections + shstrtab
        let mut file = vec![0u8; 64];
        file[..4].copy_from_slice(b"\x7fELF");
        file[4] = 2; // ELFCLASS64
        file[5] = 1; // ELFDATA2LSB
        file[6] = 1; // EV_CURRENT
        file[16..18].copy_from_slice(&3u16.to_le_bytes()); // ET_DYN
        file[18..20].copy_from_slice(&0x3eu16.to_le_bytes()); // EM_X86_64
        file[20..24].copy_from_slice(&1u32.to_le_bytes());
        file[24..32].copy_from_slice(&self.entry.to_le_bytes());
        file[52..54].copy_from_slice(&64u16.to_le_bytes()); // e_ehsize
        file[58..60].copy_from_slice(&64u16.to_le_bytes()); // e_shentsize
        file[60..62].copy_from_slice(&(shnum as u16).to_le_bytes());
        file[62..64].copy_from_slice(&((shnum - 1) as u16).to_le_bytes()); // shstrndx

        let mut offsets = Vec::with_capacity(self.sections.len());
        for s in &self.sections {
            offsets.push(file.len() as u64);
            file.extend_from_slice(&s.bytes);
        }
        let shstrtab_offset = file.len() as u64;
        file.extend_from_slice(&shstrtab);

        let e_shoff = file.len() as u64;
        file[40..48].copy_from_slice(&e_shoff.to_le_bytes());

        let mut push_header =
            |file: &mut Vec<u8>, name: u32, ty: u32, flags: u64, addr: u64, off: u64, size: u64| {
                let mut sh = [0u8; 64];
                sh[0..4].copy_from_slice(&name.to_le_bytes());
                sh[4..8].copy_from_slice(&ty.to_le_bytes());
                sh[8..16].copy_from_slice(&flags.to_le_bytes());
                sh[16..24].copy_from_slice(&addr.to_le_bytes());
                sh[24..32].copy_from_slice(&off.to_le_bytes());
                sh[32..40].copy_from_slice(&size.to_le_bytes());
                file.extend_from_slice(&sh);
            };

        push_header(&mut file, 0, 0, 0, 0, 0, 0); // SHN_UNDEF
        for (i, s) in self.sections.iter().enumerate() {
            push_header(
                &mut file,
                name_offsets[i],
                s.sh_type,
                s.sh_flags,
                s.addr,
                offsets[i],
                s.bytes.len() as u64,
            );
        }
        push_header(
            &mut file,
            shstrtab_name,
            SHT_STRTAB,
            0,
            0,
            shstrtab_offset,
            shstrtab.len() as u64,
        );
        file
    }
}

/// One `Elf64_Sym` record.
pub fn dynsym_entry(st_name: u32, st_value: u64) -> [u8; 24] {
    let mut sym = [0u8; 24];
    sym[0..4].copy_from_slice(&st_name.to_le_bytes());
    sym[4] = 0x12; // GLOBAL | FUNC
    sym[6..8].copy_from_slice(&1u16.to_le_bytes());
    sym[8..16].copy_from_slice(&st_value.to_le_bytes());
    sym
}

/// One `Elf64_Dyn` record.
pub fn dyn_entry(tag: u64, val: u64) -> [u8; 16] {
    let mut d = [0u8; 16];
    d[0..8].copy_from_slice(&tag.to_le_bytes());
    d[8..16].copy_from_slice(&val.to_le_bytes());
    d
}

/// What the canned PE fixture promises, for assertions.
pub struct PeFixture {
    pub file: Vec<u8>,
    pub image_base: u64,
    /// RVA of the first section; the trim boundary.
    pub text_rva: u64,
    pub reloc_bytes: Vec<u8>,
    pub export_name: &'static str,
    pub export_rva: u64,
}

/// A minimal PE32+ with `.text` (handshake byte plus relocation
/// placeholder at the entry), `.rdata` (export directory with one reserved
/// name), a `.pdata` of filler that must not survive, and a `.reloc`.
pub fn sample_pe() -> PeFixture {
    let image_base: u64 = 0x1_4000_0000;
    let export_name = "_flat_export_4_init_0_prim_unit";
    let reloc_bytes: Vec<u8> = (0..0x20u8).map(|i| 0xb0u8.wrapping_add(i)).collect();

    // .text raw: entry at RVA 0x1000 = clc, then the placeholder immediates.
    let mut text = vec![0xccu8; 0x200];
    text[0] = 0xf8;
    text[1..11].copy_from_slice(&[0xbe, 0x78, 0x56, 0x34, 0x12, 0xba, 0x78, 0x56, 0x34, 0x12]);

    // .rdata raw: export directory at RVA 0x2000.
    let mut rdata = vec![0u8; 0x100];
    rdata[24..28].copy_from_slice(&1u32.to_le_bytes()); // NumberOfNames
    rdata[28..32].copy_from_slice(&0x2028u32.to_le_bytes()); // AddressOfFunctions
    rdata[32..36].copy_from_slice(&0x2030u32.to_le_bytes()); // AddressOfNames
    rdata[36..40].copy_from_slice(&0x2034u32.to_le_bytes()); // AddressOfNameOrdinals
    rdata[0x28..0x2c].copy_from_slice(&0x1040u32.to_le_bytes()); // functions[0]
    rdata[0x30..0x34].copy_from_slice(&0x2040u32.to_le_bytes()); // names[0]
    rdata[0x34..0x36].copy_from_slice(&0u16.to_le_bytes()); // ordinals[0]
    rdata[0x40..0x40 + export_name.len()].copy_from_slice(export_name.as_bytes());

    let pdata = [0xaau8; 0x10];
    let sections: [(&[u8; 8], u32, u32, &[u8]); 4] = [
        (b".text\0\0\0", 0x1000, 0x200, &text),
        (b".rdata\0\0", 0x2000, 0x100, &rdata),
        (b".pdata\0\0", 0x3000, 0x10, &pdata),
        (b".reloc\0\0", 0x4000, 0x20, &reloc_bytes),
    ];

    let mut file = vec![0u8; 0x400];
    file[0] = b'M';
    file[1] = b'Z';
    file[0x3c..0x40].copy_from_slice(&0x40u32.to_le_bytes()); // e_lfanew
    file[0x40..0x44].copy_from_slice(b"PE\0\0");

    let coff = 0x44;
    file[coff..coff + 2].copy_from_slice(&0x8664u16.to_le_bytes());
    file[coff + 2..coff + 4].copy_from_slice(&(sections.len() as u16).to_le_bytes());
    file[coff + 16..coff + 18].copy_from_slice(&240u16.to_le_bytes()); // SizeOfOptionalHeader

    let opt = coff + 20;
    file[opt..opt + 2].copy_from_slice(&0x20bu16.to_le_bytes()); // PE32+
    file[opt + 16..opt + 20].copy_from_slice(&0x1000u32.to_le_bytes()); // AddressOfEntryPoint
    file[opt + 24..opt + 32].copy_from_slice(&image_base.to_le_bytes());
    file[opt + 56..opt + 60].copy_from_slice(&0x4020u32.to_le_bytes()); // SizeOfImage
    file[opt + 108..opt + 112].copy_from_slice(&16u32.to_le_bytes()); // NumberOfRvaAndSizes
    file[opt + 112..opt + 116].copy_from_slice(&0x2000u32.to_le_bytes()); // export dir RVA
    file[opt + 116..opt + 120].copy_from_slice(&0x100u32.to_le_bytes()); // export dir size

    let mut table = opt + 240;
    let mut raw_ptr = 0x400u32;
    for (name, va, vsize, raw) in &sections {
        file[table..table + 8].copy_from_slice(*name);
        file[table + 8..table + 12].copy_from_slice(&vsize.to_le_bytes());
        file[table + 12..table + 16].copy_from_slice(&va.to_le_bytes());
        file[table + 16..table + 20].copy_from_slice(&(raw.len() as u32).to_le_bytes());
        file[table + 20..table + 24].copy_from_slice(&raw_ptr.to_le_bytes());
        table += 40;
        raw_ptr += raw.len() as u32;
    }
    for (_, _, _, raw) in &sections {
        file.extend_from_slice(raw);
    }

    PeFixture {
        file,
        image_base,
        text_rva: 0x1000,
        reloc_bytes,
        export_name,
        export_rva: 0x1040,
    }
}
