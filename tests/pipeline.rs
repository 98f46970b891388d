//! Full pipeline: extract, frame, encode, then back again.

mod common;

use common::{
    dynsym_entry, Elf64Builder, SHF_ALLOC, SHF_EXECINSTR, SHT_DYNSYM, SHT_PROGBITS, SHT_STRTAB,
};
use flatbin::bindgen::{self, Direction, Signature};
use flatbin::codec::{self, base85, base91, LiteralStyle};
use flatbin::container::{self, CompressOptions, ContainerLayout};

const EXPORT: &str = "_flat_export_4_init_2_1_t_prim_i32_1_n_prim_i32_prim_unit";

fn sample_elf() -> Vec<u8> {
    let mut text = vec![0x90u8; 0x100];
    text[0x40] = 0xf8;
    let mut dynstr = vec![0u8];
    dynstr.extend_from_slice(EXPORT.as_bytes());
    dynstr.push(0);
    let dynsym: Vec<u8> = [dynsym_entry(0, 0), dynsym_entry(1, 0x10c0)].concat();

    Elf64Builder::new(0x1040)
        .section(".text", SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, 0x1000, text)
        .section(".dynsym", SHT_DYNSYM, SHF_ALLOC, 0x1100, dynsym)
        .section(".dynstr", SHT_STRTAB, SHF_ALLOC, 0x1140, dynstr)
        .build()
}

#[test]
fn image_survives_framing_and_text_encoding() {
    let ex = flatbin::extract(&sample_elf()).unwrap();
    let trailer = ex.image.entrypoint_offset.to_le_bytes();
    let opts = CompressOptions::default();

    let container = container::build(
        &ex.image.data,
        &trailer,
        ContainerLayout::Packed,
        &opts,
    )
    .unwrap();

    // radix-91 with run-length packing, as embedded in the source template
    let text = base91::encode_rle(&container);
    assert!(text.is_ascii());
    let back = base91::decode_rle(&text, container.len()).unwrap();
    assert_eq!(back, container);

    let payload = container::unframe(&back, ContainerLayout::Packed, &opts).unwrap();
    assert_eq!(&payload[..ex.image.len()], &ex.image.data[..]);
    assert_eq!(&payload[ex.image.len()..], &trailer[..]);
}

#[test]
fn standard_layout_round_trips_too() {
    let ex = flatbin::extract(&sample_elf()).unwrap();
    let opts = CompressOptions::default();
    let container =
        container::build(&ex.image.data, &[], ContainerLayout::Standard, &opts).unwrap();

    let text = codec::encode_base85_terminated(&container);
    assert!(text.ends_with(']'));
    let body = &text[..text.len() - 1];
    let back = base85::decode(body, container.len()).unwrap();
    assert_eq!(back, container);

    let payload = container::unframe(&back, ContainerLayout::Standard, &opts).unwrap();
    assert_eq!(payload, ex.image.data);
}

#[test]
fn encoded_text_is_safe_for_source_literals() {
    let ex = flatbin::extract(&sample_elf()).unwrap();
    let opts = CompressOptions::default();
    let container = container::build(
        &ex.image.data,
        &[],
        ContainerLayout::Packed,
        &opts,
    )
    .unwrap();

    let text = codec::encode_base85_terminated(&container);
    let rust = codec::render_literal(&text, LiteralStyle::RustString);
    assert!(rust.starts_with('"') && rust.ends_with('"'));
    let c = codec::render_literal(&text, LiteralStyle::CString);
    assert!(!c.contains(r"??"), "trigraph-prone sequences are escaped");
}

#[test]
fn file_backed_extraction_matches_in_memory() {
    let file = sample_elf();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.so");
    std::fs::write(&path, &file).unwrap();

    let from_disk = flatbin::extract_path(&path).unwrap();
    let in_memory = flatbin::extract(&file).unwrap();
    assert_eq!(from_disk.image, in_memory.image);
    assert_eq!(from_disk.record(), in_memory.record());
}

#[test]
fn harvested_export_names_drive_thunk_generation() {
    let ex = flatbin::extract(&sample_elf()).unwrap();
    assert_eq!(ex.exports.len(), 1);

    let sig = Signature::parse(&ex.exports[0].name).unwrap();
    assert_eq!(sig.direction, Direction::Export);
    assert_eq!(sig.ident, "init");
    assert_eq!(sig.params.len(), 2);

    let code = bindgen::emit_all(&[(sig, ex.exports[0].address)]);
    assert!(code.contains("void init(int32_t t, int32_t n)"));
    assert_eq!(ex.exports[0].address, 0xc0);
    assert!(code.contains("FLAT_IMAGEBASE + 0xc0"));
    assert!(code.contains("void flat_bindgen_init()"));
}
