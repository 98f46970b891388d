//! C++ thunk emission.
//!
//! Exports become host-callable wrappers that serialize their arguments,
//! jump into the image at the symbol's virtual offset, deserialize the
//! return value and invoke the buffer-release callback the image hands
//! back. Imports become image-callable counterparts that deserialize,
//! dispatch to the host implementation and serialize the result; their
//! addresses are handed to the image in a generated init pass.
//!
//! Serialization wire format is owned by the runtime's `flat_ser` /
//! `flat_de` routines; this module only orders the calls into them.
//! The surrounding template must define `FLAT_IMAGEBASE` (the in-memory
//! base of the loaded image, loading it on first use) and `FLATCALL`
//! (the calling convention of the image's entry thunks).

use std::fmt::Write;

use crate::bindgen::parse::{BaseType, Direction, InputMode, IntType, Param, Signature};

fn int_cpp(ty: IntType) -> &'static str {
    match ty {
        IntType::I8 => "int8_t",
        IntType::I16 => "int16_t",
        IntType::I32 => "int32_t",
        IntType::I64 => "int64_t",
        IntType::Isize => "intptr_t",
        IntType::U8 => "uint8_t",
        IntType::U16 => "uint16_t",
        IntType::U32 => "uint32_t",
        IntType::U64 => "uint64_t",
        IntType::Usize => "size_t",
        IntType::Bool => "bool",
    }
}

/// Render a type tree in C++ syntax.
pub fn cpp_type(ty: &BaseType) -> String {
    match ty {
        BaseType::Int(i) => int_cpp(*i).to_string(),
        BaseType::Ptr(i) => format!("const {}*", int_cpp(*i)),
        BaseType::PtrMut(i) => format!("{}*", int_cpp(*i)),
        BaseType::Str => "std::string".to_string(),
        BaseType::Unit => "void".to_string(),
        BaseType::Pair(a, b) => format!("std::pair<{}, {}>", cpp_type(a), cpp_type(b)),
        BaseType::Vector(t) => format!("std::vector<{}>", cpp_type(t)),
    }
}

fn param_cpp(p: &Param) -> String {
    let base = cpp_type(&p.ty);
    match p.mode {
        InputMode::Owned => base,
        InputMode::Borrow => format!("const {base}&"),
        InputMode::BorrowMut => format!("{base}&"),
    }
}

fn param_list(params: &[Param]) -> String {
    params
        .iter()
        .map(|p| format!("{} {}", param_cpp(p), p.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Host-side wrapper for a function the image exports. `offset` is the
/// symbol's virtual address relative to the loaded image base.
pub fn emit_export(sig: &Signature, offset: u64) -> String {
    debug_assert_eq!(sig.direction, Direction::Export);
    let ret = cpp_type(&sig.ret);
    let mut out = String::new();
    let _ = writeln!(out, "{ret} {}({}) {{", sig.ident, param_list(&sig.params));
    out.push_str("    std::vector<uint8_t> buf;\n");
    out.push_str("    flat_ser_begin(buf);\n");
    for p in &sig.params {
        let _ = writeln!(out, "    flat_ser<{}>(buf, {});", cpp_type(&p.ty), p.name);
    }
    let _ = writeln!(
        out,
        "    size_t ret_packed = ((size_t (FLATCALL *)(size_t)) (FLAT_IMAGEBASE + 0x{offset:x}))((size_t) buf.data());"
    );
    if sig.ret != BaseType::Unit {
        let _ = writeln!(out, "    {ret} out = flat_de<{ret}>(ret_packed);");
    }
    // The image returns its buffer-release callback after the value.
    out.push_str("    ((void (FLATCALL *)()) flat_de<size_t>(ret_packed))();\n");
    if sig.ret != BaseType::Unit {
        out.push_str("    return out;\n");
    }
    out.push_str("}\n");
    out
}

/// Image-side entry for a function the host implements. The thunk name is
/// fixed so the init pass can register it.
pub fn emit_import(sig: &Signature) -> String {
    debug_assert_eq!(sig.direction, Direction::Import);
    let ret = cpp_type(&sig.ret);
    let mut out = String::new();
    let _ = writeln!(
        out,
        "FLATCALL size_t flat_import_thunk_{}(size_t ptr_packed) {{",
        sig.ident
    );
    out.push_str("    static std::vector<uint8_t> s_buf;\n");
    for (i, p) in sig.params.iter().enumerate() {
        let ty = cpp_type(&p.ty);
        let _ = writeln!(out, "    {ty} arg{i} = flat_de<{ty}>(ptr_packed);");
    }
    let call_args = (0..sig.params.len())
        .map(|i| format!("arg{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    if sig.ret == BaseType::Unit {
        let _ = writeln!(out, "    {}({call_args});", sig.ident);
    } else {
        let _ = writeln!(out, "    {ret} out = {}({call_args});", sig.ident);
    }
    out.push_str("    s_buf.clear();\n");
    out.push_str("    flat_ser_begin(s_buf);\n");
    if sig.ret != BaseType::Unit {
        let _ = writeln!(out, "    flat_ser<{ret}>(s_buf, out);");
    }
    out.push_str("    flat_ser<size_t>(s_buf, (size_t) flat_release_static);\n");
    out.push_str("    return (size_t) s_buf.data();\n");
    out.push_str("}\n");
    out
}

/// One thunk, either direction. `offset` is the export's virtual offset
/// (ignored for imports, whose offsets matter only at registration).
pub fn emit(sig: &Signature, offset: u64) -> String {
    match sig.direction {
        Direction::Export => emit_export(sig, offset),
        Direction::Import => emit_import(sig),
    }
}

/// All thunks plus the init pass that registers each import thunk into
/// the image's registration slot at its virtual offset.
pub fn emit_all(sigs: &[(Signature, u64)]) -> String {
    let mut out = String::new();
    for (sig, offset) in sigs {
        out.push_str(&emit(sig, *offset));
        out.push('\n');
    }
    out.push_str("void flat_bindgen_init() {\n");
    for (sig, offset) in sigs {
        if sig.direction == Direction::Import {
            let _ = writeln!(
                out,
                "    *(size_t *)(FLAT_IMAGEBASE + 0x{offset:x}) = (size_t) flat_import_thunk_{};",
                sig.ident
            );
        }
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_nested_cpp_types() {
        let sig = Signature::parse(
            "import_1_f_2_1_x_prim_ptr_usize_1_y_vec_pair_prim_i8_prim_u64_prim_ptrmut_u8",
        )
        .unwrap();
        assert_eq!(cpp_type(&sig.params[0].ty), "const size_t*");
        assert_eq!(
            cpp_type(&sig.params[1].ty),
            "std::vector<std::pair<int8_t, uint64_t>>"
        );
        assert_eq!(cpp_type(&sig.ret), "uint8_t*");
    }

    #[test]
    fn export_thunk_serializes_then_calls_by_offset() {
        let sig =
            Signature::parse("export_4_init_2_1_t_prim_i32_1_n_prim_i32_prim_unit").unwrap();
        let code = emit_export(&sig, 0x1540);
        assert!(code.starts_with("void init(int32_t t, int32_t n) {"));
        let ser_t = code.find("flat_ser<int32_t>(buf, t);").unwrap();
        let ser_n = code.find("flat_ser<int32_t>(buf, n);").unwrap();
        let call = code.find("FLAT_IMAGEBASE + 0x1540").unwrap();
        assert!(ser_t < ser_n && ser_n < call);
        // unit return still releases the image's buffer
        assert!(code.contains("flat_de<size_t>(ret_packed))();"));
        assert!(!code.contains("return out"));
    }

    #[test]
    fn export_thunk_returns_deserialized_value() {
        let sig = Signature::parse("export_3_sum_1_1_v_bor_vec_prim_i64_prim_i64").unwrap();
        let code = emit_export(&sig, 0x200);
        assert!(code.starts_with("int64_t sum(const std::vector<int64_t>& v) {"));
        assert!(code.contains("int64_t out = flat_de<int64_t>(ret_packed);"));
        assert!(code.contains("return out;"));
    }

    #[test]
    fn import_thunk_deserializes_and_dispatches() {
        let sig =
            Signature::parse("import_5_guess_1_1_b_prim_string_pair_prim_i32_prim_i32").unwrap();
        let code = emit_import(&sig);
        assert!(code.contains("size_t flat_import_thunk_guess(size_t ptr_packed)"));
        assert!(code.contains("std::string arg0 = flat_de<std::string>(ptr_packed);"));
        assert!(code.contains("std::pair<int32_t, int32_t> out = guess(arg0);"));
        assert!(code.contains("flat_ser<std::pair<int32_t, int32_t>>(s_buf, out);"));
    }

    #[test]
    fn init_pass_registers_imports_only() {
        let ex = Signature::parse("export_4_game_0_prim_unit").unwrap();
        let im = Signature::parse("import_4_quit_0_prim_unit").unwrap();
        let code = emit_all(&[(ex, 0x100), (im, 0x180)]);
        assert!(code.contains("void flat_bindgen_init()"));
        assert!(code.contains(
            "*(size_t *)(FLAT_IMAGEBASE + 0x180) = (size_t) flat_import_thunk_quit;"
        ));
        assert!(!code.contains("0x100) = (size_t)"));
    }
}
