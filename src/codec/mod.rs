//! Printable-text codecs and literal rendering.
//!
//! Two schemes: radix-85 (simple, 4 bytes → 5 chars) and radix-91 (13-bit
//! packing, denser). Encoded text is spliced into generated source, so it
//! must be pre-escaped for the destination literal syntax; that rendering
//! lives here too.

pub mod base85;
pub mod base91;

/// How the encoded text will be embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralStyle {
    /// A Rust (raw) string literal: quote only, no escaping needed since
    /// both alphabets avoid `"` and `\`.
    RustString,
    /// A C string literal: `\` and `?` (trigraph hazard) are escaped.
    CString,
    /// A C array of string chunks, 4095 characters each, to stay under
    /// MSVC's string-literal limit.
    CArray,
}

/// Maximum chunk length for [`LiteralStyle::CArray`].
const C_ARRAY_CHUNK: usize = 4095;

fn escape_c(text: &str) -> String {
    text.replace('\\', "\\\\").replace('?', "\\?")
}

/// Render encoded text as a literal for its destination syntax.
pub fn render_literal(text: &str, style: LiteralStyle) -> String {
    match style {
        LiteralStyle::RustString => format!("\"{text}\""),
        LiteralStyle::CString => format!("\"{}\"", escape_c(text)),
        LiteralStyle::CArray => {
            let mut out = String::from("{\n");
            let bytes = text.as_bytes();
            for chunk in bytes.chunks(C_ARRAY_CHUNK) {
                let chunk = std::str::from_utf8(chunk).expect("codec output is ASCII");
                out.push('"');
                out.push_str(&escape_c(chunk));
                out.push_str("\",\n");
            }
            out.push('}');
            out
        }
    }
}

/// Base85 text with its self-delimiting `]` terminator appended (the
/// character is outside the base85 alphabet).
pub fn encode_base85_terminated(data: &[u8]) -> String {
    let mut out = base85::encode(data);
    out.push(']');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_string_escapes_backslash_and_question_mark() {
        assert_eq!(render_literal("a?b", LiteralStyle::CString), "\"a\\?b\"");
        assert_eq!(render_literal("a?b", LiteralStyle::RustString), "\"a?b\"");
    }

    #[test]
    fn c_array_chunks() {
        let text = "x".repeat(C_ARRAY_CHUNK + 10);
        let rendered = render_literal(&text, LiteralStyle::CArray);
        assert!(rendered.starts_with("{\n\""));
        assert!(rendered.ends_with("\",\n}"));
        assert_eq!(rendered.matches("\",\n").count(), 2);
    }

    #[test]
    fn base85_terminator_is_outside_alphabet() {
        assert!(!base85::ALPHABET.contains(&b']'));
        let text = encode_base85_terminated(&[1, 2, 3, 4]);
        assert!(text.ends_with(']'));
        let body = &text[..text.len() - 1];
        assert_eq!(base85::decode(body, 4).unwrap(), [1, 2, 3, 4]);
    }
}
