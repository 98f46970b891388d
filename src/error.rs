//! Error types for the flatbin compaction pipeline.
//!
//! Every error here is fatal: the pipeline is one-shot and a half-produced
//! image must never be emitted, so there is no partial-success or retry path.

use thiserror::Error;

/// Main error type for flatbin operations.
#[derive(Debug, Error)]
pub enum FlatbinError {
    /// Binary format errors: bad magic, class, endianness, file type.
    #[error("Invalid binary format: {0}")]
    Format(String),

    /// An expected fixed byte pattern was absent or ambiguous
    /// (entry-point placeholder, GOT idiom, loader handshake byte).
    #[error("Pattern mismatch at offset {offset:#x}: {message}")]
    PatternMismatch { offset: u64, message: String },

    /// A mangled signature failed to parse or was not fully consumed.
    #[error("Signature grammar error in {input:?}: {message}")]
    Grammar { input: String, message: String },

    /// An offset or displacement exceeded an assumed bound.
    #[error("Size constraint violated: {0}")]
    SizeConstraint(String),

    /// File I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// LZMA stream construction or processing failure.
    #[error("Compression error: {0}")]
    Compress(String),

    /// External disassembly tool failed or produced undecodable output.
    #[error("External tool error: {0}")]
    Tool(String),
}

impl From<liblzma::stream::Error> for FlatbinError {
    fn from(err: liblzma::stream::Error) -> Self {
        FlatbinError::Compress(err.to_string())
    }
}

/// Result type alias for flatbin operations.
pub type Result<T> = std::result::Result<T, FlatbinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FlatbinError::Format("not an ELF or PE file".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid binary format: not an ELF or PE file"
        );

        let err = FlatbinError::PatternMismatch {
            offset: 0x1234,
            message: "entry byte is not clc".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Pattern mismatch at offset 0x1234: entry byte is not clc"
        );
    }

    #[test]
    fn test_grammar_error_carries_input() {
        let err = FlatbinError::Grammar {
            input: "export_x".to_string(),
            message: "identifier length is not a number".to_string(),
        };
        assert!(err.to_string().contains("export_x"));
    }
}
