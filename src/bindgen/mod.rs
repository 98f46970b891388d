//! Signature grammar and thunk generation.
//!
//! Export and import symbols carry a mangled signature in their name.
//! [`parse`] turns those names into [`Signature`] values; [`emit`]
//! renders the C++ call thunks and the import registration pass that
//! bridge the host and the flat image.

pub mod emit;
pub mod parse;

pub use emit::{cpp_type, emit, emit_all, emit_export, emit_import};
pub use parse::{BaseType, Direction, InputMode, IntType, Param, Signature};
