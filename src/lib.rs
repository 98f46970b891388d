//! Offline executable compaction pipeline.
//!
//! Takes a statically linked position-independent executable (ELF or PE)
//! and produces the pieces a self-extracting loader template splices in:
//!
//! - [`image`] extracts a flat loadable image plus an export/entry record.
//! - [`got`] rewrites global-offset-table indirections into direct calls
//!   so the image runs before relocation.
//! - [`container`] frames the image in a size-trimmed raw LZMA container.
//! - [`codec`] renders the container as radix-85 or radix-91 text for
//!   embedding in source literals.
//! - [`bindgen`] parses mangled export/import signatures and emits the
//!   C++ call thunks.
//!
//! The stages are independent; an orchestrator composes them as
//! extract, optionally eliminate, build, encode.

pub mod bindgen;
pub mod codec;
pub mod container;
pub mod error;
pub mod got;
pub mod image;
pub mod logging;

pub use error::{FlatbinError, Result};
pub use image::{extract, extract_path, Extraction, ExecutableImage, ExportSymbol, LoaderRecord};
