//! # FerroArc Core
//!
//! Shared building blocks for the FerroArc compression crates:
//!
//! - [`error`] - the common error type and `Result` alias
//! - [`coder`] - streaming compressor/decompressor traits and status codes
//!
//! Compression algorithms (LZMA, LZMA2, ...) live in sibling crates and
//! implement the traits defined here. Archive formats consume those
//! algorithms exclusively through the stepped byte-in/byte-out interface,
//! so the core stays free of any format knowledge.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coder;
pub mod error;

pub use coder::{CoderStatus, Compressor, Decompressor};
pub use error::{FerroArcError, Result};
