//! Error types for FerroArc operations.
//!
//! One error enum covers the whole compression core: header validation,
//! corrupt stream detection, dictionary range checks, and size accounting.
//! Continuation signals (`NeedMoreInput` / `NeedMoreOutput`) are not errors
//! and live in [`crate::coder::CoderStatus`] instead.

use std::io;
use thiserror::Error;

/// The main error type for FerroArc operations.
#[derive(Debug, Error)]
pub enum FerroArcError {
    /// I/O error from an underlying reader/writer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stream header failed validation (bad properties byte, zero
    /// dictionary size, truncated header).
    #[error("Malformed header: {message}")]
    MalformedHeader {
        /// Description of the header problem.
        message: String,
    },

    /// The compressed payload violates the coder invariants (unexpected
    /// end of input mid-packet, impossible range-coder state, bad
    /// end-of-stream marker).
    #[error("Malformed stream at offset {offset}: {message}")]
    MalformedStream {
        /// Uncompressed byte offset where the corruption was detected.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A back-reference points before the start of the stream or beyond
    /// the dictionary.
    #[error("Invalid back-reference distance: {distance} exceeds window of {available} bytes")]
    InvalidDistance {
        /// The offending distance.
        distance: u64,
        /// Number of bytes currently addressable.
        available: u64,
    },

    /// A packet would produce more output than the declared uncompressed
    /// size allows.
    #[error("Output overflow: stream declares {declared} bytes, packet would produce {produced}")]
    LengthOverflow {
        /// Size declared by the stream header.
        declared: u64,
        /// Size the stream tried to produce.
        produced: u64,
    },

    /// A reserved or unknown construct was encountered (e.g. an LZMA2
    /// control byte in the reserved range).
    #[error("Unsupported: {message}")]
    Unsupported {
        /// Description of the unsupported construct.
        message: String,
    },
}

/// Result type alias for FerroArc operations.
pub type Result<T> = std::result::Result<T, FerroArcError>;

impl FerroArcError {
    /// Create a malformed header error.
    pub fn malformed_header(message: impl Into<String>) -> Self {
        Self::MalformedHeader {
            message: message.into(),
        }
    }

    /// Create a malformed stream error.
    pub fn malformed_stream(offset: u64, message: impl Into<String>) -> Self {
        Self::MalformedStream {
            offset,
            message: message.into(),
        }
    }

    /// Create an invalid distance error.
    pub fn invalid_distance(distance: u64, available: u64) -> Self {
        Self::InvalidDistance {
            distance,
            available,
        }
    }

    /// Create a length overflow error.
    pub fn length_overflow(declared: u64, produced: u64) -> Self {
        Self::LengthOverflow { declared, produced }
    }

    /// Create an unsupported construct error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FerroArcError::malformed_header("props byte 0xFF out of range");
        assert!(err.to_string().contains("Malformed header"));

        let err = FerroArcError::invalid_distance(70000, 4096);
        assert!(err.to_string().contains("70000"));

        let err = FerroArcError::length_overflow(10, 12);
        assert!(err.to_string().contains("declares 10"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let err: FerroArcError = io_err.into();
        assert!(matches!(err, FerroArcError::Io(_)));
    }
}
