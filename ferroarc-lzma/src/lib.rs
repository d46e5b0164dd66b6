//! # FerroArc LZMA
//!
//! LZMA and LZMA2 compression and decompression in pure Rust.
//!
//! LZMA is the dictionary coder behind `.7z`, `.xz`, and `.lzma` files:
//! LZ77 matching over a sliding window, a 12-state packet machine, and a
//! binary range coder driven by adaptive probability models. LZMA2 wraps
//! the same machinery in chunks with reset control, which is what `.xz`
//! containers embed.
//!
//! ## Usage
//!
//! ```ignore
//! use ferroarc_lzma::{LzmaLevel, LzmaOptions, compress_bytes, decompress_bytes};
//!
//! let compressed = compress_bytes(b"Hello, World!", LzmaLevel::DEFAULT)?;
//! let restored = decompress_bytes(&compressed)?;
//! ```
//!
//! ## Stream layout
//!
//! An LZMA1 stream carries a 13-byte header:
//! 1. Properties byte (`(pb * 5 + lp) * 9 + lc`)
//! 2. Dictionary size (4 bytes, little-endian)
//! 3. Uncompressed size (8 bytes, little-endian; all-ones means unknown,
//!    terminated by the end-of-stream marker)
//!
//! followed by the range-coded payload. The encoder offers the two
//! reference normalization disciplines (see
//! [`range_coder::Normalization`]); one decoder reads both.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decoder;
pub mod dict;
pub mod encoder;
pub mod lzma2;
pub mod match_finder;
pub mod model;
pub mod parser;
pub mod price;
pub mod range_coder;

pub use decoder::{LzmaDecoder, decompress, decompress_raw};
pub use dict::SlidingWindow;
pub use encoder::{LzmaEncoder, compress, compress_raw};
pub use lzma2::{
    Lzma2Decoder, Lzma2Encoder, decode_lzma2, dict_size_from_props, encode_lzma2,
    props_from_dict_size,
};
pub use match_finder::{Match, MatchFinder, MatchFinderKind};
pub use model::{LzmaModel, LzmaProps, State};
pub use parser::ParserMode;
pub use range_coder::{Normalization, RangeDecoder, RangeEncoder};

use ferroarc_core::error::Result;

/// Smallest dictionary either coder will operate with.
pub const MIN_DICT_SIZE: u32 = 4096;

/// LZMA compression level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzmaLevel(u8);

impl LzmaLevel {
    /// Fastest compression (level 0).
    pub const FAST: Self = Self(0);
    /// Default compression (level 6).
    pub const DEFAULT: Self = Self(6);
    /// Best compression (level 9).
    pub const BEST: Self = Self(9);

    /// Create a new compression level, clamped to 0-9.
    pub fn new(level: u8) -> Self {
        Self(level.min(9))
    }

    /// Get the level value.
    pub fn level(&self) -> u8 {
        self.0
    }

    /// Dictionary size for this level.
    pub fn dict_size(&self) -> u32 {
        match self.0 {
            0 => 1 << 16, // 64 KB
            1 => 1 << 18, // 256 KB
            2 => 1 << 19, // 512 KB
            3 => 1 << 20, // 1 MB
            4 => 1 << 21, // 2 MB
            5 => 1 << 22, // 4 MB
            6 => 1 << 23, // 8 MB
            7 => 1 << 24, // 16 MB
            8 => 1 << 25, // 32 MB
            _ => 1 << 26, // 64 MB
        }
    }

    /// Match-length threshold that ends the search early.
    pub fn nice_len(&self) -> u32 {
        match self.0 {
            0..=3 => 32,
            4..=6 => 64,
            7 | 8 => 128,
            _ => 273,
        }
    }
}

impl Default for LzmaLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Encoder settings bundle.
#[derive(Debug, Clone)]
pub struct LzmaOptions {
    /// Stream properties (lc, lp, pb).
    pub props: LzmaProps,
    /// Dictionary size in bytes.
    pub dict_size: u32,
    /// Parsing strategy.
    pub mode: ParserMode,
    /// Range encoder normalization discipline.
    pub variant: Normalization,
    /// Match finder structure.
    pub mf: MatchFinderKind,
    /// Match length that stops the search.
    pub nice_len: u32,
    /// Match finder walk limit; 0 derives one from `nice_len`.
    pub depth_limit: u32,
}

impl LzmaOptions {
    /// Options derived from a compression level: fast levels pair the
    /// greedy parser with hash chains, higher levels the price-driven
    /// parser with the binary tree.
    pub fn preset(level: LzmaLevel) -> Self {
        let fast = level.level() <= 3;
        Self {
            props: LzmaProps::default(),
            dict_size: level.dict_size(),
            mode: if fast {
                ParserMode::Fast
            } else {
                ParserMode::Normal
            },
            variant: Normalization::default(),
            mf: if fast {
                MatchFinderKind::HashChain
            } else {
                MatchFinderKind::BinaryTree
            },
            nice_len: level.nice_len(),
            depth_limit: 0,
        }
    }

    /// Rough memory footprint of an encoder with these settings: the
    /// buffered window, the finder tables, and the probability arrays.
    pub fn mem_usage_estimate(&self) -> u64 {
        let dict = self.dict_size as u64;
        let finder = match self.mf {
            MatchFinderKind::HashChain => 4 * dict,
            MatchFinderKind::BinaryTree => 8 * dict,
        };
        let literal = 2 * (0x300u64 << (self.props.lc + self.props.lp));
        dict + finder + literal + 10 * 1024
    }
}

impl Default for LzmaOptions {
    fn default() -> Self {
        Self::preset(LzmaLevel::DEFAULT)
    }
}

/// Compress data to a headered LZMA1 stream at the given level.
pub fn compress_bytes(data: &[u8], level: LzmaLevel) -> Result<Vec<u8>> {
    compress(data, &LzmaOptions::preset(level))
}

/// Decompress a headered LZMA1 stream from a byte slice.
pub fn decompress_bytes(data: &[u8]) -> Result<Vec<u8>> {
    use std::io::Cursor;
    decompress(Cursor::new(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_clamp() {
        assert_eq!(LzmaLevel::new(100).level(), 9);
        assert_eq!(LzmaLevel::FAST.level(), 0);
        assert_eq!(LzmaLevel::BEST.level(), 9);
    }

    #[test]
    fn test_level_dict_sizes() {
        assert_eq!(LzmaLevel::FAST.dict_size(), 1 << 16);
        assert_eq!(LzmaLevel::DEFAULT.dict_size(), 1 << 23);
        assert_eq!(LzmaLevel::BEST.dict_size(), 1 << 26);
    }

    #[test]
    fn test_preset_split() {
        let fast = LzmaOptions::preset(LzmaLevel::new(2));
        assert_eq!(fast.mode, ParserMode::Fast);
        assert_eq!(fast.mf, MatchFinderKind::HashChain);

        let best = LzmaOptions::preset(LzmaLevel::BEST);
        assert_eq!(best.mode, ParserMode::Normal);
        assert_eq!(best.mf, MatchFinderKind::BinaryTree);
        assert_eq!(best.nice_len, 273);
    }

    #[test]
    fn test_mem_estimate_scales_with_dict() {
        let small = LzmaOptions {
            dict_size: 1 << 16,
            ..LzmaOptions::default()
        };
        let large = LzmaOptions {
            dict_size: 1 << 24,
            ..LzmaOptions::default()
        };
        assert!(large.mem_usage_estimate() > small.mem_usage_estimate());
    }

    #[test]
    fn test_roundtrip_hello() {
        let original = b"Hello, LZMA World! This is a test of compression and decompression.";
        let compressed = compress_bytes(original, LzmaLevel::DEFAULT).unwrap();
        let decompressed = decompress_bytes(&compressed).unwrap();
        assert_eq!(decompressed, original);
    }

    #[test]
    fn test_roundtrip_all_levels() {
        let data = b"Level sweep: the same input must survive every preset. \
                     Level sweep: the same input must survive every preset.";
        for level in 0..=9 {
            let compressed = compress_bytes(data, LzmaLevel::new(level)).unwrap();
            let decompressed = decompress_bytes(&compressed).unwrap();
            assert_eq!(&decompressed[..], &data[..], "level {} roundtrip", level);
        }
    }

    #[test]
    fn test_roundtrip_empty() {
        let compressed = compress_bytes(b"", LzmaLevel::DEFAULT).unwrap();
        assert_eq!(decompress_bytes(&compressed).unwrap(), b"");
    }
}
