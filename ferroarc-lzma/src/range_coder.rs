//! Range coder for LZMA compression.
//!
//! The range coder is the binary arithmetic coder at the bottom of LZMA:
//! a 32-bit shrinking range, renormalized byte-wise whenever it drops
//! below 2^24, driven by 11-bit adaptive probabilities.
//!
//! The encoder comes in two reference-compatible flavours selected by
//! [`Normalization`]: the 7-Zip SDK lineage renormalizes *after* updating
//! `low`/`range` for a symbol, the XZ lineage renormalizes *before* the
//! next symbol. Both emit valid streams, but the bytes differ, so an
//! encoder sticks to one variant per stream. Decoding is agnostic: one
//! decoder reads either variant.

use ferroarc_core::error::{FerroArcError, Result};
use std::io::Read;

/// Number of bits in the probability model.
pub const PROB_BITS: u32 = 11;

/// Initial probability (midpoint, 50%).
pub const PROB_INIT: u16 = 1 << (PROB_BITS - 1);

/// Total probability weight (`2048`).
pub const PROB_MAX: u16 = 1 << PROB_BITS;

/// Adaptation shift for probability updates.
pub const MOVE_BITS: u32 = 5;

/// Renormalization threshold.
const TOP_VALUE: u32 = 1 << 24;

/// When the range encoder renormalizes relative to the symbol update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalization {
    /// Renormalize after encoding each symbol (7-Zip SDK behaviour).
    #[default]
    NormalizeAfter,
    /// Renormalize before encoding each symbol (XZ Utils behaviour).
    NormalizeBefore,
}

/// Range encoder writing into an internal buffer.
///
/// Output is drained incrementally with [`RangeEncoder::take_output`];
/// [`RangeEncoder::flush`] pushes the final five bytes the decoder needs
/// to read up to stream end.
#[derive(Debug)]
pub struct RangeEncoder {
    out: Vec<u8>,
    read_pos: usize,
    low: u64,
    range: u32,
    cache: u8,
    ff_pending: u32,
    variant: Normalization,
}

impl RangeEncoder {
    /// Create a new range encoder with the given normalization variant.
    pub fn new(variant: Normalization) -> Self {
        Self {
            out: Vec::new(),
            read_pos: 0,
            low: 0,
            range: 0xFFFF_FFFF,
            cache: 0,
            ff_pending: 0,
            variant,
        }
    }

    /// The normalization variant this encoder was built with.
    pub fn variant(&self) -> Normalization {
        self.variant
    }

    /// Emit one output byte from the top of `low`, carrying into the
    /// cached byte and any deferred `0xFF` run. A carry out of bit 31
    /// increments the cache byte and turns the queued `0xFF`s into zeros.
    fn shift_low(&mut self) {
        if self.low < 0xFF00_0000 || self.low > 0xFFFF_FFFF {
            let carry = (self.low >> 32) as u8;
            self.out.push(self.cache.wrapping_add(carry));
            for _ in 0..self.ff_pending {
                self.out.push(0xFFu8.wrapping_add(carry));
            }
            self.ff_pending = 0;
            self.cache = (self.low >> 24) as u8;
        } else {
            self.ff_pending += 1;
        }
        self.low = (self.low << 8) & 0xFFFF_FFFF;
    }

    fn normalize(&mut self) {
        while self.range < TOP_VALUE {
            self.range <<= 8;
            self.shift_low();
        }
    }

    /// Encode a single bit against an adaptive probability.
    pub fn encode_bit(&mut self, prob: &mut u16, bit: u32) {
        if self.variant == Normalization::NormalizeBefore {
            self.normalize();
        }

        let bound = (self.range >> PROB_BITS) * (*prob as u32);
        if bit == 0 {
            self.range = bound;
            *prob += (PROB_MAX - *prob) >> MOVE_BITS;
        } else {
            self.low += bound as u64;
            self.range -= bound;
            *prob -= *prob >> MOVE_BITS;
        }

        if self.variant == Normalization::NormalizeAfter {
            self.normalize();
        }
    }

    /// Encode a single equiprobable bit.
    pub fn encode_direct_bit(&mut self, bit: u32) {
        if self.variant == Normalization::NormalizeBefore {
            self.normalize();
        }

        self.range >>= 1;
        if bit != 0 {
            self.low += self.range as u64;
        }

        if self.variant == Normalization::NormalizeAfter {
            self.normalize();
        }
    }

    /// Encode `count` equiprobable bits, most significant first.
    pub fn encode_direct_bits(&mut self, value: u32, count: u32) {
        for i in (0..count).rev() {
            self.encode_direct_bit((value >> i) & 1);
        }
    }

    /// Encode an `num_bits`-bit symbol through a balanced bit tree.
    pub fn encode_bit_tree(&mut self, probs: &mut [u16], num_bits: u32, symbol: u32) {
        let mut m = 1usize;
        for i in (0..num_bits).rev() {
            let bit = (symbol >> i) & 1;
            self.encode_bit(&mut probs[m], bit);
            m = (m << 1) | bit as usize;
        }
    }

    /// Encode an `num_bits`-bit symbol through a bit tree, least
    /// significant bit first.
    pub fn encode_bit_tree_reverse(&mut self, probs: &mut [u16], num_bits: u32, symbol: u32) {
        let mut m = 1usize;
        for i in 0..num_bits {
            let bit = (symbol >> i) & 1;
            self.encode_bit(&mut probs[m], bit);
            m = (m << 1) | bit as usize;
        }
    }

    /// Flush the five final bytes.
    pub fn flush(&mut self) {
        for _ in 0..5 {
            self.shift_low();
        }
    }

    /// Number of buffered output bytes not yet drained.
    pub fn pending_out(&self) -> usize {
        self.out.len() - self.read_pos
    }

    /// Upper estimate of the stream size if flushed now; used for chunk
    /// budgeting.
    pub fn pending_bytes(&self) -> usize {
        self.out.len() - self.read_pos + self.ff_pending as usize + 5
    }

    /// Move buffered output bytes into `dst`, returning how many were
    /// copied.
    pub fn take_output(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.pending_out());
        dst[..n].copy_from_slice(&self.out[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        if self.read_pos == self.out.len() {
            self.out.clear();
            self.read_pos = 0;
        }
        n
    }

    /// Flush and return the complete output buffer.
    pub fn finish(mut self) -> Vec<u8> {
        self.flush();
        self.out.split_off(self.read_pos)
    }
}

impl Default for RangeEncoder {
    fn default() -> Self {
        Self::new(Normalization::NormalizeAfter)
    }
}

/// Range decoder state.
///
/// The decoder does not own its input; each operation pulls bytes from
/// the reader handed in, so the surrounding coder can suspend and resume
/// around buffer refills.
#[derive(Debug)]
pub struct RangeDecoder {
    range: u32,
    code: u32,
}

impl RangeDecoder {
    /// Create a decoder, consuming the five initialization bytes. The
    /// first byte is reserved and must be zero.
    pub fn new<R: Read>(reader: &mut R) -> Result<Self> {
        let mut init = [0u8; 5];
        reader.read_exact(&mut init)?;

        if init[0] != 0 {
            return Err(FerroArcError::malformed_stream(
                0,
                "nonzero reserved byte at range coder start",
            ));
        }

        Ok(Self {
            range: 0xFFFF_FFFF,
            code: u32::from_be_bytes([init[1], init[2], init[3], init[4]]),
        })
    }

    #[inline]
    fn normalize<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        if self.range < TOP_VALUE {
            let mut byte = [0u8; 1];
            reader.read_exact(&mut byte)?;
            self.range <<= 8;
            self.code = (self.code << 8) | byte[0] as u32;
        }
        Ok(())
    }

    /// Decode a single bit against an adaptive probability.
    pub fn decode_bit<R: Read>(&mut self, reader: &mut R, prob: &mut u16) -> Result<u32> {
        self.normalize(reader)?;

        let bound = (self.range >> PROB_BITS) * (*prob as u32);
        if self.code < bound {
            self.range = bound;
            *prob += (PROB_MAX - *prob) >> MOVE_BITS;
            Ok(0)
        } else {
            self.range -= bound;
            self.code -= bound;
            *prob -= *prob >> MOVE_BITS;
            Ok(1)
        }
    }

    /// Decode a single equiprobable bit.
    pub fn decode_direct_bit<R: Read>(&mut self, reader: &mut R) -> Result<u32> {
        self.normalize(reader)?;

        self.range >>= 1;
        self.code = self.code.wrapping_sub(self.range);
        if (self.code as i32) < 0 {
            self.code = self.code.wrapping_add(self.range);
            Ok(0)
        } else {
            Ok(1)
        }
    }

    /// Decode `count` equiprobable bits, most significant first.
    pub fn decode_direct_bits<R: Read>(&mut self, reader: &mut R, count: u32) -> Result<u32> {
        let mut result = 0u32;
        for _ in 0..count {
            result = (result << 1) | self.decode_direct_bit(reader)?;
        }
        Ok(result)
    }

    /// Decode an `num_bits`-bit symbol through a balanced bit tree.
    pub fn decode_bit_tree<R: Read>(
        &mut self,
        reader: &mut R,
        probs: &mut [u16],
        num_bits: u32,
    ) -> Result<u32> {
        let mut m = 1usize;
        for _ in 0..num_bits {
            let bit = self.decode_bit(reader, &mut probs[m])?;
            m = (m << 1) | bit as usize;
        }
        Ok(m as u32 - (1 << num_bits))
    }

    /// Decode an `num_bits`-bit symbol through a bit tree, least
    /// significant bit first.
    pub fn decode_bit_tree_reverse<R: Read>(
        &mut self,
        reader: &mut R,
        probs: &mut [u16],
        num_bits: u32,
    ) -> Result<u32> {
        let mut m = 1usize;
        let mut result = 0u32;
        for i in 0..num_bits {
            let bit = self.decode_bit(reader, &mut probs[m])?;
            m = (m << 1) | bit as usize;
            result |= bit << i;
        }
        Ok(result)
    }

    /// Whether the coder landed exactly on the end of a stream.
    pub fn is_finished_ok(&self) -> bool {
        self.code == 0
    }
}
