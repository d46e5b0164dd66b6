//! Bit-cost estimation for encoder decisions.
//!
//! Prices are integers in 1/64-bit units: encoding a bit `b` against a
//! probability `p` costs about `-log2(P(b)) * 64`. The table is frozen at
//! compile time and shared process-wide; it only ever steers parser
//! decisions and never touches the emitted bit stream.

use crate::range_coder::{PROB_BITS, PROB_MAX};

/// Price of one whole bit (the unit scale).
pub const BIT_PRICE: u32 = 1 << PRICE_SHIFT;

/// log2 of the price scale.
pub const PRICE_SHIFT: u32 = 6;

/// Probability bits folded away when bucketing the table.
const MOVE_REDUCING_BITS: u32 = 4;

/// One price per probability bucket (`prob >> 4`).
static PRICES: [u32; (PROB_MAX >> MOVE_REDUCING_BITS) as usize] = compute_prices();

const fn compute_prices() -> [u32; (PROB_MAX >> MOVE_REDUCING_BITS) as usize] {
    let mut prices = [0u32; (PROB_MAX >> MOVE_REDUCING_BITS) as usize];
    let mut idx = 0;
    while idx < prices.len() {
        // Bucket midpoint, raised to the 64th power by repeated squaring
        // with renormalization; the shifted-out bits count the log.
        let mut w: u64 = ((idx as u64) << MOVE_REDUCING_BITS) + (1 << (MOVE_REDUCING_BITS - 1));
        let mut bit_count: u32 = 0;
        let mut j = 0;
        while j < PRICE_SHIFT {
            w = w * w;
            bit_count <<= 1;
            while w >= (1 << 16) {
                w >>= 1;
                bit_count += 1;
            }
            j += 1;
        }
        prices[idx] = (PROB_BITS << PRICE_SHIFT) - 15 - bit_count;
        idx += 1;
    }
    prices
}

/// Price of encoding `bit` against `prob`.
#[inline]
pub fn bit_price(prob: u16, bit: u32) -> u32 {
    let p = if bit == 0 { prob } else { PROB_MAX - prob };
    PRICES[(p >> MOVE_REDUCING_BITS) as usize]
}

/// Price of `count` equiprobable bits.
#[inline]
pub fn direct_bits_price(count: u32) -> u32 {
    count << PRICE_SHIFT
}

/// Price of an `num_bits`-bit symbol through a balanced bit tree.
pub fn bit_tree_price(probs: &[u16], num_bits: u32, symbol: u32) -> u32 {
    let mut price = 0u32;
    let mut m = 1usize;
    for i in (0..num_bits).rev() {
        let bit = (symbol >> i) & 1;
        price += bit_price(probs[m], bit);
        m = (m << 1) | bit as usize;
    }
    price
}

/// Price of an `num_bits`-bit symbol through a reverse bit tree.
pub fn bit_tree_reverse_price(probs: &[u16], num_bits: u32, symbol: u32) -> u32 {
    let mut price = 0u32;
    let mut m = 1usize;
    for i in 0..num_bits {
        let bit = (symbol >> i) & 1;
        price += bit_price(probs[m], bit);
        m = (m << 1) | bit as usize;
    }
    price
}
