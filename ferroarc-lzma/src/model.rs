//! LZMA probability models and the coder state machine.
//!
//! LZMA drives its range coder with context-dependent adaptive
//! probabilities:
//! - literal coding (context = previous byte high bits + position low bits)
//! - match length coding (two 3-bit tiers plus an 8-bit tier)
//! - distance coding (slot tree, special reverse trees, alignment bits)
//! - packet-type selection (`is_match`, `is_rep`, ... per state)
//!
//! Every encoder or decoder owns one [`LzmaModel`] holding the complete
//! set; nothing is shared between streams.

use crate::range_coder::PROB_INIT;

/// Default literal context bits.
pub const LC_DEFAULT: u32 = 3;

/// Default literal position bits.
pub const LP_DEFAULT: u32 = 0;

/// Default position bits.
pub const PB_DEFAULT: u32 = 2;

/// Maximum number of position states (`1 << 4`).
pub const POS_STATES_MAX: usize = 1 << 4;

/// Number of states in the LZMA state machine.
pub const NUM_STATES: usize = 12;

/// Number of bits in the low length tier.
pub const LEN_LOW_BITS: u32 = 3;
/// Number of bits in the mid length tier.
pub const LEN_MID_BITS: u32 = 3;
/// Number of bits in the high length tier.
pub const LEN_HIGH_BITS: u32 = 8;

/// Number of low length symbols.
pub const LEN_LOW_SYMBOLS: usize = 1 << LEN_LOW_BITS;
/// Number of mid length symbols.
pub const LEN_MID_SYMBOLS: usize = 1 << LEN_MID_BITS;
/// Number of high length symbols.
pub const LEN_HIGH_SYMBOLS: usize = 1 << LEN_HIGH_BITS;

/// Minimum match length.
pub const MATCH_LEN_MIN: usize = 2;

/// Maximum match length.
pub const MATCH_LEN_MAX: usize = 273;

/// Number of distance slots.
pub const DIST_SLOTS: usize = 64;

/// Number of length contexts for the distance slot tree.
pub const DIST_STATES: usize = 4;

/// Number of alignment bits in a distance.
pub const DIST_ALIGN_BITS: u32 = 4;
/// Size of the alignment probability table.
pub const DIST_ALIGN_SIZE: usize = 1 << DIST_ALIGN_BITS;

/// First slot that uses the special probability table.
pub const DIST_MODEL_START: usize = 4;

/// First slot that uses direct bits instead of the special table.
pub const END_POS_MODEL_INDEX: usize = 14;

/// Distances below this value are fully covered by the special table.
pub const FULL_DISTANCES: usize = 128;

/// Size of the packed special-distance probability table (slots 4-13).
pub const DIST_SPECIAL_SIZE: usize = FULL_DISTANCES - END_POS_MODEL_INDEX;

/// Distance context derived from a match length.
#[inline]
pub fn dist_state(len: u32) -> usize {
    (len as usize - MATCH_LEN_MIN).min(DIST_STATES - 1)
}

/// LZMA state machine state.
///
/// Twelve states encode the recent packet history. States 0-6 follow a
/// literal; states 7-11 follow a match/rep, and select matched-literal
/// coding for the next literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State(u8);

impl State {
    /// Initial state.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Get the state value (0-11).
    pub fn value(self) -> usize {
        self.0 as usize
    }

    /// Whether the previous packet was a literal.
    pub fn is_literal(self) -> bool {
        self.0 < 7
    }

    /// Update state after a literal.
    pub fn update_literal(&mut self) {
        self.0 = if self.0 < 4 {
            0
        } else if self.0 < 10 {
            self.0 - 3
        } else {
            self.0 - 6
        };
    }

    /// Update state after a match.
    pub fn update_match(&mut self) {
        self.0 = if self.0 < 7 { 7 } else { 10 };
    }

    /// Update state after a long rep.
    pub fn update_long_rep(&mut self) {
        self.0 = if self.0 < 7 { 8 } else { 11 };
    }

    /// Update state after a short rep.
    pub fn update_short_rep(&mut self) {
        self.0 = if self.0 < 7 { 9 } else { 11 };
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// LZMA properties (lc, lp, pb).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzmaProps {
    /// Literal context bits (0-8).
    pub lc: u32,
    /// Literal position bits (0-4).
    pub lp: u32,
    /// Position bits (0-4).
    pub pb: u32,
}

impl LzmaProps {
    /// Create new properties. Ranges are checked by [`LzmaProps::is_valid`]
    /// at coder construction.
    pub fn new(lc: u32, lp: u32, pb: u32) -> Self {
        Self { lc, lp, pb }
    }

    /// Whether the properties fall in the encodable ranges.
    pub fn is_valid(&self) -> bool {
        self.lc <= 8 && self.lp <= 4 && self.pb <= 4
    }

    /// Parse from a properties byte. Rejects values above 224.
    pub fn from_byte(byte: u8) -> Option<Self> {
        let pb = byte as u32 / 45;
        let remaining = byte as u32 - pb * 45;
        let lp = remaining / 9;
        let lc = remaining - lp * 9;

        if lc > 8 || lp > 4 || pb > 4 {
            return None;
        }

        Some(Self { lc, lp, pb })
    }

    /// Encode to a properties byte: `(pb * 5 + lp) * 9 + lc`.
    pub fn to_byte(&self) -> u8 {
        ((self.pb * 5 + self.lp) * 9 + self.lc) as u8
    }

    /// Number of literal subcoders (`1 << (lc + lp)`).
    pub fn num_literal_contexts(&self) -> usize {
        1 << (self.lc + self.lp)
    }

    /// Number of position states (`1 << pb`).
    pub fn num_pos_states(&self) -> usize {
        1 << self.pb
    }

    /// Position mask (`(1 << pb) - 1`).
    pub fn pos_mask(&self) -> u32 {
        (1 << self.pb) - 1
    }
}

impl Default for LzmaProps {
    fn default() -> Self {
        Self {
            lc: LC_DEFAULT,
            lp: LP_DEFAULT,
            pb: PB_DEFAULT,
        }
    }
}

/// Length coder model: a choice pair plus three bit-tree tiers.
///
/// Lengths 2-9 go through `low` (per position state), 10-17 through `mid`
/// (per position state), 18-273 through the shared `high` tree.
#[derive(Debug, Clone)]
pub struct LengthModel {
    /// First tier choice bit.
    pub choice: u16,
    /// Second tier choice bit.
    pub choice2: u16,
    /// Low tier probabilities, indexed by position state.
    pub low: Vec<[u16; LEN_LOW_SYMBOLS]>,
    /// Mid tier probabilities, indexed by position state.
    pub mid: Vec<[u16; LEN_MID_SYMBOLS]>,
    /// High tier probabilities, shared across position states.
    pub high: [u16; LEN_HIGH_SYMBOLS],
}

impl LengthModel {
    /// Create a new length model for `num_pos_states` position states.
    pub fn new(num_pos_states: usize) -> Self {
        Self {
            choice: PROB_INIT,
            choice2: PROB_INIT,
            low: vec![[PROB_INIT; LEN_LOW_SYMBOLS]; num_pos_states],
            mid: vec![[PROB_INIT; LEN_MID_SYMBOLS]; num_pos_states],
            high: [PROB_INIT; LEN_HIGH_SYMBOLS],
        }
    }

    /// Reset all probabilities to the midpoint.
    pub fn reset(&mut self) {
        self.choice = PROB_INIT;
        self.choice2 = PROB_INIT;
        for arr in &mut self.low {
            arr.fill(PROB_INIT);
        }
        for arr in &mut self.mid {
            arr.fill(PROB_INIT);
        }
        self.high.fill(PROB_INIT);
    }
}

/// Literal coder model.
///
/// Each literal context owns a 0x300-entry block: 0x100 entries for the
/// plain bit tree plus two 0x100 subranges used in matched mode.
#[derive(Debug, Clone)]
pub struct LiteralModel {
    /// Probability blocks, one per literal context.
    pub probs: Vec<[u16; 0x300]>,
    lc: u32,
    lp: u32,
}

impl LiteralModel {
    /// Create a new literal model.
    pub fn new(lc: u32, lp: u32) -> Self {
        Self {
            probs: vec![[PROB_INIT; 0x300]; 1 << (lc + lp)],
            lc,
            lp,
        }
    }

    /// Reset all probabilities to the midpoint.
    pub fn reset(&mut self) {
        for block in &mut self.probs {
            block.fill(PROB_INIT);
        }
    }

    /// Literal context index from write position and previous byte.
    #[inline]
    pub fn context_index(&self, pos: u64, prev_byte: u8) -> usize {
        let low_pos = (pos & ((1u64 << self.lp) - 1)) as usize;
        let high_prev = (prev_byte as usize) >> (8 - self.lc as usize);
        (low_pos << self.lc) | high_prev
    }
}

/// Offsets of each slot's block inside the packed special-distance table.
const DIST_SPECIAL_OFFSETS: [usize; END_POS_MODEL_INDEX - DIST_MODEL_START] =
    [0, 1, 2, 5, 8, 15, 22, 37, 52, 83];

/// Distance coder model.
#[derive(Debug, Clone)]
pub struct DistanceModel {
    /// Slot tree probabilities, indexed by length context.
    pub slot: [[u16; DIST_SLOTS]; DIST_STATES],
    /// Packed special-distance probabilities spanning slots 4-13.
    pub special: [u16; DIST_SPECIAL_SIZE],
    /// Alignment bit probabilities.
    pub align: [u16; DIST_ALIGN_SIZE],
}

impl DistanceModel {
    /// Create a new distance model.
    pub fn new() -> Self {
        Self {
            slot: [[PROB_INIT; DIST_SLOTS]; DIST_STATES],
            special: [PROB_INIT; DIST_SPECIAL_SIZE],
            align: [PROB_INIT; DIST_ALIGN_SIZE],
        }
    }

    /// Reset all probabilities to the midpoint.
    pub fn reset(&mut self) {
        for s in &mut self.slot {
            s.fill(PROB_INIT);
        }
        self.special.fill(PROB_INIT);
        self.align.fill(PROB_INIT);
    }

    /// The special-table block for `slot` (4-13), holding the reverse
    /// bit-tree of `(slot >> 1) - 1` bits.
    #[inline]
    pub fn special_block(&mut self, slot: usize) -> &mut [u16] {
        let footer_bits = (slot >> 1) - 1;
        let start = DIST_SPECIAL_OFFSETS[slot - DIST_MODEL_START];
        &mut self.special[start..start + (1 << footer_bits) - 1]
    }

    /// Shared read-only view of [`DistanceModel::special_block`].
    #[inline]
    pub fn special_block_ref(&self, slot: usize) -> &[u16] {
        let footer_bits = (slot >> 1) - 1;
        let start = DIST_SPECIAL_OFFSETS[slot - DIST_MODEL_START];
        &self.special[start..start + (1 << footer_bits) - 1]
    }
}

impl Default for DistanceModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Complete LZMA probability model.
#[derive(Debug, Clone)]
pub struct LzmaModel {
    /// The stream properties this model was built for.
    pub props: LzmaProps,

    /// Packet-type probabilities, per state and position state.
    pub is_match: [[u16; POS_STATES_MAX]; NUM_STATES],
    /// Rep-vs-match probabilities, per state.
    pub is_rep: [u16; NUM_STATES],
    /// Rep0 selector probabilities.
    pub is_rep0: [u16; NUM_STATES],
    /// Rep1 selector probabilities.
    pub is_rep1: [u16; NUM_STATES],
    /// Rep2 selector probabilities.
    pub is_rep2: [u16; NUM_STATES],
    /// Short-rep-vs-long-rep0 probabilities.
    pub is_rep0_long: [[u16; POS_STATES_MAX]; NUM_STATES],

    /// Match length model.
    pub match_len: LengthModel,
    /// Rep length model.
    pub rep_len: LengthModel,

    /// Literal model.
    pub literal: LiteralModel,
    /// Distance model.
    pub distance: DistanceModel,
}

impl LzmaModel {
    /// Create a fresh model for the given properties.
    pub fn new(props: LzmaProps) -> Self {
        let num_pos_states = props.num_pos_states();

        Self {
            props,
            is_match: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            is_rep: [PROB_INIT; NUM_STATES],
            is_rep0: [PROB_INIT; NUM_STATES],
            is_rep1: [PROB_INIT; NUM_STATES],
            is_rep2: [PROB_INIT; NUM_STATES],
            is_rep0_long: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            match_len: LengthModel::new(num_pos_states),
            rep_len: LengthModel::new(num_pos_states),
            literal: LiteralModel::new(props.lc, props.lp),
            distance: DistanceModel::new(),
        }
    }

    /// Reset every probability to the midpoint.
    pub fn reset(&mut self) {
        for row in &mut self.is_match {
            row.fill(PROB_INIT);
        }
        self.is_rep.fill(PROB_INIT);
        self.is_rep0.fill(PROB_INIT);
        self.is_rep1.fill(PROB_INIT);
        self.is_rep2.fill(PROB_INIT);
        for row in &mut self.is_rep0_long {
            row.fill(PROB_INIT);
        }
        self.match_len.reset();
        self.rep_len.reset();
        self.literal.reset();
        self.distance.reset();
    }
}

/// Distance slot for a distance value.
#[inline]
pub fn dist_slot(dist: u32) -> u32 {
    if dist < DIST_MODEL_START as u32 {
        return dist;
    }

    let bits = 32 - dist.leading_zeros();
    ((bits - 1) << 1) | ((dist >> (bits - 2)) & 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions_total() {
        // Every (state, event) pair must land back in 0..12.
        for s in 0..NUM_STATES as u8 {
            for event in 0..4 {
                let mut state = State(s);
                match event {
                    0 => state.update_literal(),
                    1 => state.update_match(),
                    2 => state.update_long_rep(),
                    _ => state.update_short_rep(),
                }
                assert!(state.value() < NUM_STATES, "state {} event {}", s, event);
            }
        }
    }

    #[test]
    fn test_literal_transition_table() {
        let expected = [0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 4, 5];
        for (s, &want) in expected.iter().enumerate() {
            let mut state = State(s as u8);
            state.update_literal();
            assert_eq!(state.value(), want, "literal from state {}", s);
        }
    }

    #[test]
    fn test_matched_literal_predicate() {
        let mut state = State::new();
        assert!(state.is_literal());
        state.update_match();
        assert_eq!(state.value(), 7);
        assert!(!state.is_literal());
        state.update_literal();
        assert!(state.is_literal());
    }

    #[test]
    fn test_props_byte_roundtrip() {
        for lc in 0..=8 {
            for lp in 0..=4 {
                for pb in 0..=4 {
                    let props = LzmaProps::new(lc, lp, pb);
                    let byte = props.to_byte();
                    assert!(byte <= 224);
                    assert_eq!(LzmaProps::from_byte(byte), Some(props));
                }
            }
        }
    }

    #[test]
    fn test_props_byte_rejects_out_of_range() {
        assert!(LzmaProps::from_byte(225).is_none());
        assert!(LzmaProps::from_byte(255).is_none());
    }

    #[test]
    fn test_default_props() {
        let props = LzmaProps::default();
        assert_eq!(props.to_byte(), 0x5D);
    }

    #[test]
    fn test_dist_slot() {
        assert_eq!(dist_slot(0), 0);
        assert_eq!(dist_slot(1), 1);
        assert_eq!(dist_slot(2), 2);
        assert_eq!(dist_slot(3), 3);
        assert_eq!(dist_slot(4), 4);
        assert_eq!(dist_slot(5), 4);
        assert_eq!(dist_slot(6), 5);
        assert_eq!(dist_slot(96), 13);
        assert_eq!(dist_slot(u32::MAX), 63);
    }

    #[test]
    fn test_special_blocks_tile_the_table() {
        let mut covered = 0usize;
        let mut model = DistanceModel::new();
        for slot in DIST_MODEL_START..END_POS_MODEL_INDEX {
            covered += model.special_block(slot).len();
        }
        assert_eq!(covered, DIST_SPECIAL_SIZE);
    }

    #[test]
    fn test_literal_context_index() {
        let lit = LiteralModel::new(3, 0);
        // lc=3: context is the top three bits of the previous byte.
        assert_eq!(lit.context_index(0, 0xFF), 7);
        assert_eq!(lit.context_index(0, 0x20), 1);
        let lit = LiteralModel::new(0, 2);
        assert_eq!(lit.context_index(5, 0xFF), 1);
    }

    #[test]
    fn test_model_reset() {
        let mut model = LzmaModel::new(LzmaProps::default());
        model.is_match[3][1] = 77;
        model.rep_len.choice = 5;
        model.reset();
        assert_eq!(model.is_match[3][1], PROB_INIT);
        assert_eq!(model.rep_len.choice, PROB_INIT);
    }
}
