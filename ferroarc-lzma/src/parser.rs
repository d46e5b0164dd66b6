//! Packet selection for the encoder.
//!
//! Two strategies. [`ParserMode::Fast`] takes the longest match greedily,
//! deferring to a literal when the very next position offers a strictly
//! longer match. [`ParserMode::Normal`] runs a price-driven dynamic
//! program over a bounded lookahead block, tracking coder state and the
//! rep ring per node, and backtracks the cheapest path into a decision
//! list.
//!
//! Decisions are replayed through the live adaptive models by the
//! encoder; the prices computed here steer choices only and never shape
//! the emitted bits themselves.

use crate::match_finder::{Match, MatchFinder, rep_match_len};
use crate::model::{
    DIST_ALIGN_BITS, DIST_MODEL_START, END_POS_MODEL_INDEX, LEN_LOW_SYMBOLS, LEN_MID_SYMBOLS,
    LengthModel, LzmaModel, MATCH_LEN_MAX, MATCH_LEN_MIN, State, dist_slot, dist_state,
};
use crate::price::{bit_price, bit_tree_price, bit_tree_reverse_price, direct_bits_price};

/// Parsing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserMode {
    /// Greedy with one position of lazy lookahead.
    Fast,
    /// Price-optimized dynamic programming.
    #[default]
    Normal,
}

/// One encoding decision for the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Emit one literal byte.
    Literal,
    /// Emit a length-1 reference to `reps[0]`.
    ShortRep,
    /// Emit a rep match reusing ring slot `index`.
    Rep {
        /// Rep ring slot (0-3).
        index: usize,
        /// Match length.
        len: u32,
    },
    /// Emit a match with a fresh distance.
    Match {
        /// Distance (0-based).
        dist: u32,
        /// Match length.
        len: u32,
    },
}

impl Decision {
    /// Number of input bytes this decision consumes.
    pub fn advance(&self) -> usize {
        match *self {
            Decision::Literal | Decision::ShortRep => 1,
            Decision::Rep { len, .. } | Decision::Match { len, .. } => len as usize,
        }
    }
}

/// Price view over a frozen model snapshot.
pub(crate) struct Prices<'a> {
    model: &'a LzmaModel,
}

impl<'a> Prices<'a> {
    pub(crate) fn new(model: &'a LzmaModel) -> Self {
        Self { model }
    }

    /// Full price of a literal packet (`is_match = 0` plus the tree walk).
    pub(crate) fn literal_packet(
        &self,
        state: State,
        pos_state: usize,
        pos: u64,
        prev_byte: u8,
        cur_byte: u8,
        match_byte: Option<u8>,
    ) -> u32 {
        let m = self.model;
        let mut price = bit_price(m.is_match[state.value()][pos_state], 0);
        let ctx = m.literal.context_index(pos, prev_byte);
        let block = &m.literal.probs[ctx];

        price += match match_byte {
            Some(mb) if !state.is_literal() => Self::matched_literal_tree(block, cur_byte, mb),
            _ => Self::normal_literal_tree(block, cur_byte),
        };
        price
    }

    fn normal_literal_tree(block: &[u16; 0x300], cur_byte: u8) -> u32 {
        let mut price = 0;
        let mut symbol = (cur_byte as usize) | 0x100;
        let mut node = 1usize;
        while node < 0x100 {
            let bit = (symbol >> 7) & 1;
            symbol <<= 1;
            price += bit_price(block[node], bit as u32);
            node = (node << 1) | bit;
        }
        price
    }

    fn matched_literal_tree(block: &[u16; 0x300], cur_byte: u8, match_byte: u8) -> u32 {
        let mut price = 0;
        let mut symbol = (cur_byte as usize) | 0x100;
        let mut match_sym = (match_byte as usize) << 1;
        let mut node = 1usize;
        loop {
            let match_bit = (match_sym >> 8) & 1;
            match_sym <<= 1;
            let bit = (symbol >> 7) & 1;
            symbol <<= 1;
            price += bit_price(block[0x100 + (match_bit << 8) + node], bit as u32);
            node = (node << 1) | bit;
            if node >= 0x100 {
                break;
            }
            if bit != match_bit {
                while node < 0x100 {
                    let bit = (symbol >> 7) & 1;
                    symbol <<= 1;
                    price += bit_price(block[node], bit as u32);
                    node = (node << 1) | bit;
                }
                break;
            }
        }
        price
    }

    pub(crate) fn short_rep(&self, state: usize, pos_state: usize) -> u32 {
        let m = self.model;
        bit_price(m.is_match[state][pos_state], 1)
            + bit_price(m.is_rep[state], 1)
            + bit_price(m.is_rep0[state], 0)
            + bit_price(m.is_rep0_long[state][pos_state], 0)
    }

    /// Price of selecting rep slot `index`, before the length coder.
    pub(crate) fn rep_base(&self, index: usize, state: usize, pos_state: usize) -> u32 {
        let m = self.model;
        let mut price =
            bit_price(m.is_match[state][pos_state], 1) + bit_price(m.is_rep[state], 1);
        match index {
            0 => {
                price += bit_price(m.is_rep0[state], 0);
                price += bit_price(m.is_rep0_long[state][pos_state], 1);
            }
            1 => {
                price += bit_price(m.is_rep0[state], 1);
                price += bit_price(m.is_rep1[state], 0);
            }
            2 => {
                price += bit_price(m.is_rep0[state], 1);
                price += bit_price(m.is_rep1[state], 1);
                price += bit_price(m.is_rep2[state], 0);
            }
            _ => {
                price += bit_price(m.is_rep0[state], 1);
                price += bit_price(m.is_rep1[state], 1);
                price += bit_price(m.is_rep2[state], 1);
            }
        }
        price
    }

    /// Price of selecting a fresh match, before length and distance.
    pub(crate) fn match_base(&self, state: usize, pos_state: usize) -> u32 {
        let m = self.model;
        bit_price(m.is_match[state][pos_state], 1) + bit_price(m.is_rep[state], 0)
    }

    pub(crate) fn length(&self, lm: &LengthModel, len: u32, pos_state: usize) -> u32 {
        let l = len as usize - MATCH_LEN_MIN;
        if l < LEN_LOW_SYMBOLS {
            bit_price(lm.choice, 0) + bit_tree_price(&lm.low[pos_state], 3, l as u32)
        } else if l < LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS {
            bit_price(lm.choice, 1)
                + bit_price(lm.choice2, 0)
                + bit_tree_price(&lm.mid[pos_state], 3, (l - LEN_LOW_SYMBOLS) as u32)
        } else {
            bit_price(lm.choice, 1)
                + bit_price(lm.choice2, 1)
                + bit_tree_price(&lm.high, 8, (l - LEN_LOW_SYMBOLS - LEN_MID_SYMBOLS) as u32)
        }
    }

    pub(crate) fn distance(&self, dist: u32, len: u32) -> u32 {
        let m = self.model;
        let slot = dist_slot(dist);
        let ds = dist_state(len);
        let mut price = bit_tree_price(&m.distance.slot[ds], 6, slot);

        if slot >= DIST_MODEL_START as u32 {
            let footer = (slot >> 1) - 1;
            let base = (2 | (slot & 1)) << footer;
            let reduced = dist - base;

            if (slot as usize) < END_POS_MODEL_INDEX {
                let block = m.distance.special_block_ref(slot as usize);
                let mut node = 1usize;
                for i in 0..footer {
                    let bit = (reduced >> i) & 1;
                    price += bit_price(block[node - 1], bit);
                    node = (node << 1) | bit as usize;
                }
            } else {
                price += direct_bits_price(footer - DIST_ALIGN_BITS);
                price += bit_tree_reverse_price(
                    &m.distance.align,
                    DIST_ALIGN_BITS,
                    reduced & ((1 << DIST_ALIGN_BITS) - 1),
                );
            }
        }
        price
    }
}

/// A distinctly closer candidate is worth one byte of length.
fn change_pair(small_dist: u32, big_dist: u32) -> bool {
    ((small_dist as u64) << 7) <= big_dist as u64
}

/// Greedy decision with one position of lazy lookahead.
pub(crate) fn decide_fast(
    data: &[u8],
    pos: usize,
    reps: [u32; 4],
    finder: &mut MatchFinder,
) -> Decision {
    let avail = data.len() - pos;
    if avail < MATCH_LEN_MIN {
        return Decision::Literal;
    }

    let max_len = avail.min(MATCH_LEN_MAX);
    let nice = (finder.nice_len() as usize).min(max_len);

    let mut rep_len = 0u32;
    let mut rep_idx = 0usize;
    for (k, &rep) in reps.iter().enumerate() {
        let l = rep_match_len(data, pos, rep, max_len);
        if l > rep_len {
            rep_len = l;
            rep_idx = k;
        }
    }
    if rep_len as usize >= nice {
        return Decision::Rep {
            index: rep_idx,
            len: rep_len,
        };
    }

    let ms = finder.matches_at(data, pos).to_vec();
    let (mut main_dist, mut main_len) = ms.last().map(|m| (m.dist, m.len)).unwrap_or((0, 0));

    // Step down while a much closer candidate is only one byte shorter.
    let mut idx = ms.len();
    while idx >= 2 && main_len == ms[idx - 2].len + 1 && change_pair(ms[idx - 2].dist, main_dist) {
        idx -= 1;
        main_dist = ms[idx - 1].dist;
        main_len = ms[idx - 1].len;
    }

    if main_len as usize >= nice {
        return Decision::Match {
            dist: main_dist,
            len: main_len,
        };
    }

    // A two-byte match far away costs more than the literals it saves.
    if main_len == 2 && main_dist >= 512 {
        main_len = 0;
    }

    if rep_len >= 2
        && (rep_len + 1 >= main_len
            || (rep_len + 2 >= main_len && main_dist >= (1 << 9))
            || (rep_len + 3 >= main_len && main_dist >= (1 << 15)))
    {
        return Decision::Rep {
            index: rep_idx,
            len: rep_len,
        };
    }

    if main_len < MATCH_LEN_MIN as u32 {
        return Decision::Literal;
    }

    // Lazy step: a strictly longer match one byte ahead wins a literal now.
    if avail > MATCH_LEN_MIN {
        let next_len = finder
            .matches_at(data, pos + 1)
            .last()
            .map(|m| m.len)
            .unwrap_or(0);
        if next_len > main_len {
            return Decision::Literal;
        }
    }

    Decision::Match {
        dist: main_dist,
        len: main_len,
    }
}

/// Lookahead horizon of the dynamic program, in input bytes.
const OPT_HORIZON: usize = 128;

#[derive(Debug, Clone, Copy)]
enum Step {
    None,
    Literal,
    ShortRep,
    Rep(u8),
    Match(u32),
}

#[derive(Debug, Clone, Copy)]
struct OptNode {
    price: u32,
    prev: u32,
    step: Step,
    len: u32,
    state: State,
    reps: [u32; 4],
}

impl OptNode {
    fn unreached() -> Self {
        Self {
            price: u32::MAX,
            prev: 0,
            step: Step::None,
            len: 0,
            state: State::new(),
            reps: [0; 4],
        }
    }
}

fn relax(opts: &mut [OptNode], from: usize, to: usize, price: u32, step: Step, len: u32) {
    if price >= opts[to].price {
        return;
    }
    let from_node = opts[from];
    let mut state = from_node.state;
    let mut reps = from_node.reps;
    match step {
        Step::Literal => state.update_literal(),
        Step::ShortRep => state.update_short_rep(),
        Step::Rep(k) => {
            state.update_long_rep();
            let d = reps[k as usize];
            for j in (1..=k as usize).rev() {
                reps[j] = reps[j - 1];
            }
            reps[0] = d;
        }
        Step::Match(dist) => {
            state.update_match();
            reps = [dist, reps[0], reps[1], reps[2]];
        }
        Step::None => {}
    }
    opts[to] = OptNode {
        price,
        prev: from as u32,
        step,
        len,
        state,
        reps,
    };
}

/// Plan a block of decisions starting at `pos` with the given coder state.
///
/// The returned list is non-empty and consumes at least one byte.
pub(crate) fn plan_block(
    data: &[u8],
    pos: usize,
    state: State,
    reps: [u32; 4],
    model: &LzmaModel,
    finder: &mut MatchFinder,
) -> Vec<Decision> {
    let avail = data.len() - pos;
    if avail < MATCH_LEN_MIN {
        return vec![Decision::Literal];
    }

    let max_len = avail.min(MATCH_LEN_MAX);
    let nice = (finder.nice_len() as usize).min(max_len);

    let mut best_rep_len = 0u32;
    let mut best_rep = 0usize;
    for (k, &rep) in reps.iter().enumerate() {
        let l = rep_match_len(data, pos, rep, max_len);
        if l > best_rep_len {
            best_rep_len = l;
            best_rep = k;
        }
    }

    let first_matches = finder.matches_at(data, pos).to_vec();

    if best_rep_len as usize >= nice {
        return vec![Decision::Rep {
            index: best_rep,
            len: best_rep_len,
        }];
    }
    if let Some(m) = first_matches.last() {
        if m.len as usize >= nice {
            return vec![Decision::Match {
                dist: m.dist,
                len: m.len,
            }];
        }
    }

    let horizon = avail.min(OPT_HORIZON);
    let cap = (horizon + MATCH_LEN_MAX).min(avail);
    let mut opts = vec![OptNode::unreached(); cap + 1];
    opts[0] = OptNode {
        price: 0,
        prev: 0,
        step: Step::None,
        len: 0,
        state,
        reps,
    };

    let pos_mask = model.props.pos_mask();
    let prices = Prices::new(model);

    for i in 0..horizon {
        if opts[i].price == u32::MAX {
            continue;
        }
        let node = opts[i];
        let p = pos + i;
        let ps = (p as u32 & pos_mask) as usize;
        let sv = node.state.value();
        let avail_i = data.len() - p;
        let max_len_i = avail_i.min(MATCH_LEN_MAX).min(cap - i);

        let prev_byte = if p == 0 { 0 } else { data[p - 1] };
        let cur_byte = data[p];

        // Literal.
        let match_byte = if !node.state.is_literal() && (node.reps[0] as usize) < p {
            Some(data[p - node.reps[0] as usize - 1])
        } else {
            None
        };
        let lit_price = node.price
            + prices.literal_packet(node.state, ps, p as u64, prev_byte, cur_byte, match_byte);
        relax(&mut opts, i, i + 1, lit_price, Step::Literal, 1);

        // Short rep.
        if (node.reps[0] as usize) < p && data[p - node.reps[0] as usize - 1] == cur_byte {
            let price = node.price + prices.short_rep(sv, ps);
            relax(&mut opts, i, i + 1, price, Step::ShortRep, 1);
        }

        if max_len_i < MATCH_LEN_MIN {
            continue;
        }

        // Long reps.
        for k in 0..4 {
            let l = rep_match_len(data, p, node.reps[k], max_len_i) as usize;
            if l < MATCH_LEN_MIN {
                continue;
            }
            let base = node.price + prices.rep_base(k, sv, ps);
            for len in MATCH_LEN_MIN..=l {
                let price = base + prices.length(&model.rep_len, len as u32, ps);
                relax(&mut opts, i, i + len, price, Step::Rep(k as u8), len as u32);
            }
        }

        // Fresh matches.
        let ms: Vec<Match> = if i == 0 {
            first_matches.clone()
        } else {
            finder.matches_at(data, p).to_vec()
        };
        if !ms.is_empty() {
            let base = node.price + prices.match_base(sv, ps);
            let mut start_len = MATCH_LEN_MIN;
            for m in &ms {
                let m_len = (m.len as usize).min(max_len_i);
                if m_len < start_len {
                    continue;
                }
                for len in start_len..=m_len {
                    let price = base
                        + prices.length(&model.match_len, len as u32, ps)
                        + prices.distance(m.dist, len as u32);
                    relax(&mut opts, i, i + len, price, Step::Match(m.dist), len as u32);
                }
                start_len = m.len as usize + 1;
            }
        }
    }

    // Cheapest node at or past the horizon ends the block.
    let mut end = horizon;
    let mut best = opts[horizon].price;
    for (j, node) in opts.iter().enumerate().skip(horizon + 1) {
        if node.price < best {
            best = node.price;
            end = j;
        }
    }

    let mut decisions = Vec::new();
    let mut j = end;
    while j > 0 {
        let node = opts[j];
        decisions.push(match node.step {
            Step::Literal => Decision::Literal,
            Step::ShortRep => Decision::ShortRep,
            Step::Rep(k) => Decision::Rep {
                index: k as usize,
                len: node.len,
            },
            Step::Match(dist) => Decision::Match {
                dist,
                len: node.len,
            },
            Step::None => unreachable!("backtrack hit an unreached node"),
        });
        j = node.prev as usize;
    }
    decisions.reverse();
    decisions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_finder::MatchFinderKind;
    use crate::model::LzmaProps;

    fn finder() -> MatchFinder {
        MatchFinder::new(MatchFinderKind::BinaryTree, 1 << 16, 32, 0)
    }

    #[test]
    fn test_fast_literal_at_stream_start() {
        let mut mf = finder();
        let d = decide_fast(b"hello", 0, [0; 4], &mut mf);
        assert_eq!(d, Decision::Literal);
    }

    #[test]
    fn test_fast_takes_long_match() {
        let data = b"abcdefghijklmnopqrstuvwxyz0123456789abcdefghijklmnopqrstuvwxyz0123456789";
        let mut mf = finder();
        let mut pos = 0;
        while pos < 36 {
            let d = decide_fast(data, pos, [0; 4], &mut mf);
            pos += d.advance();
        }
        let d = decide_fast(data, 36, [0; 4], &mut mf);
        match d {
            Decision::Match { dist, len } => {
                assert_eq!(dist, 35);
                assert_eq!(len, 36);
            }
            other => panic!("expected a long match, got {:?}", other),
        }
    }

    #[test]
    fn test_fast_prefers_rep() {
        // After a match at distance 6, the same distance recurs.
        let data = b"patternpatternpattern!";
        let mut mf = finder();
        for p in 0..7 {
            let d = decide_fast(data, p, [0; 4], &mut mf);
            assert_eq!(d.advance(), 1, "no history yet at pos {}", p);
        }
        let d = decide_fast(data, 7, [0; 4], &mut mf);
        let Decision::Match { dist: 6, len } = d else {
            panic!("expected dist-6 match, got {:?}", d);
        };
        let next = 7 + len as usize;
        if next < data.len() - 2 {
            let d = decide_fast(data, next, [6, 0, 0, 0], &mut mf);
            assert!(
                matches!(d, Decision::Rep { index: 0, .. } | Decision::Literal),
                "rep distance should be preferred, got {:?}",
                d
            );
        }
    }

    #[test]
    fn test_plan_block_consumes_input() {
        let data = b"mississippi mississippi mississippi";
        let model = LzmaModel::new(LzmaProps::default());
        let mut mf = finder();
        let mut pos = 0;
        let mut state = State::new();
        let reps = [0u32; 4];
        while pos < data.len() {
            let block = plan_block(data, pos, state, reps, &model, &mut mf);
            assert!(!block.is_empty());
            for d in &block {
                // Advance state the way the encoder would.
                match d {
                    Decision::Literal => state.update_literal(),
                    Decision::ShortRep => state.update_short_rep(),
                    Decision::Rep { .. } => state.update_long_rep(),
                    Decision::Match { .. } => state.update_match(),
                }
                pos += d.advance();
            }
            mf.discard_below(pos);
        }
        assert_eq!(pos, data.len());
    }

    #[test]
    fn test_plan_block_finds_repetition() {
        let data = vec![b'z'; 300];
        let model = LzmaModel::new(LzmaProps::default());
        let mut mf = finder();
        let first = plan_block(&data, 0, State::new(), [0; 4], &model, &mut mf);
        assert_eq!(first[0], Decision::Literal);
        mf.discard_below(1);
        let second = plan_block(&data, 1, State::new(), [0; 4], &model, &mut mf);
        // A run must collapse into rep/match packets, not literals.
        assert!(
            second
                .iter()
                .any(|d| matches!(d, Decision::Rep { .. } | Decision::Match { .. })),
            "got {:?}",
            &second[..second.len().min(8)]
        );
    }

    #[test]
    fn test_decision_advance() {
        assert_eq!(Decision::Literal.advance(), 1);
        assert_eq!(Decision::ShortRep.advance(), 1);
        assert_eq!(Decision::Rep { index: 2, len: 9 }.advance(), 9);
        assert_eq!(Decision::Match { dist: 4, len: 273 }.advance(), 273);
    }
}
