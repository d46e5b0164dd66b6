//! Match finding over the encoder's input window.
//!
//! Two finder families share the front end: a 2-byte and a 3-byte hash
//! head table locate recent occurrences, then either a hash chain
//! ([`MatchFinderKind::HashChain`]) or a binary suffix tree
//! ([`MatchFinderKind::BinaryTree`]) is walked to collect candidates.
//! Chains are cheap to maintain and good enough for fast presets; the
//! tree costs more per position but finds materially better matches for
//! the price-driven parser.
//!
//! Candidate lists are strictly increasing in length, and for any given
//! length the nearest occurrence wins, so downstream pricing can iterate
//! them without re-sorting.

use crate::model::{MATCH_LEN_MAX, MATCH_LEN_MIN};
use std::collections::BTreeMap;

/// Sentinel for "no position".
const NIL: u32 = u32::MAX;

/// 2-byte hash table size.
const HASH2_SIZE: usize = 1 << 10;

/// 3-byte hash table size.
const HASH3_SIZE: usize = 1 << 16;

/// Which match-finding structure to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchFinderKind {
    /// Hash chains: low cost, shallow search.
    HashChain,
    /// Binary suffix tree: deeper search for better candidates.
    BinaryTree,
}

/// A match candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    /// Distance (0-based: `0` is the previous byte).
    pub dist: u32,
    /// Match length in bytes.
    pub len: u32,
}

/// Match finder over a growing input buffer.
///
/// Positions must be visited in non-decreasing order; every searched
/// position is remembered, so a parser may ask for the same position
/// again (lazy lookahead, block replay) and get the identical list.
#[derive(Debug)]
pub struct MatchFinder {
    kind: MatchFinderKind,
    window: usize,
    nice_len: u32,
    depth: u32,
    head2: Vec<u32>,
    head3: Vec<u32>,
    /// Hash-chain links, one per position.
    chain: Vec<u32>,
    /// Binary-tree child links, two per position.
    tree: Vec<u32>,
    next_insert: usize,
    memo: BTreeMap<usize, Vec<Match>>,
    scratch: Vec<Match>,
}

impl MatchFinder {
    /// Create a match finder.
    ///
    /// `window` bounds the distances produced; `depth` limits the search
    /// walk (`0` picks a default scaled from `nice_len`).
    pub fn new(kind: MatchFinderKind, window: u32, nice_len: u32, depth: u32) -> Self {
        let nice_len = nice_len.clamp(MATCH_LEN_MIN as u32, MATCH_LEN_MAX as u32);
        let depth = if depth > 0 {
            depth
        } else {
            match kind {
                MatchFinderKind::HashChain => 4 + nice_len / 4,
                MatchFinderKind::BinaryTree => 16 + nice_len / 2,
            }
        };

        Self {
            kind,
            window: window as usize,
            nice_len,
            depth,
            head2: vec![NIL; HASH2_SIZE],
            head3: vec![NIL; HASH3_SIZE],
            chain: Vec::new(),
            tree: Vec::new(),
            next_insert: 0,
            memo: BTreeMap::new(),
            scratch: Vec::new(),
        }
    }

    /// The configured nice length.
    pub fn nice_len(&self) -> u32 {
        self.nice_len
    }

    /// Forget everything and start from position zero.
    pub fn reset(&mut self) {
        self.head2.fill(NIL);
        self.head3.fill(NIL);
        self.chain.clear();
        self.tree.clear();
        self.next_insert = 0;
        self.memo.clear();
    }

    /// Drop remembered match lists below `pos`; the parser will not ask
    /// for them again.
    pub fn discard_below(&mut self, pos: usize) {
        self.memo = self.memo.split_off(&pos);
    }

    /// Candidates at `pos`, strictly increasing in length.
    ///
    /// The position (and any skipped gap before it) is folded into the
    /// search structures as a side effect.
    pub fn matches_at(&mut self, data: &[u8], pos: usize) -> &[Match] {
        if let Some(cached) = self.memo.get(&pos) {
            self.scratch.clear();
            self.scratch.extend_from_slice(cached);
            return &self.scratch;
        }

        while self.next_insert < pos {
            let p = self.next_insert;
            self.insert_only(data, p);
            self.next_insert += 1;
        }

        self.scratch.clear();
        self.search_insert(data, pos, true);
        self.next_insert = pos + 1;
        self.memo.insert(pos, self.scratch.clone());
        &self.scratch
    }

    fn hash2(data: &[u8], pos: usize) -> usize {
        let mut h = 2166136261u32;
        h ^= data[pos] as u32;
        h = h.wrapping_mul(16777619);
        h ^= data[pos + 1] as u32;
        h = h.wrapping_mul(16777619);
        (h as usize) & (HASH2_SIZE - 1)
    }

    fn hash3(data: &[u8], pos: usize) -> usize {
        let mut h = 2166136261u32;
        h ^= data[pos] as u32;
        h = h.wrapping_mul(16777619);
        h ^= data[pos + 1] as u32;
        h = h.wrapping_mul(16777619);
        h ^= data[pos + 2] as u32;
        h = h.wrapping_mul(16777619);
        (h as usize) & (HASH3_SIZE - 1)
    }

    fn insert_only(&mut self, data: &[u8], pos: usize) {
        match self.kind {
            MatchFinderKind::HashChain => self.insert_chain(data, pos),
            MatchFinderKind::BinaryTree => self.search_insert(data, pos, false),
        }
    }

    fn insert_chain(&mut self, data: &[u8], pos: usize) {
        let avail = data.len() - pos;
        if avail < 2 {
            return;
        }
        if self.chain.len() <= pos {
            self.chain.resize(pos + 1, NIL);
        }
        if avail >= 3 {
            let h3 = Self::hash3(data, pos);
            self.chain[pos] = self.head3[h3];
            self.head3[h3] = pos as u32;
        }
        let h2 = Self::hash2(data, pos);
        self.head2[h2] = pos as u32;
    }

    fn search_insert(&mut self, data: &[u8], pos: usize, collect: bool) {
        match self.kind {
            MatchFinderKind::HashChain => self.search_chain(data, pos, collect),
            MatchFinderKind::BinaryTree => self.search_tree(data, pos, collect),
        }
    }

    /// Shortest-first candidate from the 2-byte hash; returns the running
    /// best length.
    fn seed_from_hash2(&mut self, data: &[u8], pos: usize, max_len: usize, collect: bool) -> usize {
        let h2 = Self::hash2(data, pos);
        let head = self.head2[h2];
        let mut best_len = 1usize;

        if head != NIL {
            let c = head as usize;
            let dist = pos - c - 1;
            if dist < self.window {
                let len = extend_match(data, pos, c, 0, max_len);
                if len >= MATCH_LEN_MIN {
                    if collect {
                        self.scratch.push(Match {
                            dist: dist as u32,
                            len: len as u32,
                        });
                    }
                    best_len = len;
                }
            }
        }

        self.head2[h2] = pos as u32;
        best_len
    }

    fn search_chain(&mut self, data: &[u8], pos: usize, collect: bool) {
        let avail = data.len() - pos;
        if avail < 2 {
            return;
        }
        if self.chain.len() <= pos {
            self.chain.resize(pos + 1, NIL);
        }

        let max_len = avail.min(MATCH_LEN_MAX);
        let nice = (self.nice_len as usize).min(max_len);
        let mut best_len = self.seed_from_hash2(data, pos, max_len, collect);

        if avail < 3 {
            return;
        }

        let h3 = Self::hash3(data, pos);
        let mut cur = self.head3[h3];
        self.chain[pos] = cur;
        self.head3[h3] = pos as u32;

        let mut depth_left = self.depth;
        while cur != NIL && depth_left > 0 && best_len < max_len {
            let c = cur as usize;
            let dist = pos - c - 1;
            if dist >= self.window {
                break;
            }

            if data[c + best_len] == data[pos + best_len] && data[c] == data[pos] {
                let len = extend_match(data, pos, c, 0, max_len);
                if len > best_len {
                    if collect {
                        self.scratch.push(Match {
                            dist: dist as u32,
                            len: len as u32,
                        });
                    }
                    best_len = len;
                    if best_len >= nice {
                        break;
                    }
                }
            }

            cur = self.chain[c];
            depth_left -= 1;
        }
    }

    fn search_tree(&mut self, data: &[u8], pos: usize, collect: bool) {
        let avail = data.len() - pos;
        if avail < 2 {
            return;
        }
        if self.tree.len() <= 2 * pos + 1 {
            self.tree.resize(2 * pos + 2, NIL);
        }

        let max_len = avail.min(MATCH_LEN_MAX);
        let nice = (self.nice_len as usize).min(max_len);
        let mut best_len = self.seed_from_hash2(data, pos, max_len, collect);

        if avail < 3 {
            self.tree[2 * pos] = NIL;
            self.tree[2 * pos + 1] = NIL;
            return;
        }

        let h3 = Self::hash3(data, pos);
        let mut cur = self.head3[h3];
        self.head3[h3] = pos as u32;

        let mut ptr0 = 2 * pos + 1;
        let mut ptr1 = 2 * pos;
        let mut len0 = 0usize;
        let mut len1 = 0usize;
        let mut depth_left = self.depth;

        loop {
            if cur == NIL || depth_left == 0 {
                self.tree[ptr0] = NIL;
                self.tree[ptr1] = NIL;
                break;
            }
            depth_left -= 1;

            let c = cur as usize;
            let dist = pos - c - 1;
            if dist >= self.window {
                self.tree[ptr0] = NIL;
                self.tree[ptr1] = NIL;
                break;
            }

            let mut len = len0.min(len1);
            len = extend_match(data, pos, c, len, max_len);

            if len > best_len {
                if collect {
                    self.scratch.push(Match {
                        dist: dist as u32,
                        len: len as u32,
                    });
                }
                best_len = len;
            }

            if len >= nice || len == max_len {
                // Long enough: adopt this node's subtrees and stop.
                self.tree[ptr1] = self.tree[2 * c];
                self.tree[ptr0] = self.tree[2 * c + 1];
                break;
            }

            if data[c + len] < data[pos + len] {
                self.tree[ptr1] = cur;
                ptr1 = 2 * c + 1;
                cur = self.tree[ptr1];
                len1 = len;
            } else {
                self.tree[ptr0] = cur;
                ptr0 = 2 * c;
                cur = self.tree[ptr0];
                len0 = len;
            }
        }
    }
}

/// Extend a match at `candidate` against `pos`, starting from an already
/// verified prefix of `start` bytes.
#[inline]
fn extend_match(data: &[u8], pos: usize, candidate: usize, start: usize, max_len: usize) -> usize {
    let mut len = start;
    while len < max_len && data[candidate + len] == data[pos + len] {
        len += 1;
    }
    len
}

/// Length of the rep match at `dist` for position `pos`, capped at
/// `max_len`. Returns 0 when the distance reaches before the stream.
#[inline]
pub fn rep_match_len(data: &[u8], pos: usize, dist: u32, max_len: usize) -> u32 {
    let dist = dist as usize;
    if dist >= pos {
        return 0;
    }
    extend_match(data, pos, pos - dist - 1, 0, max_len) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finder(kind: MatchFinderKind) -> MatchFinder {
        MatchFinder::new(kind, 1 << 16, 64, 0)
    }

    fn both() -> [MatchFinder; 2] {
        [
            finder(MatchFinderKind::HashChain),
            finder(MatchFinderKind::BinaryTree),
        ]
    }

    #[test]
    fn test_finds_planted_match() {
        let data = b"abcdefgh_abcdefgh";
        for mut mf in both() {
            for p in 0..9 {
                mf.matches_at(data, p);
            }
            let found = mf.matches_at(data, 9).to_vec();
            let longest = found.last().expect("match expected");
            assert_eq!(longest.len, 8);
            assert_eq!(longest.dist, 8);
        }
    }

    #[test]
    fn test_candidates_strictly_increase_in_length() {
        let data = b"ababab_abab_ab_ababab";
        for mut mf in both() {
            for p in 0..data.len() - 2 {
                let found = mf.matches_at(data, p).to_vec();
                for pair in found.windows(2) {
                    assert!(pair[1].len > pair[0].len);
                }
            }
        }
    }

    #[test]
    fn test_no_candidates_near_end() {
        let data = b"xyxy";
        for mut mf in both() {
            for p in 0..3 {
                mf.matches_at(data, p);
            }
            assert!(mf.matches_at(data, 3).is_empty());
        }
    }

    #[test]
    fn test_distances_respect_window() {
        let mut data = vec![0u8; 600];
        data.extend_from_slice(b"needle");
        data.extend_from_slice(&vec![1u8; 600]);
        data.extend_from_slice(b"needle");

        let mut mf = MatchFinder::new(MatchFinderKind::HashChain, 256, 64, 0);
        let second_needle = 600 + 6 + 600;
        for p in 0..second_needle {
            mf.matches_at(&data, p);
        }
        for m in mf.matches_at(&data, second_needle) {
            assert!((m.dist as usize) < 256);
        }
    }

    #[test]
    fn test_requery_returns_same_list() {
        let data = b"the cat sat on the mat, the cat sat";
        for mut mf in both() {
            let mut first = Vec::new();
            for p in 0..20 {
                first.push(mf.matches_at(data, p).to_vec());
            }
            for (p, want) in first.iter().enumerate() {
                assert_eq!(&mf.matches_at(data, p).to_vec(), want, "pos {}", p);
            }
        }
    }

    #[test]
    fn test_len2_candidate_at_short_distance() {
        let data = b"okok";
        for mut mf in both() {
            mf.matches_at(data, 0);
            mf.matches_at(data, 1);
            let found = mf.matches_at(data, 2).to_vec();
            assert!(found.iter().any(|m| m.len == 2 && m.dist == 1));
        }
    }

    #[test]
    fn test_rep_match_len() {
        let data = b"abcabcabc";
        assert_eq!(rep_match_len(data, 3, 2, 6), 6);
        assert_eq!(rep_match_len(data, 3, 3, 6), 0);
        assert_eq!(rep_match_len(data, 0, 0, 6), 0);
        assert_eq!(rep_match_len(data, 1, 0, 3), 0);
    }

    #[test]
    fn test_ties_prefer_short_distance() {
        let data = b"zq_zq_zq!";
        for mut mf in both() {
            for p in 0..6 {
                mf.matches_at(data, p);
            }
            // Both earlier "zq_" occurrences match; the list must offer
            // the nearest one for its length class.
            let found = mf.matches_at(data, 6).to_vec();
            let two = found.iter().find(|m| m.len == 2).unwrap();
            assert_eq!(two.dist, 2);
        }
    }

    #[test]
    fn test_reset_clears_history() {
        let data = b"repeat repeat";
        for mut mf in both() {
            for p in 0..8 {
                mf.matches_at(data, p);
            }
            assert!(!mf.matches_at(data, 7).is_empty());
            mf.reset();
            assert!(mf.matches_at(data, 0).is_empty());
        }
    }
}
