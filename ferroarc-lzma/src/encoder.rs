//! LZMA compression.
//!
//! [`LzmaEncoder`] buffers its input, lets the configured parser pick a
//! packet per position, and emits packets through the range coder with
//! live model adaptation. The LZMA1 framing is a 13-byte header
//! (properties byte, dictionary size, uncompressed size) followed by the
//! range-coded payload and an end-of-stream marker: a match whose
//! distance field decodes to all ones.

use crate::match_finder::MatchFinder;
use crate::model::{
    DIST_ALIGN_BITS, DIST_MODEL_START, END_POS_MODEL_INDEX, LEN_LOW_SYMBOLS, LEN_MID_SYMBOLS,
    LengthModel, LzmaModel, LzmaProps, MATCH_LEN_MIN, State, dist_slot, dist_state,
};
use crate::parser::{Decision, ParserMode, decide_fast, plan_block};
use crate::range_coder::{Normalization, RangeEncoder};
use crate::{LzmaOptions, MIN_DICT_SIZE};
use ferroarc_core::coder::{CoderStatus, Compressor};
use ferroarc_core::error::{FerroArcError, Result};
use std::collections::VecDeque;

/// Encode a match or rep length through the three-tier length coder.
fn encode_length(rc: &mut RangeEncoder, lm: &mut LengthModel, len: u32, pos_state: usize) {
    let l = len as usize - MATCH_LEN_MIN;
    if l < LEN_LOW_SYMBOLS {
        rc.encode_bit(&mut lm.choice, 0);
        rc.encode_bit_tree(&mut lm.low[pos_state], 3, l as u32);
    } else if l < LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS {
        rc.encode_bit(&mut lm.choice, 1);
        rc.encode_bit(&mut lm.choice2, 0);
        rc.encode_bit_tree(&mut lm.mid[pos_state], 3, (l - LEN_LOW_SYMBOLS) as u32);
    } else {
        rc.encode_bit(&mut lm.choice, 1);
        rc.encode_bit(&mut lm.choice2, 1);
        rc.encode_bit_tree(
            &mut lm.high,
            8,
            (l - LEN_LOW_SYMBOLS - LEN_MID_SYMBOLS) as u32,
        );
    }
}

/// LZMA encoder.
pub struct LzmaEncoder {
    props: LzmaProps,
    dict_size: u32,
    mode: ParserMode,
    variant: Normalization,
    model: LzmaModel,
    state: State,
    reps: [u32; 4],
    rc: RangeEncoder,
    finder: MatchFinder,
    data: Vec<u8>,
    pos: usize,
    pending: VecDeque<Decision>,
    header: Vec<u8>,
    header_pos: usize,
    write_header: bool,
    emit_eos: bool,
    input_done: bool,
    flushed: bool,
    poisoned: bool,
}

impl LzmaEncoder {
    /// Create an encoder producing a headered LZMA1 stream.
    ///
    /// `variant` selects the normalization discipline of the range
    /// encoder; either produces a stream any conforming decoder reads.
    pub fn new(
        props: LzmaProps,
        dict_size: u32,
        mode: ParserMode,
        variant: Normalization,
    ) -> Result<Self> {
        let options = LzmaOptions {
            props,
            dict_size,
            mode,
            variant,
            ..LzmaOptions::default()
        };
        Self::with_options(&options)
    }

    /// Create an encoder from a full options bundle.
    pub fn with_options(options: &LzmaOptions) -> Result<Self> {
        Self::build(options, true, true)
    }

    /// Create an encoder emitting only the range-coded payload (with the
    /// end marker, without the 13-byte header).
    pub fn with_options_raw(options: &LzmaOptions) -> Result<Self> {
        Self::build(options, false, true)
    }

    /// Encoder driven chunk-by-chunk by the LZMA2 framer: no header, no
    /// end marker.
    pub(crate) fn for_chunks(options: &LzmaOptions) -> Result<Self> {
        let mut enc = Self::build(options, false, false)?;
        enc.input_done = true;
        Ok(enc)
    }

    fn build(options: &LzmaOptions, write_header: bool, emit_eos: bool) -> Result<Self> {
        if !options.props.is_valid() {
            return Err(FerroArcError::malformed_header(format!(
                "properties out of range: lc={} lp={} pb={}",
                options.props.lc, options.props.lp, options.props.pb
            )));
        }
        let dict_size = options.dict_size.max(MIN_DICT_SIZE);

        Ok(Self {
            props: options.props,
            dict_size,
            mode: options.mode,
            variant: options.variant,
            model: LzmaModel::new(options.props),
            state: State::new(),
            reps: [0; 4],
            rc: RangeEncoder::new(options.variant),
            finder: MatchFinder::new(options.mf, dict_size, options.nice_len, options.depth_limit),
            data: Vec::new(),
            pos: 0,
            pending: VecDeque::new(),
            header: Vec::new(),
            header_pos: 0,
            write_header,
            emit_eos,
            input_done: false,
            flushed: false,
            poisoned: false,
        })
    }

    /// The stream properties.
    pub fn props(&self) -> LzmaProps {
        self.props
    }

    /// The dictionary size written to the header.
    pub fn dict_size(&self) -> u32 {
        self.dict_size
    }

    fn prepare_header(&mut self) {
        if !self.write_header {
            return;
        }
        self.header.push(self.props.to_byte());
        self.header.extend_from_slice(&self.dict_size.to_le_bytes());
        self.header
            .extend_from_slice(&(self.data.len() as u64).to_le_bytes());
        log::debug!(
            "lzma header: props={:#04x} dict={} size={}",
            self.props.to_byte(),
            self.dict_size,
            self.data.len()
        );
    }

    fn drain_header(&mut self, output: &mut [u8]) -> usize {
        let n = output.len().min(self.header.len() - self.header_pos);
        output[..n].copy_from_slice(&self.header[self.header_pos..self.header_pos + n]);
        self.header_pos += n;
        n
    }

    fn next_decision(&mut self) -> Decision {
        match self.mode {
            ParserMode::Fast => decide_fast(&self.data, self.pos, self.reps, &mut self.finder),
            ParserMode::Normal => {
                if self.pending.is_empty() {
                    let block = plan_block(
                        &self.data,
                        self.pos,
                        self.state,
                        self.reps,
                        &self.model,
                        &mut self.finder,
                    );
                    self.pending.extend(block);
                }
                self.pending
                    .pop_front()
                    .unwrap_or(Decision::Literal)
            }
        }
    }

    fn encode_literal(&mut self, byte: u8, prev_byte: u8) {
        let ctx = self.model.literal.context_index(self.pos as u64, prev_byte);
        let block = &mut self.model.literal.probs[ctx];

        if self.state.is_literal() {
            let mut symbol = (byte as usize) | 0x100;
            let mut node = 1usize;
            while node < 0x100 {
                let bit = (symbol >> 7) & 1;
                symbol <<= 1;
                self.rc.encode_bit(&mut block[node], bit as u32);
                node = (node << 1) | bit;
            }
        } else {
            let match_byte = self.data[self.pos - self.reps[0] as usize - 1];
            let mut symbol = (byte as usize) | 0x100;
            let mut match_sym = (match_byte as usize) << 1;
            let mut node = 1usize;
            loop {
                let match_bit = (match_sym >> 8) & 1;
                match_sym <<= 1;
                let bit = (symbol >> 7) & 1;
                symbol <<= 1;
                self.rc
                    .encode_bit(&mut block[0x100 + (match_bit << 8) + node], bit as u32);
                node = (node << 1) | bit;
                if node >= 0x100 {
                    break;
                }
                if bit != match_bit {
                    while node < 0x100 {
                        let bit = (symbol >> 7) & 1;
                        symbol <<= 1;
                        self.rc.encode_bit(&mut block[node], bit as u32);
                        node = (node << 1) | bit;
                    }
                    break;
                }
            }
        }
    }

    fn encode_distance(&mut self, dist: u32, len: u32) {
        let slot = dist_slot(dist);
        self.rc
            .encode_bit_tree(&mut self.model.distance.slot[dist_state(len)], 6, slot);

        if slot >= DIST_MODEL_START as u32 {
            let footer = (slot >> 1) - 1;
            let base = (2 | (slot & 1)) << footer;
            let reduced = dist - base;

            if (slot as usize) < END_POS_MODEL_INDEX {
                let block = self.model.distance.special_block(slot as usize);
                let mut node = 1usize;
                for i in 0..footer {
                    let bit = (reduced >> i) & 1;
                    self.rc.encode_bit(&mut block[node - 1], bit);
                    node = (node << 1) | bit as usize;
                }
            } else {
                self.rc
                    .encode_direct_bits(reduced >> DIST_ALIGN_BITS, footer - DIST_ALIGN_BITS);
                self.rc.encode_bit_tree_reverse(
                    &mut self.model.distance.align,
                    DIST_ALIGN_BITS,
                    reduced & ((1 << DIST_ALIGN_BITS) - 1),
                );
            }
        }
    }

    fn encode_decision(&mut self, decision: Decision) {
        let ps = (self.pos as u32 & self.props.pos_mask()) as usize;
        let sv = self.state.value();

        match decision {
            Decision::Literal => {
                self.rc.encode_bit(&mut self.model.is_match[sv][ps], 0);
                let byte = self.data[self.pos];
                let prev = if self.pos == 0 {
                    0
                } else {
                    self.data[self.pos - 1]
                };
                self.encode_literal(byte, prev);
                self.state.update_literal();
                self.pos += 1;
            }
            Decision::ShortRep => {
                self.rc.encode_bit(&mut self.model.is_match[sv][ps], 1);
                self.rc.encode_bit(&mut self.model.is_rep[sv], 1);
                self.rc.encode_bit(&mut self.model.is_rep0[sv], 0);
                self.rc.encode_bit(&mut self.model.is_rep0_long[sv][ps], 0);
                self.state.update_short_rep();
                self.pos += 1;
            }
            Decision::Rep { index, len } => {
                self.rc.encode_bit(&mut self.model.is_match[sv][ps], 1);
                self.rc.encode_bit(&mut self.model.is_rep[sv], 1);
                match index {
                    0 => {
                        self.rc.encode_bit(&mut self.model.is_rep0[sv], 0);
                        self.rc.encode_bit(&mut self.model.is_rep0_long[sv][ps], 1);
                    }
                    1 => {
                        self.rc.encode_bit(&mut self.model.is_rep0[sv], 1);
                        self.rc.encode_bit(&mut self.model.is_rep1[sv], 0);
                    }
                    2 => {
                        self.rc.encode_bit(&mut self.model.is_rep0[sv], 1);
                        self.rc.encode_bit(&mut self.model.is_rep1[sv], 1);
                        self.rc.encode_bit(&mut self.model.is_rep2[sv], 0);
                    }
                    _ => {
                        self.rc.encode_bit(&mut self.model.is_rep0[sv], 1);
                        self.rc.encode_bit(&mut self.model.is_rep1[sv], 1);
                        self.rc.encode_bit(&mut self.model.is_rep2[sv], 1);
                    }
                }
                let dist = self.reps[index];
                for j in (1..=index).rev() {
                    self.reps[j] = self.reps[j - 1];
                }
                self.reps[0] = dist;

                encode_length(&mut self.rc, &mut self.model.rep_len, len, ps);
                self.state.update_long_rep();
                self.pos += len as usize;
            }
            Decision::Match { dist, len } => {
                self.rc.encode_bit(&mut self.model.is_match[sv][ps], 1);
                self.rc.encode_bit(&mut self.model.is_rep[sv], 0);
                encode_length(&mut self.rc, &mut self.model.match_len, len, ps);
                self.encode_distance(dist, len);
                self.reps = [dist, self.reps[0], self.reps[1], self.reps[2]];
                self.state.update_match();
                self.pos += len as usize;
            }
        }
    }

    fn finish_stream(&mut self) {
        if self.emit_eos {
            let ps = (self.pos as u32 & self.props.pos_mask()) as usize;
            let sv = self.state.value();
            self.rc.encode_bit(&mut self.model.is_match[sv][ps], 1);
            self.rc.encode_bit(&mut self.model.is_rep[sv], 0);
            encode_length(
                &mut self.rc,
                &mut self.model.match_len,
                MATCH_LEN_MIN as u32,
                ps,
            );
            self.encode_distance(u32::MAX, MATCH_LEN_MIN as u32);
        }
        self.rc.flush();
        self.flushed = true;
    }

    // Chunk-driving hooks for the LZMA2 framer.

    pub(crate) fn push_input(&mut self, input: &[u8]) {
        self.data.extend_from_slice(input);
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub(crate) fn chunk_data(&self, start: usize, end: usize) -> &[u8] {
        &self.data[start..end]
    }

    pub(crate) fn rc_pending(&self) -> usize {
        self.rc.pending_bytes()
    }

    pub(crate) fn encode_one_packet(&mut self) {
        let decision = self.next_decision();
        self.encode_decision(decision);
        self.finder.discard_below(self.pos);
    }

    /// Flush the current chunk's range-coded bytes and start a fresh
    /// range coder for the next chunk.
    pub(crate) fn take_chunk(&mut self) -> Vec<u8> {
        let rc = std::mem::replace(&mut self.rc, RangeEncoder::new(self.variant));
        rc.finish()
    }

    /// Reset probabilities, state, and the rep ring; the window and
    /// position carry on.
    pub(crate) fn reset_model_state(&mut self) {
        self.model.reset();
        self.state = State::new();
        self.reps = [0; 4];
        self.pending.clear();
    }
}

impl Compressor for LzmaEncoder {
    fn compress(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        end_of_input: bool,
    ) -> Result<(usize, usize, CoderStatus)> {
        if self.poisoned {
            return Err(FerroArcError::malformed_stream(
                self.pos as u64,
                "encoder previously failed",
            ));
        }

        let consumed = input.len();
        if !input.is_empty() {
            self.data.extend_from_slice(input);
        }
        if end_of_input && !self.input_done {
            self.input_done = true;
            self.prepare_header();
        }
        if !self.input_done {
            return Ok((consumed, 0, CoderStatus::NeedMoreInput));
        }

        let mut produced = self.drain_header(output);
        loop {
            produced += self.rc.take_output(&mut output[produced..]);
            if self.flushed || produced == output.len() {
                break;
            }
            if self.pos < self.data.len() {
                let decision = self.next_decision();
                self.encode_decision(decision);
                self.finder.discard_below(self.pos);
            } else {
                self.finish_stream();
            }
        }
        produced += self.drain_header(&mut output[produced..]);
        produced += self.rc.take_output(&mut output[produced..]);

        let done =
            self.flushed && self.header_pos == self.header.len() && self.rc.pending_out() == 0;
        let status = if done {
            CoderStatus::StreamEnd
        } else {
            CoderStatus::NeedMoreOutput
        };
        Ok((consumed, produced, status))
    }
}

/// Compress `data` into a headered LZMA1 stream.
pub fn compress(data: &[u8], options: &LzmaOptions) -> Result<Vec<u8>> {
    let mut encoder = LzmaEncoder::with_options(options)?;
    encoder.compress_all(data)
}

/// Compress `data` into a raw (headerless) LZMA1 payload, terminated by
/// the end-of-stream marker.
pub fn compress_raw(data: &[u8], options: &LzmaOptions) -> Result<Vec<u8>> {
    let mut encoder = LzmaEncoder::with_options_raw(options)?;
    encoder.compress_all(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LzmaLevel;

    #[test]
    fn test_encoder_rejects_bad_props() {
        let props = LzmaProps::new(9, 0, 0);
        assert!(LzmaEncoder::new(props, 1 << 16, ParserMode::Fast, Normalization::default()).is_err());
    }

    #[test]
    fn test_header_layout_for_single_byte() {
        let options = LzmaOptions {
            dict_size: 1 << 16,
            ..LzmaOptions::default()
        };
        let out = compress(b"A", &options).unwrap();
        assert_eq!(out[0], 0x5D);
        assert_eq!(&out[1..5], &0x0001_0000u32.to_le_bytes());
        assert_eq!(&out[5..13], &1u64.to_le_bytes());
        // Payload: range coder init byte is zero.
        assert_eq!(out[13], 0);
    }

    #[test]
    fn test_empty_input_yields_header_and_marker() {
        let out = compress(b"", &LzmaOptions::default()).unwrap();
        assert_eq!(&out[5..13], &0u64.to_le_bytes());
        // Header plus range coder init and end marker bytes follow.
        assert!(out.len() > 13);
        assert_eq!(out[13], 0);
    }

    #[test]
    fn test_repetitive_input_compresses() {
        let data = vec![b'A'; 1000];
        let out = compress(&data, &LzmaOptions::preset(LzmaLevel::DEFAULT)).unwrap();
        assert!(out.len() < 100, "got {} bytes", out.len());
    }

    #[test]
    fn test_raw_payload_has_no_header() {
        let data = b"hello hello hello";
        let raw = compress_raw(data, &LzmaOptions::default()).unwrap();
        let full = compress(data, &LzmaOptions::default()).unwrap();
        assert_eq!(&full[13..], &raw[..]);
        assert_eq!(raw[0], 0);
    }

    #[test]
    fn test_stepped_output_draining() {
        let data = vec![b'x'; 4096];
        let mut encoder = LzmaEncoder::with_options(&LzmaOptions::default()).unwrap();
        let whole = {
            let mut enc = LzmaEncoder::with_options(&LzmaOptions::default()).unwrap();
            enc.compress_all(&data).unwrap()
        };

        let mut out = Vec::new();
        let mut chunk = [0u8; 11];
        let mut fed = false;
        loop {
            let input: &[u8] = if fed { &[] } else { &data };
            let (consumed, produced, status) = encoder.compress(input, &mut chunk, true).unwrap();
            if !fed {
                assert_eq!(consumed, data.len());
                fed = true;
            }
            out.extend_from_slice(&chunk[..produced]);
            if status == CoderStatus::StreamEnd {
                break;
            }
        }
        assert_eq!(out, whole);
    }
}
