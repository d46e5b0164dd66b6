//! LZMA decompression.
//!
//! [`LzmaDecoder`] consumes a headered LZMA1 stream or a raw payload with
//! out-of-band properties. Decoding is packet-at-a-time over an internal
//! input buffer, so the stepped interface can suspend at any packet
//! boundary and resume once more compressed bytes arrive.
//!
//! The decoder is normalization-agnostic: streams from either encoder
//! variant decode identically.

use crate::dict::SlidingWindow;
use crate::model::{
    DIST_ALIGN_BITS, DIST_MODEL_START, END_POS_MODEL_INDEX, LengthModel, LzmaModel, LzmaProps,
    MATCH_LEN_MIN, State, dist_state,
};
use crate::range_coder::RangeDecoder;
use crate::MIN_DICT_SIZE;
use ferroarc_core::coder::{CoderStatus, Decompressor};
use ferroarc_core::error::{FerroArcError, Result};
use std::io::Read;

/// Worst-case compressed bytes one packet can pull from the input. Used
/// to decide when a suspended decode may safely proceed.
const MAX_PACKET_INPUT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Header,
    RcInit,
    Body,
    Finished,
}

/// Output budget for overflow checking.
#[derive(Debug, Clone, Copy)]
struct Limits {
    declared: u64,
    remaining: u64,
}

struct PacketOutcome {
    produced: u32,
    eos: bool,
}

/// Decode a length through the three-tier length coder.
fn decode_length<R: Read>(
    reader: &mut R,
    rc: &mut RangeDecoder,
    lm: &mut LengthModel,
    pos_state: usize,
) -> Result<u32> {
    if rc.decode_bit(reader, &mut lm.choice)? == 0 {
        let len = rc.decode_bit_tree(reader, &mut lm.low[pos_state], 3)?;
        Ok(len + MATCH_LEN_MIN as u32)
    } else if rc.decode_bit(reader, &mut lm.choice2)? == 0 {
        let len = rc.decode_bit_tree(reader, &mut lm.mid[pos_state], 3)?;
        Ok(len + MATCH_LEN_MIN as u32 + 8)
    } else {
        let len = rc.decode_bit_tree(reader, &mut lm.high, 8)?;
        Ok(len + MATCH_LEN_MIN as u32 + 16)
    }
}

fn decode_distance<R: Read>(
    reader: &mut R,
    rc: &mut RangeDecoder,
    model: &mut LzmaModel,
    len: u32,
) -> Result<u32> {
    let slot = rc.decode_bit_tree(reader, &mut model.distance.slot[dist_state(len)], 6)?;
    if slot < DIST_MODEL_START as u32 {
        return Ok(slot);
    }

    let footer = (slot >> 1) - 1;
    let mut dist = (2 | (slot & 1)) << footer;

    if (slot as usize) < END_POS_MODEL_INDEX {
        let block = model.distance.special_block(slot as usize);
        let mut node = 1usize;
        let mut value = 0u32;
        for i in 0..footer {
            let bit = rc.decode_bit(reader, &mut block[node - 1])?;
            node = (node << 1) | bit as usize;
            value |= bit << i;
        }
        dist += value;
    } else {
        let direct = rc.decode_direct_bits(reader, footer - DIST_ALIGN_BITS)?;
        dist += direct << DIST_ALIGN_BITS;
        dist += rc.decode_bit_tree_reverse(reader, &mut model.distance.align, DIST_ALIGN_BITS)?;
    }

    Ok(dist)
}

fn decode_literal<R: Read>(
    reader: &mut R,
    rc: &mut RangeDecoder,
    model: &mut LzmaModel,
    state: State,
    total_pos: u64,
    prev_byte: u8,
    match_byte: u8,
) -> Result<u8> {
    let ctx = model.literal.context_index(total_pos, prev_byte);
    let block = &mut model.literal.probs[ctx];

    let mut symbol = 1usize;
    if state.is_literal() {
        while symbol < 0x100 {
            let bit = rc.decode_bit(reader, &mut block[symbol])?;
            symbol = (symbol << 1) | bit as usize;
        }
    } else {
        let mut match_sym = match_byte as usize;
        loop {
            let match_bit = (match_sym >> 7) & 1;
            match_sym <<= 1;
            let bit = rc.decode_bit(reader, &mut block[0x100 + (match_bit << 8) + symbol])?;
            symbol = (symbol << 1) | bit as usize;
            if symbol >= 0x100 {
                break;
            }
            if bit as usize != match_bit {
                while symbol < 0x100 {
                    let bit = rc.decode_bit(reader, &mut block[symbol])?;
                    symbol = (symbol << 1) | bit as usize;
                }
                break;
            }
        }
    }

    Ok((symbol - 0x100) as u8)
}

/// Decode one packet, appending its bytes to `out` and the window.
#[allow(clippy::too_many_arguments)]
fn decode_packet<R: Read>(
    reader: &mut R,
    rc: &mut RangeDecoder,
    model: &mut LzmaModel,
    window: &mut SlidingWindow,
    state: &mut State,
    reps: &mut [u32; 4],
    total_pos: &mut u64,
    out: &mut Vec<u8>,
    limits: Option<Limits>,
) -> Result<PacketOutcome> {
    let ps = (*total_pos as u32 & model.props.pos_mask()) as usize;
    let sv = state.value();

    if rc.decode_bit(reader, &mut model.is_match[sv][ps])? == 0 {
        // Literal.
        let prev_byte = if window.is_empty() { 0 } else { window.get(0)? };
        let match_byte = if !state.is_literal() && (reps[0] as usize) < window.len() {
            window.get(reps[0])?
        } else {
            0
        };
        let byte = decode_literal(reader, rc, model, *state, *total_pos, prev_byte, match_byte)?;
        window.append(byte);
        out.push(byte);
        *total_pos += 1;
        state.update_literal();
        return Ok(PacketOutcome {
            produced: 1,
            eos: false,
        });
    }

    let (dist, len) = if rc.decode_bit(reader, &mut model.is_rep[sv])? == 0 {
        // Fresh match.
        let len = decode_length(reader, rc, &mut model.match_len, ps)?;
        let dist = decode_distance(reader, rc, model, len)?;
        if dist == u32::MAX {
            log::trace!("end-of-stream marker at {}", *total_pos);
            return Ok(PacketOutcome {
                produced: 0,
                eos: true,
            });
        }
        *reps = [dist, reps[0], reps[1], reps[2]];
        state.update_match();
        (dist, len)
    } else if rc.decode_bit(reader, &mut model.is_rep0[sv])? == 0 {
        if rc.decode_bit(reader, &mut model.is_rep0_long[sv][ps])? == 0 {
            // Short rep.
            let byte = window.get(reps[0])?;
            window.append(byte);
            out.push(byte);
            *total_pos += 1;
            state.update_short_rep();
            return Ok(PacketOutcome {
                produced: 1,
                eos: false,
            });
        }
        state.update_long_rep();
        let len = decode_length(reader, rc, &mut model.rep_len, ps)?;
        (reps[0], len)
    } else {
        let dist = if rc.decode_bit(reader, &mut model.is_rep1[sv])? == 0 {
            let d = reps[1];
            reps[1] = reps[0];
            reps[0] = d;
            d
        } else if rc.decode_bit(reader, &mut model.is_rep2[sv])? == 0 {
            let d = reps[2];
            reps[2] = reps[1];
            reps[1] = reps[0];
            reps[0] = d;
            d
        } else {
            let d = reps[3];
            reps[3] = reps[2];
            reps[2] = reps[1];
            reps[1] = reps[0];
            reps[0] = d;
            d
        };
        state.update_long_rep();
        let len = decode_length(reader, rc, &mut model.rep_len, ps)?;
        (dist, len)
    };

    if let Some(limits) = limits {
        if len as u64 > limits.remaining {
            return Err(FerroArcError::length_overflow(
                limits.declared,
                limits.declared - limits.remaining + len as u64,
            ));
        }
    }

    window.copy_match(dist, len, out)?;
    *total_pos += len as u64;
    Ok(PacketOutcome {
        produced: len,
        eos: false,
    })
}

/// LZMA decoder.
pub struct LzmaDecoder {
    model: Option<LzmaModel>,
    window: Option<SlidingWindow>,
    state: State,
    reps: [u32; 4],
    rc: Option<RangeDecoder>,
    expected_size: Option<u64>,
    produced: u64,
    total_pos: u64,
    input: Vec<u8>,
    input_pos: usize,
    out_queue: Vec<u8>,
    out_pos: usize,
    stage: Stage,
    finishing: bool,
    poisoned: bool,
}

impl LzmaDecoder {
    /// Create a decoder for a raw payload with out-of-band properties.
    ///
    /// `expected_size` is the declared uncompressed size; `None` means
    /// the stream terminates with the end-of-stream marker.
    pub fn new(props: LzmaProps, dict_size: u32, expected_size: Option<u64>) -> Result<Self> {
        if !props.is_valid() {
            return Err(FerroArcError::malformed_header(format!(
                "properties out of range: lc={} lp={} pb={}",
                props.lc, props.lp, props.pb
            )));
        }
        if dict_size == 0 {
            return Err(FerroArcError::malformed_header("dictionary size is zero"));
        }
        let dict_size = dict_size.max(MIN_DICT_SIZE);

        Ok(Self {
            model: Some(LzmaModel::new(props)),
            window: Some(SlidingWindow::new(dict_size)),
            state: State::new(),
            reps: [0; 4],
            rc: None,
            expected_size,
            produced: 0,
            total_pos: 0,
            input: Vec::new(),
            input_pos: 0,
            out_queue: Vec::new(),
            out_pos: 0,
            stage: Stage::RcInit,
            finishing: false,
            poisoned: false,
        })
    }

    /// Decoder core for the LZMA2 framer: chunk-driven, no stream header,
    /// properties installed by the first property-carrying chunk.
    pub(crate) fn for_lzma2(dict_size: u32) -> Self {
        Self {
            model: None,
            window: Some(SlidingWindow::new(dict_size.max(MIN_DICT_SIZE))),
            state: State::new(),
            reps: [0; 4],
            rc: None,
            expected_size: None,
            produced: 0,
            total_pos: 0,
            input: Vec::new(),
            input_pos: 0,
            out_queue: Vec::new(),
            out_pos: 0,
            stage: Stage::RcInit,
            finishing: false,
            poisoned: false,
        }
    }

    /// Create a decoder that parses the 13-byte LZMA1 header from the
    /// stream itself.
    pub fn with_header() -> Self {
        Self {
            model: None,
            window: None,
            state: State::new(),
            reps: [0; 4],
            rc: None,
            expected_size: None,
            produced: 0,
            total_pos: 0,
            input: Vec::new(),
            input_pos: 0,
            out_queue: Vec::new(),
            out_pos: 0,
            stage: Stage::Header,
            finishing: false,
            poisoned: false,
        }
    }

    /// Total uncompressed bytes produced so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Reset probabilities, state, and the rep ring, keeping the window.
    pub fn reset_state(&mut self) {
        if let Some(model) = self.model.as_mut() {
            model.reset();
        }
        self.state = State::new();
        self.reps = [0; 4];
    }

    /// Install new properties (rebuilding the model) and reset state.
    pub fn set_props(&mut self, props: LzmaProps) {
        self.model = Some(LzmaModel::new(props));
        self.state = State::new();
        self.reps = [0; 4];
    }

    /// Drop the window history and restart position accounting.
    pub(crate) fn reset_dict(&mut self) {
        if let Some(window) = self.window.as_mut() {
            window.reset();
        }
        self.total_pos = 0;
    }

    /// Append raw bytes to the window (LZMA2 uncompressed chunks).
    pub(crate) fn append_uncompressed(&mut self, data: &[u8], out: &mut Vec<u8>) {
        if let Some(window) = self.window.as_mut() {
            for &byte in data {
                window.append(byte);
            }
        }
        self.total_pos += data.len() as u64;
        out.extend_from_slice(data);
    }

    /// Decode one compressed chunk that must produce exactly `unpacked`
    /// bytes; the range coder is chunk-local, the model and window are
    /// not.
    pub(crate) fn decode_chunk(
        &mut self,
        compressed: &[u8],
        unpacked: usize,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let Some(model) = self.model.as_mut() else {
            return Err(FerroArcError::malformed_stream(
                0,
                "compressed chunk before properties were set",
            ));
        };
        let Some(window) = self.window.as_mut() else {
            return Err(FerroArcError::malformed_stream(0, "decoder has no window"));
        };

        let mut cursor = std::io::Cursor::new(compressed);
        let mut rc = RangeDecoder::new(&mut cursor)?;
        let mut chunk_produced = 0u64;

        while chunk_produced < unpacked as u64 {
            let limits = Limits {
                declared: unpacked as u64,
                remaining: unpacked as u64 - chunk_produced,
            };
            let outcome = decode_packet(
                &mut cursor,
                &mut rc,
                model,
                window,
                &mut self.state,
                &mut self.reps,
                &mut self.total_pos,
                out,
                Some(limits),
            )
            .map_err(map_truncation(self.produced + chunk_produced))?;

            if outcome.eos {
                return Err(FerroArcError::malformed_stream(
                    self.produced + chunk_produced,
                    "end marker inside a sized chunk",
                ));
            }
            chunk_produced += outcome.produced as u64;
        }

        self.produced += chunk_produced;
        Ok(())
    }

    fn avail_input(&self) -> usize {
        self.input.len() - self.input_pos
    }

    fn drain_out(&mut self, output: &mut [u8], offset: usize) -> usize {
        let n = (output.len() - offset).min(self.out_queue.len() - self.out_pos);
        output[offset..offset + n].copy_from_slice(&self.out_queue[self.out_pos..self.out_pos + n]);
        self.out_pos += n;
        if self.out_pos == self.out_queue.len() {
            self.out_queue.clear();
            self.out_pos = 0;
        }
        n
    }

    fn run(&mut self, output: &mut [u8]) -> Result<(usize, CoderStatus)> {
        let mut produced = self.drain_out(output, 0);

        loop {
            if self.stage == Stage::Finished {
                let drained = self.out_pos == self.out_queue.len();
                let status = if drained {
                    CoderStatus::StreamEnd
                } else {
                    CoderStatus::NeedMoreOutput
                };
                return Ok((produced, status));
            }
            if self.out_pos < self.out_queue.len() {
                return Ok((produced, CoderStatus::NeedMoreOutput));
            }

            match self.stage {
                Stage::Header => {
                    if self.avail_input() < 13 {
                        if self.finishing {
                            return Err(FerroArcError::malformed_header("truncated stream header"));
                        }
                        return Ok((produced, CoderStatus::NeedMoreInput));
                    }
                    let header = &self.input[self.input_pos..self.input_pos + 13];
                    let props = LzmaProps::from_byte(header[0]).ok_or_else(|| {
                        FerroArcError::malformed_header(format!(
                            "invalid properties byte {:#04x}",
                            header[0]
                        ))
                    })?;
                    let dict_size =
                        u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
                    if dict_size == 0 {
                        return Err(FerroArcError::malformed_header("dictionary size is zero"));
                    }
                    let size = u64::from_le_bytes([
                        header[5], header[6], header[7], header[8], header[9], header[10],
                        header[11], header[12],
                    ]);
                    self.expected_size = (size != u64::MAX).then_some(size);
                    self.model = Some(LzmaModel::new(props));
                    self.window = Some(SlidingWindow::new(dict_size.max(MIN_DICT_SIZE)));
                    self.input_pos += 13;
                    self.stage = Stage::RcInit;
                    log::debug!(
                        "lzma header: lc={} lp={} pb={} dict={} size={:?}",
                        props.lc,
                        props.lp,
                        props.pb,
                        dict_size,
                        self.expected_size
                    );
                }
                Stage::RcInit => {
                    if self.avail_input() < 5 {
                        if self.finishing {
                            return Err(FerroArcError::malformed_stream(
                                0,
                                "truncated range coder initialization",
                            ));
                        }
                        return Ok((produced, CoderStatus::NeedMoreInput));
                    }
                    let mut cursor = std::io::Cursor::new(&self.input[self.input_pos..]);
                    let rc = RangeDecoder::new(&mut cursor)?;
                    self.input_pos += 5;
                    self.rc = Some(rc);
                    self.stage = Stage::Body;
                }
                Stage::Body => {
                    if let Some(expected) = self.expected_size {
                        if self.produced == expected {
                            self.stage = Stage::Finished;
                            continue;
                        }
                    }
                    if !self.finishing && self.avail_input() < MAX_PACKET_INPUT {
                        return Ok((produced, CoderStatus::NeedMoreInput));
                    }

                    let Some(model) = self.model.as_mut() else {
                        return Err(FerroArcError::malformed_stream(0, "decoder has no model"));
                    };
                    let Some(window) = self.window.as_mut() else {
                        return Err(FerroArcError::malformed_stream(0, "decoder has no window"));
                    };
                    let Some(rc) = self.rc.as_mut() else {
                        return Err(FerroArcError::malformed_stream(
                            0,
                            "decoder has no range coder",
                        ));
                    };

                    let limits = self.expected_size.map(|declared| Limits {
                        declared,
                        remaining: declared - self.produced,
                    });
                    let mut cursor = std::io::Cursor::new(&self.input[self.input_pos..]);
                    let outcome = decode_packet(
                        &mut cursor,
                        rc,
                        model,
                        window,
                        &mut self.state,
                        &mut self.reps,
                        &mut self.total_pos,
                        &mut self.out_queue,
                        limits,
                    )
                    .map_err(map_truncation(self.produced))?;
                    self.input_pos += cursor.position() as usize;

                    if outcome.eos {
                        if let Some(expected) = self.expected_size {
                            if self.produced < expected {
                                return Err(FerroArcError::malformed_stream(
                                    self.produced,
                                    "end marker before the declared size",
                                ));
                            }
                        }
                        self.stage = Stage::Finished;
                    } else {
                        self.produced += outcome.produced as u64;
                    }
                    produced += self.drain_out(output, produced);
                }
                Stage::Finished => unreachable!("handled at loop head"),
            }
        }
    }
}

/// Map an unexpected end-of-input inside a packet to stream corruption.
fn map_truncation(offset: u64) -> impl Fn(FerroArcError) -> FerroArcError {
    move |err| match err {
        FerroArcError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            FerroArcError::malformed_stream(offset, "compressed stream truncated mid-packet")
        }
        other => other,
    }
}

impl Decompressor for LzmaDecoder {
    fn decompress(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<(usize, usize, CoderStatus)> {
        if self.poisoned {
            return Err(FerroArcError::malformed_stream(
                self.produced,
                "decoder previously failed",
            ));
        }

        let appended = input.len();
        if input.is_empty() {
            self.finishing = true;
        } else {
            self.input.extend_from_slice(input);
        }

        match self.run(output) {
            Ok((produced, status)) => {
                // Past the end of the stream, bytes we never touched go
                // back to the caller.
                let consumed = if self.stage == Stage::Finished {
                    let leftover = self.input.len() - self.input_pos;
                    let give_back = leftover.min(appended);
                    self.input.truncate(self.input.len() - give_back);
                    appended - give_back
                } else {
                    appended
                };
                Ok((consumed, produced, status))
            }
            Err(err) => {
                self.poisoned = true;
                Err(err)
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.stage == Stage::Finished && self.out_pos == self.out_queue.len()
    }
}

/// Decompress a headered LZMA1 stream.
pub fn decompress<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    LzmaDecoder::with_header().decompress_all(&data)
}

/// Decompress a raw LZMA1 payload with out-of-band parameters.
pub fn decompress_raw<R: Read>(
    mut reader: R,
    props: LzmaProps,
    dict_size: u32,
    expected_size: Option<u64>,
) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    LzmaDecoder::new(props, dict_size, expected_size)?.decompress_all(&data)
}
