//! LZMA2 chunked framing.
//!
//! LZMA2 wraps LZMA1 payloads in control-byte-prefixed chunks so a stream
//! can mix compressed and stored data, reset the dictionary or the
//! probability state mid-stream, and change properties between chunks.
//!
//! ## Chunk format
//!
//! | Control byte  | Meaning |
//! |---------------|---------|
//! | `0x00`        | End of stream |
//! | `0x01`        | Uncompressed chunk, dictionary reset |
//! | `0x02`        | Uncompressed chunk, no reset |
//! | `0x03..=0x7F` | Reserved |
//! | `0x80..=0xFF` | LZMA chunk; bits 5-6 select the reset mode |
//!
//! An LZMA chunk control byte carries the top bits of the unpacked size;
//! two more big-endian bytes complete it and two further bytes give the
//! packed size (both stored minus one). Reset mode 2 and 3 chunks carry a
//! properties byte.

use crate::decoder::LzmaDecoder;
use crate::encoder::LzmaEncoder;
use crate::model::{LzmaProps, MATCH_LEN_MAX};
use crate::LzmaOptions;
use ferroarc_core::coder::{CoderStatus, Compressor, Decompressor};
use ferroarc_core::error::{FerroArcError, Result};
use std::io::Read;

/// Maximum payload of an uncompressed chunk.
pub const UNCOMPRESSED_CHUNK_MAX: usize = 1 << 16;

/// Unpacked budget of one compressed chunk, leaving room for a final
/// match.
const CHUNK_UNPACKED_LIMIT: usize = (2 << 20) - MATCH_LEN_MAX;

/// Packed budget of one compressed chunk, leaving margin for the packet
/// in flight and the range coder tail.
const CHUNK_PACKED_LIMIT: usize = (64 << 10) - 64;

/// Control byte constants and helpers.
pub mod control {
    /// End of stream marker.
    pub const EOS: u8 = 0x00;

    /// Uncompressed chunk with dictionary reset.
    pub const UNCOMPRESSED_RESET: u8 = 0x01;

    /// Uncompressed chunk without reset.
    pub const UNCOMPRESSED: u8 = 0x02;

    /// LZMA chunk, nothing reset.
    pub const RESET_NONE: u8 = 0x80;

    /// LZMA chunk, probability state reset.
    pub const RESET_STATE: u8 = 0xA0;

    /// LZMA chunk, state reset plus new properties.
    pub const RESET_STATE_PROPS: u8 = 0xC0;

    /// LZMA chunk, state, properties, and dictionary all reset.
    pub const RESET_ALL: u8 = 0xE0;

    /// Whether a control byte introduces an LZMA chunk.
    #[inline]
    pub const fn is_lzma(ctrl: u8) -> bool {
        ctrl & 0x80 != 0
    }

    /// Whether an LZMA chunk carries a properties byte.
    #[inline]
    pub const fn has_props(ctrl: u8) -> bool {
        ctrl >= RESET_STATE_PROPS
    }

    /// Whether an LZMA chunk resets the probability state.
    #[inline]
    pub const fn resets_state(ctrl: u8) -> bool {
        ctrl >= RESET_STATE
    }

    /// Whether an LZMA chunk resets the dictionary.
    #[inline]
    pub const fn resets_dict(ctrl: u8) -> bool {
        ctrl >= RESET_ALL
    }
}

enum ChunkStep {
    NeedInput,
    Decoded,
    End,
}

/// LZMA2 decoder.
///
/// The dictionary and probability state persist across chunks until a
/// chunk's control byte resets them.
pub struct Lzma2Decoder {
    inner: LzmaDecoder,
    need_dict_reset: bool,
    need_props: bool,
    finished: bool,
    input: Vec<u8>,
    input_pos: usize,
    out_queue: Vec<u8>,
    out_pos: usize,
    finishing: bool,
    poisoned: bool,
}

impl Lzma2Decoder {
    /// Create a decoder with the given dictionary size.
    pub fn new(dict_size: u32) -> Self {
        Self {
            inner: LzmaDecoder::for_lzma2(dict_size),
            need_dict_reset: true,
            need_props: true,
            finished: false,
            input: Vec::new(),
            input_pos: 0,
            out_queue: Vec::new(),
            out_pos: 0,
            finishing: false,
            poisoned: false,
        }
    }

    /// Decode a whole LZMA2 stream from a reader.
    pub fn decode<R: Read>(&mut self, reader: &mut R) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.decompress_all(&data)
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

    /// Parse and decode one chunk from the pending input, if complete.
    fn step_chunk(&mut self) -> Result<ChunkStep> {
        let buf = &self.input[self.input_pos..];
        let Some(&ctrl) = buf.first() else {
            return Ok(ChunkStep::NeedInput);
        };

        if ctrl == control::EOS {
            self.input_pos += 1;
            return Ok(ChunkStep::End);
        }

        if ctrl == control::UNCOMPRESSED_RESET || ctrl == control::UNCOMPRESSED {
            if buf.len() < 3 {
                return Ok(ChunkStep::NeedInput);
            }
            let size = u16::from_be_bytes([buf[1], buf[2]]) as usize + 1;
            if buf.len() < 3 + size {
                return Ok(ChunkStep::NeedInput);
            }
            let data = buf[3..3 + size].to_vec();

            if ctrl == control::UNCOMPRESSED_RESET {
                self.inner.reset_dict();
                self.need_dict_reset = false;
                self.need_props = true;
            } else if self.need_dict_reset {
                return Err(FerroArcError::malformed_stream(
                    self.inner.produced(),
                    "stream does not start with a dictionary reset",
                ));
            }
            self.inner.append_uncompressed(&data, &mut self.out_queue);
            self.input_pos += 3 + size;
            return Ok(ChunkStep::Decoded);
        }

        if !control::is_lzma(ctrl) {
            return Err(FerroArcError::unsupported(format!(
                "reserved control byte {:#04x}",
                ctrl
            )));
        }

        let header_len = if control::has_props(ctrl) { 6 } else { 5 };
        if buf.len() < header_len {
            return Ok(ChunkStep::NeedInput);
        }
        let unpacked =
            ((((ctrl & 0x1F) as usize) << 16) | u16::from_be_bytes([buf[1], buf[2]]) as usize) + 1;
        let packed = u16::from_be_bytes([buf[3], buf[4]]) as usize + 1;
        if buf.len() < header_len + packed {
            return Ok(ChunkStep::NeedInput);
        }
        let props_byte = if control::has_props(ctrl) { buf[5] } else { 0 };
        let compressed = buf[header_len..header_len + packed].to_vec();

        if control::resets_dict(ctrl) {
            self.inner.reset_dict();
            self.need_dict_reset = false;
        } else if self.need_dict_reset {
            return Err(FerroArcError::malformed_stream(
                self.inner.produced(),
                "stream does not start with a dictionary reset",
            ));
        }

        if control::has_props(ctrl) {
            let props = LzmaProps::from_byte(props_byte).ok_or_else(|| {
                FerroArcError::malformed_header(format!(
                    "invalid properties byte {:#04x}",
                    props_byte
                ))
            })?;
            if props.lc + props.lp > 4 {
                return Err(FerroArcError::unsupported(format!(
                    "lc + lp = {} exceeds 4",
                    props.lc + props.lp
                )));
            }
            self.inner.set_props(props);
            self.need_props = false;
        } else if self.need_props {
            return Err(FerroArcError::malformed_stream(
                self.inner.produced(),
                "compressed chunk before properties were set",
            ));
        } else if control::resets_state(ctrl) {
            self.inner.reset_state();
        }

        log::trace!(
            "lzma2 chunk: control={:#04x} unpacked={} packed={}",
            ctrl,
            unpacked,
            packed
        );
        self.input_pos += header_len + packed;
        self.inner
            .decode_chunk(&compressed, unpacked, &mut self.out_queue)?;
        Ok(ChunkStep::Decoded)
    }
}

impl Decompressor for Lzma2Decoder {
    fn decompress(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<(usize, usize, CoderStatus)> {
        if self.poisoned {
            return Err(FerroArcError::malformed_stream(
                self.inner.produced(),
                "decoder previously failed",
            ));
        }

        let appended = input.len();
        if input.is_empty() {
            self.finishing = true;
        } else {
            self.input.extend_from_slice(input);
        }

        let mut produced = self.drain_out(output, 0);
        let status = loop {
            if self.finished {
                break if self.out_pos == self.out_queue.len() {
                    CoderStatus::StreamEnd
                } else {
                    CoderStatus::NeedMoreOutput
                };
            }
            if self.out_pos < self.out_queue.len() {
                break CoderStatus::NeedMoreOutput;
            }

            let step = match self.step_chunk() {
                Ok(step) => step,
                Err(err) => {
                    self.poisoned = true;
                    return Err(err);
                }
            };
            match step {
                ChunkStep::NeedInput => {
                    if self.finishing {
                        self.poisoned = true;
                        return Err(FerroArcError::malformed_stream(
                            self.inner.produced(),
                            "lzma2 stream truncated mid-chunk",
                        ));
                    }
                    break CoderStatus::NeedMoreInput;
                }
                ChunkStep::End => self.finished = true,
                ChunkStep::Decoded => {
                    produced += self.drain_out(output, produced);
                }
            }
        };

        let consumed = if self.finished {
            let leftover = self.input.len() - self.input_pos;
            let give_back = leftover.min(appended);
            self.input.truncate(self.input.len() - give_back);
            appended - give_back
        } else {
            appended
        };
        Ok((consumed, produced, status))
    }

    fn is_finished(&self) -> bool {
        self.finished && self.out_pos == self.out_queue.len()
    }
}

/// LZMA2 encoder.
///
/// One inner LZMA encoder persists across chunks; its probability state
/// carries over unless a chunk stored uncompressed data in between, in
/// which case both sides resynchronize through a state-reset chunk.
pub struct Lzma2Encoder {
    inner: LzmaEncoder,
    props: LzmaProps,
    need_dict_reset: bool,
    props_sent: bool,
    need_state_reset: bool,
    out: Vec<u8>,
    out_pos: usize,
    input_done: bool,
    finished: bool,
}

impl Lzma2Encoder {
    /// Create an encoder from an options bundle.
    pub fn new(options: &LzmaOptions) -> Result<Self> {
        Ok(Self {
            inner: LzmaEncoder::for_chunks(options)?,
            props: options.props,
            need_dict_reset: true,
            props_sent: false,
            need_state_reset: false,
            out: Vec::new(),
            out_pos: 0,
            input_done: false,
            finished: false,
        })
    }

    /// Encode a whole buffer into an LZMA2 stream.
    pub fn encode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.compress_all(data)
    }

    fn encode_chunk(&mut self) {
        let did_state_reset = self.need_state_reset;
        if did_state_reset {
            self.inner.reset_model_state();
            self.need_state_reset = false;
        }

        let start = self.inner.position();
        while self.inner.remaining() > 0
            && self.inner.position() - start < CHUNK_UNPACKED_LIMIT
            && self.inner.rc_pending() < CHUNK_PACKED_LIMIT
        {
            self.inner.encode_one_packet();
        }
        let unpacked = self.inner.position() - start;
        let packed = self.inner.take_chunk();

        if packed.len() >= unpacked {
            self.write_uncompressed_chunks(start, unpacked);
            // The decoder never saw this chunk's model updates.
            self.need_state_reset = true;
            return;
        }

        let ctrl = if self.need_dict_reset {
            control::RESET_ALL
        } else if !self.props_sent {
            control::RESET_STATE_PROPS
        } else if did_state_reset {
            control::RESET_STATE
        } else {
            control::RESET_NONE
        };
        self.need_dict_reset = false;

        let size_bits = ((unpacked - 1) >> 16) as u8;
        self.out.push(ctrl | size_bits);
        self.out
            .extend_from_slice(&(((unpacked - 1) & 0xFFFF) as u16).to_be_bytes());
        self.out
            .extend_from_slice(&((packed.len() - 1) as u16).to_be_bytes());
        if control::has_props(ctrl) {
            self.out.push(self.props.to_byte());
            self.props_sent = true;
        }
        self.out.extend_from_slice(&packed);
        log::trace!(
            "lzma2 chunk: control={:#04x} unpacked={} packed={}",
            ctrl | size_bits,
            unpacked,
            packed.len()
        );
    }

    fn write_uncompressed_chunks(&mut self, start: usize, len: usize) {
        let mut off = 0;
        while off < len {
            let n = (len - off).min(UNCOMPRESSED_CHUNK_MAX);
            let ctrl = if self.need_dict_reset {
                control::UNCOMPRESSED_RESET
            } else {
                control::UNCOMPRESSED
            };
            self.need_dict_reset = false;
            self.props_sent = false;
            self.out.push(ctrl);
            self.out.extend_from_slice(&((n - 1) as u16).to_be_bytes());
            self.out
                .extend_from_slice(self.inner.chunk_data(start + off, start + off + n));
            off += n;
        }
    }

    fn drain_out(&mut self, output: &mut [u8]) -> usize {
        let n = output.len().min(self.out.len() - self.out_pos);
        output[..n].copy_from_slice(&self.out[self.out_pos..self.out_pos + n]);
        self.out_pos += n;
        n
    }
}

impl Compressor for Lzma2Encoder {
    fn compress(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        end_of_input: bool,
    ) -> Result<(usize, usize, CoderStatus)> {
        let consumed = input.len();
        if !input.is_empty() {
            self.inner.push_input(input);
        }
        if end_of_input && !self.input_done {
            self.input_done = true;
            while self.inner.remaining() > 0 {
                self.encode_chunk();
            }
            self.out.push(control::EOS);
            self.finished = true;
        }
        if !self.input_done {
            return Ok((consumed, 0, CoderStatus::NeedMoreInput));
        }

        let produced = self.drain_out(output);
        let status = if self.finished && self.out_pos == self.out.len() {
            CoderStatus::StreamEnd
        } else {
            CoderStatus::NeedMoreOutput
        };
        Ok((consumed, produced, status))
    }
}

/// Encode a buffer into an LZMA2 stream.
pub fn encode_lzma2(data: &[u8], options: &LzmaOptions) -> Result<Vec<u8>> {
    Lzma2Encoder::new(options)?.encode(data)
}

/// Decode an LZMA2 stream.
pub fn decode_lzma2(data: &[u8], dict_size: u32) -> Result<Vec<u8>> {
    Lzma2Decoder::new(dict_size).decompress_all(data)
}

/// Dictionary size from an LZMA2 dictionary-size properties byte:
/// `(2 | (props & 1)) << (props / 2 + 11)`.
pub fn dict_size_from_props(props: u8) -> u32 {
    if props >= 40 {
        return 0xFFFF_FFFF;
    }
    let base = 2 | (props & 1) as u32;
    base << (props / 2 + 11)
}

/// Smallest properties byte covering `dict_size`.
pub fn props_from_dict_size(dict_size: u32) -> u8 {
    for props in 0..40 {
        if dict_size_from_props(props) >= dict_size {
            return props;
        }
    }
    40
}
