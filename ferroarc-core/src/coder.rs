//! Streaming coder traits.
//!
//! Every compression algorithm in FerroArc exposes the same stepped
//! byte-in/byte-out interface: the caller hands in an input slice and an
//! output slice, the coder consumes and produces what it can, and reports
//! how to continue. A single call never blocks on I/O, which makes the
//! coders embeddable in blocking, async, or pipelined drivers alike.

use crate::error::Result;

/// Continuation status of a stepped coder call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoderStatus {
    /// The coder needs more input bytes to make progress.
    NeedMoreInput,
    /// The output buffer is full; call again with more output space.
    NeedMoreOutput,
    /// The stream is complete. Further calls are no-ops.
    StreamEnd,
}

/// A streaming compressor (encoder).
///
/// Input may be fed across any number of calls; `end_of_input` marks the
/// final piece. Output is drained incrementally: keep calling until the
/// status is [`CoderStatus::StreamEnd`].
pub trait Compressor {
    /// Compress bytes from `input` into `output`.
    ///
    /// Returns `(bytes consumed from input, bytes written to output,
    /// status)`. After a hard error the coder is poisoned and every later
    /// call fails without advancing.
    fn compress(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        end_of_input: bool,
    ) -> Result<(usize, usize, CoderStatus)>;

    /// Compress a whole buffer in one go (convenience driver).
    fn compress_all(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; 64 * 1024];
        let mut consumed_total = 0;

        loop {
            let (consumed, produced, status) =
                self.compress(&input[consumed_total..], &mut chunk, true)?;
            consumed_total += consumed;
            out.extend_from_slice(&chunk[..produced]);

            match status {
                CoderStatus::StreamEnd => break,
                CoderStatus::NeedMoreInput | CoderStatus::NeedMoreOutput => continue,
            }
        }

        Ok(out)
    }
}

/// A streaming decompressor (decoder).
///
/// An empty `input` slice tells the decoder that no more input will
/// arrive, letting it finish from internally buffered bytes.
pub trait Decompressor {
    /// Decompress bytes from `input` into `output`.
    ///
    /// Returns `(bytes consumed from input, bytes written to output,
    /// status)`. Input bytes past an end-of-stream marker are left
    /// unconsumed. After a hard error the coder is poisoned and every
    /// later call fails without advancing.
    fn decompress(&mut self, input: &[u8], output: &mut [u8])
    -> Result<(usize, usize, CoderStatus)>;

    /// Whether the end of the compressed stream has been reached.
    fn is_finished(&self) -> bool;

    /// Decompress a whole buffer in one go (convenience driver).
    fn decompress_all(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; 64 * 1024];
        let mut consumed_total = 0;

        loop {
            let (consumed, produced, status) =
                self.decompress(&input[consumed_total..], &mut chunk)?;
            consumed_total += consumed;
            out.extend_from_slice(&chunk[..produced]);

            match status {
                CoderStatus::StreamEnd => break,
                CoderStatus::NeedMoreOutput => continue,
                // All input is already on the table; an empty follow-up
                // call signals end of input.
                CoderStatus::NeedMoreInput => {
                    let (_, produced, status) = self.decompress(&[], &mut chunk)?;
                    out.extend_from_slice(&chunk[..produced]);
                    if status == CoderStatus::StreamEnd {
                        break;
                    }
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_equality() {
        assert_eq!(CoderStatus::StreamEnd, CoderStatus::StreamEnd);
        assert_ne!(CoderStatus::NeedMoreInput, CoderStatus::NeedMoreOutput);
    }
}
