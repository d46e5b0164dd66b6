//! Sliding-window dictionary for LZMA decoding.
//!
//! A circular byte buffer holding the most recent `capacity` bytes of
//! output. Back-references address it by distance: distance `d` names the
//! byte written `d + 1` positions ago. Any capacity is accepted, not just
//! powers of two, because LZMA headers may declare arbitrary sizes.

use ferroarc_core::error::{FerroArcError, Result};

/// Circular history buffer for back-reference resolution.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    buf: Vec<u8>,
    pos: usize,
    full: bool,
}

impl SlidingWindow {
    /// Create a window with the given capacity in bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: u32) -> Self {
        assert!(capacity > 0, "window capacity must be greater than 0");
        Self {
            buf: vec![0; capacity as usize],
            pos: 0,
            full: false,
        }
    }

    /// Window capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of bytes currently addressable.
    pub fn len(&self) -> usize {
        if self.full { self.buf.len() } else { self.pos }
    }

    /// Whether nothing has been written since the last reset.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all history.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.full = false;
        self.buf.fill(0);
    }

    /// Append one byte.
    pub fn append(&mut self, byte: u8) {
        self.buf[self.pos] = byte;
        self.pos += 1;
        if self.pos == self.buf.len() {
            self.pos = 0;
            self.full = true;
        }
    }

    /// Read the byte written `distance + 1` positions ago.
    pub fn get(&self, distance: u32) -> Result<u8> {
        let distance = distance as usize;
        if distance >= self.len() {
            return Err(FerroArcError::invalid_distance(
                distance as u64,
                self.len() as u64,
            ));
        }

        let index = if self.pos > distance {
            self.pos - distance - 1
        } else {
            self.buf.len() - (distance - self.pos) - 1
        };
        Ok(self.buf[index])
    }

    /// Copy `length` bytes from the back-reference at `distance`,
    /// appending them to the window and to `out`.
    ///
    /// Copies byte-at-a-time so an overlapping reference
    /// (`distance < length`) repeats itself, as LZ77 semantics require.
    pub fn copy_match(&mut self, distance: u32, length: u32, out: &mut Vec<u8>) -> Result<()> {
        for _ in 0..length {
            let byte = self.get(distance)?;
            self.append(byte);
            out.push(byte);
        }
        Ok(())
    }
}
