//! Word-level reads over a flat command buffer.
//!
//! The stream is a sequence of 32-bit words. Operation tags are four
//! ASCII bytes and are byte-swapped before being matched against the
//! tag table; every other field is read host-native at the current
//! cursor. This asymmetry is part of the closed wire contract between
//! the in-process producer and this decoder and must not be "fixed".

use crate::errors::RenderError;

/// Cursor over a word buffer. All reads advance the cursor; reads past
/// the end fail with [`RenderError::StructuralTruncation`].
pub struct WordReader<'a> {
    words: &'a [u32],
    cursor: usize,
}

impl<'a> WordReader<'a> {
    pub fn new(words: &'a [u32]) -> Self {
        Self { words, cursor: 0 }
    }

    /// Current cursor position in words.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// `true` once every word has been consumed.
    pub fn is_at_end(&self) -> bool {
        self.cursor >= self.words.len()
    }

    fn next_word(&mut self) -> Result<u32, RenderError> {
        let word = self
            .words
            .get(self.cursor)
            .copied()
            .ok_or(RenderError::StructuralTruncation { offset: self.cursor })?;
        self.cursor += 1;
        Ok(word)
    }

    /// Reads an operation tag: the next word with its bytes reversed,
    /// so the result compares against big-endian ASCII constants.
    pub fn read_tag(&mut self) -> Result<u32, RenderError> {
        Ok(self.next_word()?.swap_bytes())
    }

    pub fn read_u32(&mut self) -> Result<u32, RenderError> {
        self.next_word()
    }

    pub fn read_i32(&mut self) -> Result<i32, RenderError> {
        Ok(self.next_word()? as i32)
    }

    pub fn read_f32(&mut self) -> Result<f32, RenderError> {
        Ok(f32::from_bits(self.next_word()?))
    }

    /// Doubles occupy two consecutive words in memory order.
    pub fn read_f64(&mut self) -> Result<f64, RenderError> {
        let lo = self.next_word()?;
        let hi = self.next_word()?;
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&lo.to_ne_bytes());
        bytes[4..].copy_from_slice(&hi.to_ne_bytes());
        Ok(f64::from_ne_bytes(bytes))
    }

    /// Booleans occupy one word; nonzero is `true`.
    pub fn read_bool(&mut self) -> Result<bool, RenderError> {
        Ok(self.next_word()? != 0)
    }

    /// Length-prefixed UTF-8 string, padded to the next word boundary.
    /// Padding bytes are not interpreted.
    pub fn read_string(&mut self) -> Result<String, RenderError> {
        let len = self.read_u32()? as usize;
        let word_count = len.div_ceil(4);
        let mut bytes = Vec::with_capacity(word_count * 4);
        for _ in 0..word_count {
            bytes.extend_from_slice(&self.next_word()?.to_ne_bytes());
        }
        bytes.truncate(len);
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
