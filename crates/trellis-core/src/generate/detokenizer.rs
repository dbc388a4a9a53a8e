//! Incremental detokenization.

use crate::error::Result;
use crate::model::TokenDecoder;
use std::sync::Arc;

const REPLACEMENT: char = '\u{FFFD}';

/// Turns a token stream into text chunks.
///
/// Tokens are decoded per segment so multi-token characters come out whole:
/// a chunk ending in a replacement character is held back until the next
/// token completes it. A segment ends at a newline; the newline token is kept
/// as the start of the next segment so decoders that strip leading spaces
/// see the same context as a full decode.
pub struct StreamingDetokenizer {
    decoder: Arc<dyn TokenDecoder>,
    segment: Vec<u32>,
    emitted: usize,
}

impl StreamingDetokenizer {
    /// Create over a decoder.
    pub fn new(decoder: Arc<dyn TokenDecoder>) -> Self {
        Self {
            decoder,
            segment: Vec::new(),
            emitted: 0,
        }
    }

    /// Add a token; returns the newly completed text, possibly empty.
    pub fn push(&mut self, token: u32) -> Result<String> {
        self.segment.push(token);
        let text = self.decoder.decode(&self.segment)?;
        if text.ends_with(REPLACEMENT) {
            return Ok(String::new());
        }
        let chunk = self.take_from(&text);
        if text.ends_with('\n') {
            if let Some(&last) = self.segment.last() {
                self.segment.clear();
                self.segment.push(last);
                self.emitted = self.decoder.decode(&self.segment)?.len();
            }
        }
        Ok(chunk)
    }

    /// Emit whatever is still held back.
    pub fn flush(&mut self) -> Result<String> {
        if self.segment.is_empty() {
            return Ok(String::new());
        }
        let text = self.decoder.decode(&self.segment)?;
        let chunk = self.take_from(&text);
        self.segment.clear();
        self.emitted = 0;
        Ok(chunk)
    }

    /// The decoder in use.
    pub fn decoder(&self) -> &Arc<dyn TokenDecoder> {
        &self.decoder
    }

    fn take_from(&mut self, text: &str) -> String {
        match text.get(self.emitted..) {
            Some(rest) => {
                self.emitted = text.len();
                rest.to_string()
            }
            None => String::new(),
        }
    }
}
