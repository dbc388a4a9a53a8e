//! Tokenizer integration for text-to-token and token-to-text conversion.
//!
//! Wraps the HuggingFace tokenizers library. Generation only needs the
//! decoding half, expressed as [`TokenDecoder`], so tests and small grammars
//! can decode through a reconciled vocabulary instead.

use crate::error::{Result, TrellisError};
use std::path::Path;
use tokenizers::Tokenizer as HfTokenizer;

/// Turns generated token ids back into text.
pub trait TokenDecoder: Send + Sync {
    /// Decode a token sequence, omitting special and stop tokens.
    fn decode(&self, ids: &[u32]) -> Result<String>;
}

/// Tokenizer for encoding prompts and decoding generated tokens.
#[derive(Clone)]
pub struct Tokenizer {
    /// Underlying HuggingFace tokenizer.
    inner: HfTokenizer,
}

impl Tokenizer {
    /// Load a tokenizer from a tokenizer.json file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let inner = HfTokenizer::from_file(path.as_ref())
            .map_err(|e| TrellisError::Construction(format!("Failed to load tokenizer: {}", e)))?;
        Ok(Self { inner })
    }

    /// Load a tokenizer from the contents of a tokenizer.json file.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Result<Self> {
        let inner = HfTokenizer::from_bytes(bytes)
            .map_err(|e| TrellisError::Construction(format!("Failed to load tokenizer: {}", e)))?;
        Ok(Self { inner })
    }

    /// Load a tokenizer from a model directory.
    ///
    /// Looks for tokenizer.json in the directory.
    pub fn from_dir<P: AsRef<Path>>(model_dir: P) -> Result<Self> {
        let tokenizer_path = model_dir.as_ref().join("tokenizer.json");
        if !tokenizer_path.exists() {
            return Err(TrellisError::Construction(format!(
                "tokenizer.json not found in {}",
                model_dir.as_ref().display()
            )));
        }
        Self::from_file(tokenizer_path)
    }

    /// Encode text to token IDs.
    ///
    /// `add_special_tokens` applies the tokenizer's post-processor (BOS etc.).
    pub fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| TrellisError::InvalidInput(format!("Failed to encode text: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Get vocabulary size, including added tokens.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// String to token ID.
    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }
}

impl TokenDecoder for Tokenizer {
    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| TrellisError::Model(format!("Failed to decode tokens: {}", e)))
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("vocab_size", &self.vocab_size())
            .finish()
    }
}
