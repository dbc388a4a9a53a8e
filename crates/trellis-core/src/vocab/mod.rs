//! Canonical token vocabulary.
//!
//! Tokenizer metadata describes the vocabulary in several overlapping
//! places. This module reconciles them into one index-stable [`Vocabulary`],
//! classifies its [`VocabEncoding`] and resolves the [`StopTokenSet`]. The
//! result is bundled as an immutable [`TokenizerInfo`] which is shared
//! read-only by every generation built from it.

mod encoding;
mod reconcile;

pub use encoding::VocabEncoding;
pub use reconcile::{VocabularyReconciler, MAX_VOCAB_SIZE};

use crate::error::{Result, TrellisError};
use crate::model::TokenDecoder;
use std::ops::Index;
use std::sync::OnceLock;

/// Index-stable token strings; `vocab[i]` is the surface string of token `i`.
///
/// Unused indices hold the empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    tokens: Vec<String>,
}

impl Vocabulary {
    /// Wrap a list of token strings. An empty list becomes one empty slot.
    pub fn new(mut tokens: Vec<String>) -> Self {
        if tokens.is_empty() {
            tokens.push(String::new());
        }
        Self { tokens }
    }

    /// Number of token ids.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Always false; a vocabulary has at least one slot.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Surface string of a token.
    pub fn get(&self, token: u32) -> Option<&str> {
        self.tokens.get(token as usize).map(String::as_str)
    }

    /// First index holding exactly `token`. Empty strings never match.
    pub fn position(&self, token: &str) -> Option<u32> {
        if token.is_empty() {
            return None;
        }
        self.tokens.iter().position(|t| t == token).map(|i| i as u32)
    }

    /// All token strings in index order.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

impl Index<usize> for Vocabulary {
    type Output = str;

    fn index(&self, index: usize) -> &str {
        &self.tokens[index]
    }
}

/// Token ids that end generation, in insertion order without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopTokenSet {
    ids: Vec<u32>,
}

impl StopTokenSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an id; returns false if it was already present.
    pub fn insert(&mut self, id: u32) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// Whether `id` is a stop token.
    pub fn contains(&self, id: u32) -> bool {
        self.ids.contains(&id)
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    /// Number of stop ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether there are no stop ids.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<u32> for StopTokenSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut set = StopTokenSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

/// Reconciled vocabulary, its encoding and its stop tokens.
#[derive(Debug)]
pub struct TokenizerInfo {
    vocabulary: Vocabulary,
    encoding: VocabEncoding,
    stop_tokens: StopTokenSet,
    special_tokens: Vec<u32>,
    token_bytes: OnceLock<std::result::Result<Vec<Vec<u8>>, String>>,
}

impl TokenizerInfo {
    /// Bundle the three reconciliation outputs.
    pub fn new(vocabulary: Vocabulary, encoding: VocabEncoding, stop_tokens: StopTokenSet) -> Self {
        Self {
            vocabulary,
            encoding,
            stop_tokens,
            special_tokens: Vec::new(),
            token_bytes: OnceLock::new(),
        }
    }

    /// Mark control tokens (chat markers and the like) that are not text.
    ///
    /// Stop tokens keep their stop role even when listed here.
    pub fn with_special_tokens(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.special_tokens = ids
            .into_iter()
            .filter(|&id| !self.stop_tokens.contains(id))
            .collect();
        self.special_tokens.sort_unstable();
        self.special_tokens.dedup();
        self.token_bytes = OnceLock::new();
        self
    }

    /// Plain-encoded vocabulary from string slices; handy for small grammars.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S], stop_tokens: &[u32]) -> Self {
        let vocabulary = Vocabulary::new(tokens.iter().map(|t| t.as_ref().to_string()).collect());
        Self::new(
            vocabulary,
            VocabEncoding::Plain,
            stop_tokens.iter().copied().collect(),
        )
    }

    /// The vocabulary.
    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Vocabulary size.
    pub fn vocab_size(&self) -> usize {
        self.vocabulary.len()
    }

    /// Vocabulary encoding.
    pub fn encoding(&self) -> VocabEncoding {
        self.encoding
    }

    /// Stop tokens.
    pub fn stop_tokens(&self) -> &StopTokenSet {
        &self.stop_tokens
    }

    /// Whether `token` ends generation.
    pub fn is_stop_token(&self, token: u32) -> bool {
        self.stop_tokens.contains(token)
    }

    /// Special, non-stop token ids in ascending order.
    pub fn special_tokens(&self) -> &[u32] {
        &self.special_tokens
    }

    /// Whether `token` is a control token that never appears as text.
    pub fn is_special_token(&self, token: u32) -> bool {
        self.special_tokens.binary_search(&token).is_ok()
    }

    /// Raw bytes of every token, decoded once and cached.
    ///
    /// Special tokens have no bytes. Fails when a token cannot be decoded
    /// under the declared encoding.
    pub fn token_bytes(&self) -> Result<&[Vec<u8>]> {
        let decoded = self.token_bytes.get_or_init(|| {
            self.vocabulary
                .tokens()
                .iter()
                .enumerate()
                .map(|(id, t)| {
                    if self.is_special_token(id as u32) {
                        Ok(Vec::new())
                    } else {
                        self.encoding.token_bytes(t)
                    }
                })
                .collect()
        });
        match decoded {
            Ok(bytes) => Ok(bytes.as_slice()),
            Err(e) => Err(TrellisError::Construction(format!(
                "vocabulary does not match {} encoding: {}",
                self.encoding, e
            ))),
        }
    }
}

impl TokenDecoder for TokenizerInfo {
    fn decode(&self, ids: &[u32]) -> Result<String> {
        let table = self.token_bytes()?;
        let mut bytes = Vec::new();
        for &id in ids {
            if self.is_stop_token(id) {
                continue;
            }
            if let Some(token) = table.get(id as usize) {
                bytes.extend_from_slice(token);
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_never_empty() {
        let vocab = Vocabulary::new(Vec::new());
        assert_eq!(vocab.len(), 1);
        assert_eq!(&vocab[0], "");
    }

    #[test]
    fn position_skips_empty() {
        let vocab = Vocabulary::new(vec!["".into(), "a".into(), "a".into()]);
        assert_eq!(vocab.position("a"), Some(1));
        assert_eq!(vocab.position(""), None);
        assert_eq!(vocab.position("b"), None);
    }

    #[test]
    fn stop_set_dedups() {
        let set: StopTokenSet = [3, 1, 3].into_iter().collect();
        assert_eq!(set.ids(), &[3, 1]);
        assert!(set.contains(1));
    }

    #[test]
    fn decode_skips_stop_tokens() {
        let info = TokenizerInfo::from_tokens(&["a", "b", "</s>"], &[2]);
        assert_eq!(info.decode(&[0, 1, 2]).unwrap(), "ab");
    }

    #[test]
    fn special_tokens_have_no_text() {
        let info = TokenizerInfo::from_tokens(&["a", "<|im_start|>", "</s>"], &[2])
            .with_special_tokens([1, 2]);
        assert_eq!(info.special_tokens(), &[1]);
        assert!(info.token_bytes().unwrap()[1].is_empty());
        assert_eq!(info.decode(&[1, 0, 2]).unwrap(), "a");
    }

    #[test]
    fn byte_fallback_mismatch_is_construction_error() {
        let info = TokenizerInfo::new(
            Vocabulary::new(vec!["<0xQQ>".into()]),
            VocabEncoding::ByteFallback,
            StopTokenSet::new(),
        );
        assert!(matches!(
            info.token_bytes(),
            Err(TrellisError::Construction(_))
        ));
    }
}
