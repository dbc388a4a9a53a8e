//! Vocabulary reconciliation from tokenizer and model metadata.

use super::{StopTokenSet, TokenizerInfo, VocabEncoding, Vocabulary};
use crate::model::{json_index, DecoderConfig, ModelConfig, TokenizerConfig, TokenizerData};
use serde_json::Value;
use tracing::{debug, trace, warn};

/// Largest vocabulary a reconciliation will allocate.
///
/// Real vocabularies stay well below this; indices at or above it are
/// treated as corrupt.
pub const MAX_VOCAB_SIZE: usize = 1 << 24;

/// Builds a [`TokenizerInfo`] from heterogeneous metadata.
///
/// Reconciliation is total: missing fields and malformed entries are
/// skipped, never reported as errors.
///
/// # Example
///
/// ```rust,ignore
/// let files = ModelFiles::from_dir("models/qwen2.5-0.5b")?;
/// let info = VocabularyReconciler::new()
///     .extra_eos_tokens(["<|im_end|>"])
///     .reconcile_files(&files);
/// ```
#[derive(Debug, Clone, Default)]
pub struct VocabularyReconciler {
    extra_eos_tokens: Vec<String>,
}

impl VocabularyReconciler {
    /// Reconciler without extra end tokens.
    pub fn new() -> Self {
        Self::default()
    }

    /// Additional end-of-sequence token strings declared by the user.
    pub fn extra_eos_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_eos_tokens.extend(tokens.into_iter().map(Into::into));
        self
    }

    /// Reconcile a loaded model directory.
    pub fn reconcile_files(&self, files: &crate::model::ModelFiles) -> TokenizerInfo {
        self.reconcile(
            files.model_config.as_ref(),
            files.tokenizer_config.as_ref(),
            &files.tokenizer_data,
        )
    }

    /// Produce the vocabulary, its encoding and the stop token set.
    pub fn reconcile(
        &self,
        model_config: Option<&ModelConfig>,
        tokenizer_config: Option<&TokenizerConfig>,
        tokenizer_data: &TokenizerData,
    ) -> TokenizerInfo {
        let mut base = base_entries(tokenizer_data.model.vocab.as_ref());
        base.retain(|(index, _)| in_range(*index));
        let mut added = added_entries(tokenizer_data);
        added.retain(|(index, _, _)| in_range(*index));

        let declared = model_config
            .and_then(ModelConfig::declared_vocab_size)
            .map(|size| {
                if size > MAX_VOCAB_SIZE {
                    warn!(size, limit = MAX_VOCAB_SIZE, "declared vocab size too large, clamping");
                }
                size.min(MAX_VOCAB_SIZE)
            });
        let max_observed = base
            .iter()
            .map(|(i, _)| *i)
            .chain(added.iter().map(|(i, _, _)| *i))
            .max();
        let size = declared
            .unwrap_or(0)
            .max(max_observed.map_or(0, |i| i.saturating_add(1)))
            .max(1);

        let mut tokens = vec![String::new(); size];
        for (index, token) in base {
            tokens[index] = token.to_string();
        }
        let mut special = Vec::new();
        for (index, token, is_special) in added {
            tokens[index] = token.to_string();
            if is_special {
                special.push(index as u32);
            }
        }
        let vocabulary = Vocabulary::new(tokens);

        let encoding = classify_encoding(tokenizer_data.decoder.as_ref());
        let stop_tokens = self.stop_tokens(&vocabulary, tokenizer_config);

        debug!(
            vocab_size = vocabulary.len(),
            declared_vocab_size = ?declared,
            %encoding,
            stop_tokens = ?stop_tokens.ids(),
            special_tokens = special.len(),
            "reconciled vocabulary"
        );

        TokenizerInfo::new(vocabulary, encoding, stop_tokens).with_special_tokens(special)
    }

    fn stop_tokens(
        &self,
        vocabulary: &Vocabulary,
        tokenizer_config: Option<&TokenizerConfig>,
    ) -> StopTokenSet {
        let eos = tokenizer_config.and_then(TokenizerConfig::eos_token);
        let mut stop = StopTokenSet::new();
        for token in self.extra_eos_tokens.iter().map(String::as_str).chain(eos) {
            match vocabulary.position(token) {
                Some(id) => {
                    stop.insert(id);
                }
                None => trace!(token, "end token not in vocabulary"),
            }
        }
        stop
    }
}

/// Flatten the decoder pipeline and pick the first byte-handling scheme.
pub(crate) fn classify_encoding(decoder: Option<&DecoderConfig>) -> VocabEncoding {
    let Some(decoder) = decoder else {
        return VocabEncoding::Plain;
    };
    let pipeline: Vec<&DecoderConfig> = match decoder.kind.as_deref() {
        Some("Sequence") => decoder.decoders.iter().flatten().collect(),
        _ => vec![decoder],
    };
    pipeline
        .into_iter()
        .find_map(|d| d.kind.as_deref().and_then(VocabEncoding::from_decoder_type))
        .unwrap_or_default()
}

/// `(index, token)` pairs of the base vocabulary.
///
/// Object form is `{token: index}`; array form is Unigram's list of
/// `[piece, score]` where the position is the index.
fn base_entries(vocab: Option<&Value>) -> Vec<(usize, &str)> {
    match vocab {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(token, index)| match json_index(index) {
                Some(i) => Some((i, token.as_str())),
                None => {
                    trace!(token = token.as_str(), index = %index, "skipping malformed vocab index");
                    None
                }
            })
            .collect(),
        Some(Value::Array(pieces)) => pieces
            .iter()
            .enumerate()
            .filter_map(|(i, piece)| {
                let token = match piece {
                    Value::Array(pair) => pair.first()?.as_str()?,
                    Value::String(s) => s.as_str(),
                    _ => return None,
                };
                Some((i, token))
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// `(index, token, special)` triples of the added-token list.
fn added_entries(data: &TokenizerData) -> Vec<(usize, &str, bool)> {
    data.added_tokens
        .iter()
        .flatten()
        .filter_map(|added| {
            let index = added.id.as_ref().and_then(json_index)?;
            let token = added.content.as_ref()?.as_str()?;
            Some((index, token, added.special.unwrap_or(false)))
        })
        .collect()
}

fn in_range(index: usize) -> bool {
    if index >= MAX_VOCAB_SIZE {
        warn!(index, limit = MAX_VOCAB_SIZE, "skipping out-of-range token index");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AddedToken;
    use serde_json::json;

    fn data(vocab: Value, added: Vec<AddedToken>, decoder: Option<DecoderConfig>) -> TokenizerData {
        TokenizerData {
            model: crate::model::TokenizerModel {
                kind: None,
                vocab: Some(vocab),
            },
            added_tokens: Some(added),
            decoder,
        }
    }

    #[test]
    fn size_covers_declared_and_observed() {
        let d = data(json!({"a": 0, "b": 1}), vec![AddedToken::new(7, "<x>")], None);

        let info = VocabularyReconciler::new().reconcile(None, None, &d);
        assert_eq!(info.vocab_size(), 8);
        assert_eq!(&info.vocabulary()[7], "<x>");
        assert_eq!(&info.vocabulary()[3], "");

        let config = ModelConfig::with_vocab_size(16);
        let info = VocabularyReconciler::new().reconcile(Some(&config), None, &d);
        assert_eq!(info.vocab_size(), 16);

        // A declared size smaller than the tokenizer is widened.
        let config = ModelConfig::with_vocab_size(2);
        let info = VocabularyReconciler::new().reconcile(Some(&config), None, &d);
        assert_eq!(info.vocab_size(), 8);
    }

    #[test]
    fn empty_metadata_gives_one_slot() {
        let info = VocabularyReconciler::new().reconcile(None, None, &TokenizerData::default());
        assert_eq!(info.vocab_size(), 1);
        assert_eq!(info.encoding(), VocabEncoding::Plain);
        assert!(info.stop_tokens().is_empty());
    }

    #[test]
    fn added_tokens_win_collisions() {
        let d = data(json!({"a": 0, "b": 1}), vec![AddedToken::new(1, "<eos>")], None);
        let info = VocabularyReconciler::new().reconcile(None, None, &d);
        assert_eq!(&info.vocabulary()[1], "<eos>");
        assert_eq!(&info.vocabulary()[0], "a");
    }

    #[test]
    fn malformed_indices_are_skipped() {
        let d = data(
            json!({"a": 0, "neg": -3, "frac": 1.5, "str": "2", "ok": 2.0}),
            vec![AddedToken {
                id: Some(json!(-1)),
                content: Some(json!("bad")),
                special: None,
            }],
            None,
        );
        let info = VocabularyReconciler::new().reconcile(None, None, &d);
        assert_eq!(info.vocab_size(), 3);
        assert_eq!(info.vocabulary().tokens(), &["a", "", "ok"]);
    }

    #[test]
    fn corrupt_index_is_skipped() {
        let d = data(
            json!({"a": 0, "b": 1}),
            vec![AddedToken::new(1 << 40, "<huge>"), AddedToken::new(2, "<ok>")],
            None,
        );
        let info = VocabularyReconciler::new().reconcile(None, None, &d);
        assert_eq!(info.vocab_size(), 3);
        assert_eq!(&info.vocabulary()[2], "<ok>");
        assert_eq!(info.vocabulary().position("<huge>"), None);
    }

    #[test]
    fn special_added_tokens_are_tracked() {
        let special = |id: usize, content: &str| AddedToken {
            special: Some(true),
            ..AddedToken::new(id, content)
        };
        let d = data(
            json!({"a": 0}),
            vec![special(1, "<|im_start|>"), special(2, "<|im_end|>"), AddedToken::new(3, "plain")],
            None,
        );
        let info = VocabularyReconciler::new()
            .extra_eos_tokens(["<|im_end|>"])
            .reconcile(None, None, &d);
        assert!(info.is_special_token(1));
        // Stop tokens keep their own role.
        assert!(!info.is_special_token(2));
        assert!(info.is_stop_token(2));
        assert!(!info.is_special_token(3));
    }

    #[test]
    fn unigram_vocab_uses_positions() {
        let d = data(json!([["<unk>", 0.0], ["\u{2581}a", -1.2], ["b", -3.4]]), vec![], None);
        let info = VocabularyReconciler::new().reconcile(None, None, &d);
        assert_eq!(info.vocab_size(), 3);
        assert_eq!(&info.vocabulary()[1], "\u{2581}a");
    }

    #[test]
    fn encoding_first_match_wins() {
        let seq = DecoderConfig::sequence(vec![
            DecoderConfig::of("Replace"),
            DecoderConfig::of("ByteFallback"),
            DecoderConfig::of("ByteLevel"),
        ]);
        assert_eq!(classify_encoding(Some(&seq)), VocabEncoding::ByteFallback);
        assert_eq!(
            classify_encoding(Some(&DecoderConfig::of("ByteLevel"))),
            VocabEncoding::ByteLevel
        );
        assert_eq!(
            classify_encoding(Some(&DecoderConfig::of("Metaspace"))),
            VocabEncoding::Plain
        );
        assert_eq!(classify_encoding(None), VocabEncoding::Plain);
    }

    #[test]
    fn nested_sequences_are_not_flattened() {
        let nested = DecoderConfig::sequence(vec![DecoderConfig::sequence(vec![
            DecoderConfig::of("ByteLevel"),
        ])]);
        assert_eq!(classify_encoding(Some(&nested)), VocabEncoding::Plain);
    }

    #[test]
    fn stop_tokens_from_extra_and_eos() {
        let d = data(
            json!({"a": 0, "</s>": 1, "<|im_end|>": 2}),
            vec![],
            Some(DecoderConfig::of("ByteLevel")),
        );
        let info = VocabularyReconciler::new()
            .extra_eos_tokens(["<|im_end|>", "<missing>", "</s>"])
            .reconcile(None, Some(&TokenizerConfig::with_eos_token("</s>")), &d);
        assert_eq!(info.stop_tokens().ids(), &[2, 1]);
        assert_eq!(info.encoding(), VocabEncoding::ByteLevel);
    }

    #[test]
    fn length_bounds_every_referenced_index() {
        for (declared, indices) in [(None, vec![0usize, 5, 2]), (Some(3), vec![9]), (Some(40), vec![])] {
            let vocab: serde_json::Map<String, Value> = indices
                .iter()
                .map(|i| (format!("t{i}"), json!(i)))
                .collect();
            let d = data(Value::Object(vocab), vec![], None);
            let config = declared.map(ModelConfig::with_vocab_size);
            let info = VocabularyReconciler::new().reconcile(config.as_ref(), None, &d);
            assert!(info.vocab_size() >= 1);
            assert!(info.vocab_size() >= declared.unwrap_or(0));
            for i in indices {
                assert!(info.vocab_size() > i);
                assert_eq!(&info.vocabulary()[i], format!("t{i}"));
            }
        }
    }
}
