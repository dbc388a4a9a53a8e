//! Model and tokenizer metadata.
//!
//! These are lenient views over `config.json`, `tokenizer_config.json` and
//! `tokenizer.json`. Every field that vocabulary reconciliation reads is
//! optional or kept as raw JSON so that odd metadata degrades instead of
//! failing to load.

use crate::error::{Result, TrellisError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Subset of a model `config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Declared vocabulary size (logit width).
    #[serde(default)]
    pub vocab_size: Option<Value>,
    /// Model architecture type.
    #[serde(default)]
    pub model_type: Option<String>,
}

impl ModelConfig {
    /// Config with an explicit vocabulary size.
    pub fn with_vocab_size(vocab_size: usize) -> Self {
        Self {
            vocab_size: Some(Value::from(vocab_size)),
            model_type: None,
        }
    }

    /// Declared vocabulary size, if present and a non-negative integer.
    pub fn declared_vocab_size(&self) -> Option<usize> {
        self.vocab_size.as_ref().and_then(json_index)
    }

    /// Load from JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

/// Subset of a `tokenizer_config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// End-of-sequence token, either a string or an added-token object.
    #[serde(default)]
    pub eos_token: Option<Value>,
}

impl TokenizerConfig {
    /// Config with a plain string EOS token.
    pub fn with_eos_token(token: impl Into<String>) -> Self {
        Self {
            eos_token: Some(Value::String(token.into())),
        }
    }

    /// Surface string of the EOS token.
    pub fn eos_token(&self) -> Option<&str> {
        match self.eos_token.as_ref()? {
            Value::String(s) => Some(s),
            Value::Object(map) => map.get("content").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Load from JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

/// Subset of a `tokenizer.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenizerData {
    /// Tokenization model section.
    #[serde(default)]
    pub model: TokenizerModel,
    /// Tokens added on top of the base vocabulary.
    #[serde(default)]
    pub added_tokens: Option<Vec<AddedToken>>,
    /// Decoder pipeline.
    #[serde(default)]
    pub decoder: Option<DecoderConfig>,
}

impl TokenizerData {
    /// Load from JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        read_json(path)
    }

    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// The `model` section of a `tokenizer.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenizerModel {
    /// Model type (`BPE`, `Unigram`, `WordPiece`, ...).
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Either `{token: id}` or a Unigram list of `[piece, score]`.
    #[serde(default)]
    pub vocab: Option<Value>,
}

/// An entry of the `added_tokens` list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddedToken {
    /// Token index.
    #[serde(default)]
    pub id: Option<Value>,
    /// Surface string.
    #[serde(default)]
    pub content: Option<Value>,
    /// Whether the tokenizer treats it as special.
    #[serde(default)]
    pub special: Option<bool>,
}

impl AddedToken {
    /// Create an added token.
    pub fn new(id: usize, content: impl Into<String>) -> Self {
        Self {
            id: Some(Value::from(id)),
            content: Some(Value::String(content.into())),
            special: None,
        }
    }
}

/// A (possibly composite) decoder description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Decoder type (`Sequence`, `ByteLevel`, `ByteFallback`, ...).
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Children of a `Sequence` decoder.
    #[serde(default)]
    pub decoders: Option<Vec<DecoderConfig>>,
}

impl DecoderConfig {
    /// Decoder of the given type.
    pub fn of(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            decoders: None,
        }
    }

    /// `Sequence` decoder over children.
    pub fn sequence(decoders: Vec<DecoderConfig>) -> Self {
        Self {
            kind: Some("Sequence".to_string()),
            decoders: Some(decoders),
        }
    }
}

/// The three metadata files of a model directory.
#[derive(Debug, Clone, Default)]
pub struct ModelFiles {
    /// `config.json`, if present.
    pub model_config: Option<ModelConfig>,
    /// `tokenizer_config.json`, if present.
    pub tokenizer_config: Option<TokenizerConfig>,
    /// `tokenizer.json`.
    pub tokenizer_data: TokenizerData,
}

impl ModelFiles {
    /// Load metadata from a model directory.
    ///
    /// `tokenizer.json` is required; the two config files are optional and a
    /// malformed optional file is logged and ignored.
    pub fn from_dir<P: AsRef<Path>>(model_dir: P) -> Result<Self> {
        let dir = model_dir.as_ref();
        let tokenizer_path = dir.join("tokenizer.json");
        if !tokenizer_path.exists() {
            return Err(TrellisError::Construction(format!(
                "tokenizer.json not found in {}",
                dir.display()
            )));
        }
        let tokenizer_data = TokenizerData::from_file(&tokenizer_path)?;
        let model_config = read_optional(&dir.join("config.json"));
        let tokenizer_config = read_optional(&dir.join("tokenizer_config.json"));

        Ok(Self {
            model_config,
            tokenizer_config,
            tokenizer_data,
        })
    }
}

/// Interpret a JSON value as a vocabulary index.
///
/// Accepts non-negative integers and integral floats; anything else is `None`.
pub fn json_index(value: &Value) -> Option<usize> {
    if let Some(n) = value.as_u64() {
        return usize::try_from(n).ok();
    }
    match value.as_f64() {
        Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= usize::MAX as f64 => Some(f as usize),
        _ => None,
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn read_optional<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }
    match read_json(path) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable metadata file");
            None
        }
    }
}
