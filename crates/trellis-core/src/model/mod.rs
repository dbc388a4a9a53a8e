//! Model-side collaborators of the decode loop.
//!
//! - Metadata views used for vocabulary reconciliation
//! - The forward-pass interface and its KV cache
//! - Tokenizer wrapper and the token decoding interface

mod config;
mod kv_cache;
mod language_model;
mod tokenizer;

pub use config::{
    json_index, AddedToken, DecoderConfig, ModelConfig, ModelFiles, TokenizerConfig,
    TokenizerData, TokenizerModel,
};
pub use kv_cache::{KvCache, LayerCache};
pub use language_model::{input_tensor, last_position_logits, LanguageModel};
pub use tokenizer::{TokenDecoder, Tokenizer};
