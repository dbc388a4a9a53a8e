//! # Trellis Core
//!
//! Grammar-constrained decoding for autoregressive language models.
//!
//! This crate provides:
//! - **Vocabulary reconciliation** from heterogeneous tokenizer metadata
//! - **Grammar matching** behind a two-method engine seam (mask, accept)
//! - **Masked logit processing** so sampling can only pick permitted tokens
//! - **Token iteration** with chunked prefill, KV cache and stop conditions
//! - **Result projection** into typed values, complete or partial
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use trellis_core::prelude::*;
//!
//! let info = Arc::new(VocabularyReconciler::new().reconcile_files(&files));
//! let matcher = GrammarMatcher::new(info.clone(), Grammar::regex("[0-9]+").compile()?)?;
//! let mut iter = TokenIterator::constrained(prompt, model, matcher, info, GenerateParameters::default())?;
//! let result = collect(&mut iter, |_| Disposition::Continue).await?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod generate;
pub mod grammar;
pub mod model;
pub mod processor;
pub mod projection;
pub mod sampling;
pub mod vocab;

pub use error::{Result, TrellisError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Result, TrellisError};
    pub use crate::generate::{
        Disposition, GenerateParameters, Generation, GenerationStream, StopReason, TokenIterator,
    };
    pub use crate::grammar::{AdvanceResult, CompiledGrammar, Grammar, GrammarMatcher, TokenMask};
    pub use crate::model::{KvCache, LanguageModel, ModelFiles, TokenDecoder, Tokenizer};
    pub use crate::processor::MaskedLogitProcessor;
    pub use crate::projection::{collect, parse, project_partial, GenerateResult, PartialProjection};
    pub use crate::sampling::{LogitsSampler, Sampler, SamplingParams};
    pub use crate::vocab::{TokenizerInfo, VocabEncoding, VocabularyReconciler};
}
