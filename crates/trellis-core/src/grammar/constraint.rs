//! Grammar descriptions and the engine interface.
//!
//! A [`Grammar`] is what the caller asks for. Compiling it yields a
//! [`CompiledGrammar`], an immutable handle that can be shared across any
//! number of sessions. Binding a compiled grammar to a vocabulary yields an
//! [`EngineMatcher`], the per-session state that computes masks and advances
//! on accepted tokens.

use super::TokenMask;
use crate::error::Result;
use crate::vocab::TokenizerInfo;
use std::fmt;
use std::sync::Arc;

/// Type of grammar constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Grammar {
    /// JSON schema constraint, with an optional indentation hint.
    JsonSchema {
        /// Schema source.
        schema: String,
        /// Indentation width the output should be formatted with.
        indent: Option<usize>,
    },
    /// Regular expression constraint.
    Regex(String),
    /// Context-free grammar (Lark format).
    Lark(String),
    /// No constraint (allow all tokens).
    None,
}

impl Grammar {
    /// Create a JSON schema constraint.
    pub fn json_schema(schema: impl Into<String>) -> Self {
        Grammar::JsonSchema {
            schema: schema.into(),
            indent: None,
        }
    }

    /// Create a JSON schema constraint with indented output.
    pub fn json_schema_indented(schema: impl Into<String>, indent: usize) -> Self {
        Grammar::JsonSchema {
            schema: schema.into(),
            indent: Some(indent),
        }
    }

    /// Create a regex constraint.
    pub fn regex(pattern: impl Into<String>) -> Self {
        Grammar::Regex(pattern.into())
    }

    /// Create a Lark CFG constraint.
    pub fn lark(grammar: impl Into<String>) -> Self {
        Grammar::Lark(grammar.into())
    }

    /// Check if this is a no-constraint grammar.
    pub fn is_none(&self) -> bool {
        matches!(self, Grammar::None)
    }

    /// Compile into an engine handle.
    ///
    /// Regular expressions use the built-in DFA engine. JSON schemas and
    /// Lark grammars need the `llguidance` feature.
    pub fn compile(&self) -> Result<Arc<dyn CompiledGrammar>> {
        match self {
            Grammar::None => Ok(Arc::new(Unconstrained)),
            Grammar::Regex(pattern) => Ok(Arc::new(super::DfaGrammar::new(pattern)?)),
            #[cfg(feature = "llguidance")]
            Grammar::JsonSchema { schema, indent } => {
                Ok(Arc::new(super::LlgGrammar::json_schema(schema, *indent)?))
            }
            #[cfg(feature = "llguidance")]
            Grammar::Lark(source) => Ok(Arc::new(super::LlgGrammar::lark(source))),
            #[cfg(not(feature = "llguidance"))]
            Grammar::JsonSchema { .. } | Grammar::Lark(_) => Err(
                crate::error::TrellisError::Construction(
                    "JSON schema and Lark grammars require the `llguidance` feature".to_string(),
                ),
            ),
        }
    }
}

/// Outcome of offering a token to a matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceResult {
    /// Token accepted; generation may continue.
    Continue,
    /// Token accepted and the grammar has ended.
    Terminal,
    /// Token not permitted in the current state; state unchanged.
    Rejected,
}

/// Per-session grammar state produced by a grammar-matching engine.
pub trait EngineMatcher: Send {
    /// Overwrite `mask` with the tokens permitted in the current state.
    ///
    /// Calling this twice without an intervening [`accept`](Self::accept)
    /// yields the same mask. `mask` is sized to the vocabulary.
    fn fill_mask(&mut self, mask: &mut TokenMask) -> Result<()>;

    /// Offer a token and advance on success.
    fn accept(&mut self, token: u32) -> Result<AdvanceResult>;
}

/// An immutable compiled grammar.
pub trait CompiledGrammar: Send + Sync + fmt::Debug {
    /// Bind to a vocabulary, creating fresh matcher state.
    ///
    /// Fails when the grammar cannot be expressed over this vocabulary.
    fn bind(&self, tokenizer: &Arc<TokenizerInfo>) -> Result<Box<dyn EngineMatcher>>;
}

/// Grammar that permits any non-empty, non-special token.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconstrained;

impl CompiledGrammar for Unconstrained {
    fn bind(&self, tokenizer: &Arc<TokenizerInfo>) -> Result<Box<dyn EngineMatcher>> {
        Ok(Box::new(UnconstrainedMatcher {
            tokenizer: tokenizer.clone(),
            stopped: false,
        }))
    }
}

struct UnconstrainedMatcher {
    tokenizer: Arc<TokenizerInfo>,
    stopped: bool,
}

impl UnconstrainedMatcher {
    fn permits(&self, token: u32) -> bool {
        !self.stopped
            && !self.tokenizer.is_special_token(token)
            && self
                .tokenizer
                .vocabulary()
                .get(token)
                .is_some_and(|t| !t.is_empty())
    }
}

impl EngineMatcher for UnconstrainedMatcher {
    fn fill_mask(&mut self, mask: &mut TokenMask) -> Result<()> {
        mask.set_all(false);
        for token in 0..self.tokenizer.vocab_size() as u32 {
            if self.permits(token) {
                mask.allow(token);
            }
        }
        Ok(())
    }

    fn accept(&mut self, token: u32) -> Result<AdvanceResult> {
        if !self.permits(token) {
            return Ok(AdvanceResult::Rejected);
        }
        if self.tokenizer.is_stop_token(token) {
            self.stopped = true;
            return Ok(AdvanceResult::Terminal);
        }
        Ok(AdvanceResult::Continue)
    }
}
