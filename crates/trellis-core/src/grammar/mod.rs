//! Grammar-constrained decoding.
//!
//! The grammar-matching engine is reached through two traits:
//! [`CompiledGrammar`] (immutable, shared) and [`EngineMatcher`] (per
//! session). Backends:
//! - [`DfaGrammar`]: regular expressions on a dense DFA
//! - [`Unconstrained`]: any non-empty token
//! - `LlgGrammar`: JSON schema, Lark and regex via llguidance
//!   (feature `llguidance`)
//!
//! # Usage
//!
//! ```ignore
//! use trellis_core::grammar::{Grammar, GrammarMatcher};
//!
//! let grammar = Grammar::regex("[a-z]+").compile()?;
//! let mut matcher = GrammarMatcher::new(tokenizer_info, grammar)?;
//! let mask = matcher.mask()?;
//! matcher.accept(token)?;
//! ```

mod constraint;
mod dfa;
#[cfg(feature = "llguidance")]
mod llg;
mod mask;
mod matcher;

pub use constraint::{AdvanceResult, CompiledGrammar, EngineMatcher, Grammar, Unconstrained};
pub use dfa::DfaGrammar;
#[cfg(feature = "llguidance")]
pub use llg::{to_llguidance, LlgGrammar};
pub use mask::TokenMask;
pub use matcher::GrammarMatcher;
