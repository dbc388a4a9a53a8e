//! Session handle around a grammar-matching engine.

use super::{AdvanceResult, CompiledGrammar, EngineMatcher, TokenMask};
use crate::error::{Result, TrellisError};
use crate::vocab::TokenizerInfo;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Binds a compiled grammar to a vocabulary for one generation.
///
/// Exposes exactly two primitives to the decode loop: the permitted-token
/// mask for the current state, and accepting a token.
pub struct GrammarMatcher {
    tokenizer: Arc<TokenizerInfo>,
    grammar: Arc<dyn CompiledGrammar>,
    engine: Box<dyn EngineMatcher>,
    terminated: bool,
    num_accepted: usize,
}

impl GrammarMatcher {
    /// Bind `grammar` to `tokenizer`.
    pub fn new(tokenizer: Arc<TokenizerInfo>, grammar: Arc<dyn CompiledGrammar>) -> Result<Self> {
        let vocab_size = tokenizer.vocab_size();
        if let Some(&id) = tokenizer
            .stop_tokens()
            .ids()
            .iter()
            .find(|&&id| id as usize >= vocab_size)
        {
            return Err(TrellisError::Construction(format!(
                "stop token {} outside vocabulary of size {}",
                id, vocab_size
            )));
        }
        let engine = grammar.bind(&tokenizer)?;
        Ok(Self {
            tokenizer,
            grammar,
            engine,
            terminated: false,
            num_accepted: 0,
        })
    }

    /// Permitted tokens for the current state.
    pub fn mask(&mut self) -> Result<TokenMask> {
        let mut mask = TokenMask::block_all(self.tokenizer.vocab_size());
        self.fill_mask(&mut mask)?;
        Ok(mask)
    }

    /// Write the permitted tokens into an existing mask, resizing it if needed.
    pub fn fill_mask(&mut self, mask: &mut TokenMask) -> Result<()> {
        if mask.vocab_size() != self.tokenizer.vocab_size() {
            *mask = TokenMask::block_all(self.tokenizer.vocab_size());
        }
        if self.terminated {
            mask.set_all(false);
            return Ok(());
        }
        self.engine.fill_mask(mask)
    }

    /// Offer a token; advances the state unless it is rejected.
    pub fn accept(&mut self, token: u32) -> Result<AdvanceResult> {
        if self.terminated || token as usize >= self.tokenizer.vocab_size() {
            return Ok(AdvanceResult::Rejected);
        }
        let result = self.engine.accept(token)?;
        match result {
            AdvanceResult::Rejected => {}
            AdvanceResult::Terminal => {
                self.terminated = true;
                self.num_accepted += 1;
            }
            AdvanceResult::Continue => self.num_accepted += 1,
        }
        trace!(token, ?result, "matcher advanced");
        Ok(result)
    }

    /// Start over from the grammar's initial state.
    pub fn reset(&mut self) -> Result<()> {
        self.engine = self.grammar.bind(&self.tokenizer)?;
        self.terminated = false;
        self.num_accepted = 0;
        Ok(())
    }

    /// Whether the grammar has ended.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Tokens accepted since the last reset.
    pub fn num_accepted(&self) -> usize {
        self.num_accepted
    }

    /// The vocabulary this matcher is bound to.
    pub fn tokenizer(&self) -> &Arc<TokenizerInfo> {
        &self.tokenizer
    }
}

impl fmt::Debug for GrammarMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrammarMatcher")
            .field("grammar", &self.grammar)
            .field("vocab_size", &self.tokenizer.vocab_size())
            .field("terminated", &self.terminated)
            .field("num_accepted", &self.num_accepted)
            .finish()
    }
}
