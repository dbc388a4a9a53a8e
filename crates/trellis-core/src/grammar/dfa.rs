//! Regular-expression grammars on a dense DFA.
//!
//! The pattern must match the whole output. A token is permitted when
//! feeding its bytes from the current DFA state leaves the automaton alive;
//! a stop token is permitted once the bytes seen so far form a full match.

use super::{AdvanceResult, CompiledGrammar, EngineMatcher, TokenMask};
use crate::error::{Result, TrellisError};
use crate::vocab::TokenizerInfo;
use regex_automata::dfa::{dense, Automaton};
use regex_automata::util::primitives::StateID;
use regex_automata::util::start;
use regex_automata::{Anchored, MatchKind};
use std::sync::Arc;

/// A regex compiled to an anchored dense DFA.
#[derive(Debug, Clone)]
pub struct DfaGrammar {
    pattern: String,
    dfa: Arc<dense::DFA<Vec<u32>>>,
    start: StateID,
}

impl DfaGrammar {
    /// Compile `pattern`. The output must match it in full.
    pub fn new(pattern: &str) -> Result<Self> {
        let dfa = dense::Builder::new()
            .configure(dense::DFA::config().match_kind(MatchKind::All))
            .build(&format!("(?:{})$", pattern))
            .map_err(|e| TrellisError::Construction(format!("invalid regex grammar: {}", e)))?;
        let start = dfa
            .start_state(&start::Config::new().anchored(Anchored::Yes))
            .map_err(|e| TrellisError::Construction(format!("no anchored start state: {}", e)))?;
        Ok(Self {
            pattern: pattern.to_string(),
            dfa: Arc::new(dfa),
            start,
        })
    }

    /// Source pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl CompiledGrammar for DfaGrammar {
    fn bind(&self, tokenizer: &Arc<TokenizerInfo>) -> Result<Box<dyn EngineMatcher>> {
        // Fails early if the vocabulary does not decode under its encoding.
        tokenizer.token_bytes()?;
        Ok(Box::new(DfaMatcher {
            dfa: self.dfa.clone(),
            tokenizer: tokenizer.clone(),
            state: self.start,
            stopped: false,
        }))
    }
}

struct DfaMatcher {
    dfa: Arc<dense::DFA<Vec<u32>>>,
    tokenizer: Arc<TokenizerInfo>,
    state: StateID,
    stopped: bool,
}

impl DfaMatcher {
    /// State after feeding `bytes`, or `None` if the DFA dies.
    fn advance(&self, bytes: &[u8]) -> Option<StateID> {
        let mut state = self.state;
        for &b in bytes {
            state = self.dfa.next_state(state, b);
            if self.dfa.is_dead_state(state) || self.dfa.is_quit_state(state) {
                return None;
            }
        }
        Some(state)
    }

    fn is_accepting(&self, state: StateID) -> bool {
        self.dfa.is_match_state(self.dfa.next_eoi_state(state))
    }

    /// Whether some non-stop token can extend the current state.
    fn can_continue(&self, table: &[Vec<u8>]) -> bool {
        table.iter().enumerate().any(|(id, bytes)| {
            !bytes.is_empty()
                && !self.tokenizer.is_stop_token(id as u32)
                && self.advance(bytes).is_some()
        })
    }
}

impl EngineMatcher for DfaMatcher {
    fn fill_mask(&mut self, mask: &mut TokenMask) -> Result<()> {
        mask.set_all(false);
        if self.stopped {
            return Ok(());
        }
        let table = self.tokenizer.token_bytes()?;
        let accepting = self.is_accepting(self.state);
        for (id, bytes) in table.iter().enumerate() {
            let id = id as u32;
            let permitted = if self.tokenizer.is_stop_token(id) {
                accepting
            } else {
                !bytes.is_empty() && self.advance(bytes).is_some()
            };
            if permitted {
                mask.allow(id);
            }
        }
        Ok(())
    }

    fn accept(&mut self, token: u32) -> Result<AdvanceResult> {
        let table = self.tokenizer.token_bytes()?;
        let Some(bytes) = table.get(token as usize) else {
            return Ok(AdvanceResult::Rejected);
        };
        if self.stopped {
            return Ok(AdvanceResult::Rejected);
        }

        if self.tokenizer.is_stop_token(token) {
            if !self.is_accepting(self.state) {
                return Ok(AdvanceResult::Rejected);
            }
            self.stopped = true;
            return Ok(AdvanceResult::Terminal);
        }

        if bytes.is_empty() {
            return Ok(AdvanceResult::Rejected);
        }
        let Some(next) = self.advance(bytes) else {
            return Ok(AdvanceResult::Rejected);
        };
        self.state = next;

        // Without a stop token the match can only end by running out of
        // continuations.
        if self.tokenizer.stop_tokens().is_empty()
            && self.is_accepting(next)
            && !self.can_continue(table)
        {
            self.stopped = true;
            return Ok(AdvanceResult::Terminal);
        }
        Ok(AdvanceResult::Continue)
    }
}
