//! Generation parameters and outcomes.

use crate::error::Result;
use crate::sampling::SamplingParams;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Parameters of one generation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateParameters {
    /// Sampler configuration.
    pub sampling: SamplingParams,
    /// Maximum prompt tokens per prefill forward pass.
    pub prefill_step_size: usize,
    /// Maximum number of generated tokens; `None` is unbounded.
    pub max_tokens: Option<usize>,
}

impl Default for GenerateParameters {
    fn default() -> Self {
        Self {
            sampling: SamplingParams::default(),
            prefill_step_size: 512,
            max_tokens: None,
        }
    }
}

impl GenerateParameters {
    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Set the sampler configuration.
    pub fn sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Set the prefill chunk size.
    pub fn prefill_step_size(mut self, size: usize) -> Self {
        self.prefill_step_size = size;
        self
    }

    /// Set the token budget.
    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Answer of the per-step callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    /// Keep generating.
    #[default]
    Continue,
    /// End the session after the current token.
    Stop,
}

/// Why a session finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A stop token was generated.
    StopToken,
    /// The token budget was reached.
    Length,
    /// The per-step callback asked to stop.
    Callback,
    /// The grammar reached a terminal state.
    GrammarComplete,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopReason::StopToken => "stop_token",
            StopReason::Length => "length",
            StopReason::Callback => "callback",
            StopReason::GrammarComplete => "grammar_complete",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let params: GenerateParameters =
            serde_json::from_str(r#"{"max_tokens": 64, "sampling": {"temperature": 0.0}}"#)
                .unwrap();
        assert_eq!(params.max_tokens, Some(64));
        assert_eq!(params.prefill_step_size, 512);
        assert!(params.sampling.is_greedy());
    }

    #[test]
    fn builder_setters() {
        let params = GenerateParameters::default()
            .prefill_step_size(4)
            .max_tokens(0)
            .sampling(SamplingParams::greedy());
        assert_eq!(params.prefill_step_size, 4);
        assert_eq!(params.max_tokens, Some(0));
    }

    #[test]
    fn stop_reason_display() {
        assert_eq!(StopReason::GrammarComplete.to_string(), "grammar_complete");
        assert_eq!(
            serde_json::to_string(&StopReason::StopToken).unwrap(),
            "\"stop_token\""
        );
    }
}
