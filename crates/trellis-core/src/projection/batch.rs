//! Whole-result collection and typed parsing.

use crate::error::{Result, TrellisError};
use crate::generate::{Disposition, StopReason, TokenIterator};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Outcome of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResult {
    /// Decoded output.
    pub text: String,
    /// Generated token ids.
    pub tokens: Vec<u32>,
    /// Prompt length in tokens.
    pub num_prompt_tokens: usize,
    /// Generated length in tokens.
    pub num_generated_tokens: usize,
    /// Why generation ended.
    pub stop_reason: StopReason,
}

impl GenerateResult {
    /// Deserialize the text as JSON.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        parse(self)
    }
}

/// Drive `iterator` to the end.
///
/// `callback` sees the cumulative tokens after every accepted token; a
/// [`Disposition::Stop`] ends the session unless a stop token or the token
/// budget already did.
pub async fn collect<F>(iterator: &mut TokenIterator, mut callback: F) -> Result<GenerateResult>
where
    F: FnMut(&[u32]) -> Disposition + Send,
{
    while let Some(generation) = iterator.next_with(&mut callback).await {
        generation?;
    }
    let stop_reason = iterator.stop_reason().ok_or_else(|| {
        TrellisError::Model("generation ended without a stop reason".to_string())
    })?;
    let tokens = iterator.tokens().to_vec();
    Ok(GenerateResult {
        text: iterator.text()?,
        num_prompt_tokens: iterator.input().len(),
        num_generated_tokens: tokens.len(),
        tokens,
        stop_reason,
    })
}

/// Deserialize a result's text into `T`.
///
/// A mismatch is a [`TrellisError::Parse`], distinct from generation errors.
pub fn parse<T: DeserializeOwned>(result: &GenerateResult) -> Result<T> {
    serde_json::from_str(&result.text).map_err(TrellisError::Parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Person {
        name: String,
    }

    fn result(text: &str) -> GenerateResult {
        GenerateResult {
            text: text.to_string(),
            tokens: vec![],
            num_prompt_tokens: 1,
            num_generated_tokens: 0,
            stop_reason: StopReason::GrammarComplete,
        }
    }

    #[test]
    fn parse_typed() {
        let person: Person = result(r#"{"name": "A"}"#).parse().unwrap();
        assert_eq!(person.name, "A");
    }

    #[test]
    fn parse_failure_is_distinct() {
        let err = parse::<Person>(&result(r#"{"nam"#)).unwrap_err();
        assert!(err.is_parse_error());
        assert!(!err.is_generation_error());
    }
}
