//! llguidance-backed grammars (JSON schema, Lark, regex).

use super::{AdvanceResult, CompiledGrammar, EngineMatcher, Grammar, TokenMask};
use crate::error::{Result, TrellisError};
use crate::vocab::TokenizerInfo;
use llguidance::api::TopLevelGrammar;
use llguidance::toktrie::{ApproximateTokEnv, TokEnv, TokRxInfo, TokTrie};
use llguidance::{Matcher, ParserFactory};
use serde_json::Value;
use std::sync::Arc;

/// Byte prefix llguidance uses to mark special tokens in the trie.
const SPECIAL_TOKEN_PREFIX: u8 = 0xFF;

/// Convert a Grammar to llguidance TopLevelGrammar.
pub fn to_llguidance(grammar: &Grammar) -> Option<TopLevelGrammar> {
    match grammar {
        Grammar::None => None,
        Grammar::JsonSchema { schema, indent } => {
            let value: Value = serde_json::from_str(schema).ok()?;
            Some(TopLevelGrammar::from_json_schema(with_formatting(value, *indent)))
        }
        Grammar::Regex(pattern) => Some(TopLevelGrammar::from_regex(pattern)),
        Grammar::Lark(grammar) => Some(TopLevelGrammar::from_lark(grammar.clone())),
    }
}

/// Compact separators without an indent hint; flexible whitespace with one.
fn with_formatting(mut schema: Value, indent: Option<usize>) -> Value {
    if let Value::Object(map) = &mut schema {
        let options = match indent {
            None => serde_json::json!({
                "whitespace_flexible": false,
                "item_separator": ",",
                "key_separator": ":",
            }),
            Some(_) => serde_json::json!({ "whitespace_flexible": true }),
        };
        map.entry("x-guidance").or_insert(options);
    }
    schema
}

/// A grammar compiled by llguidance on binding.
#[derive(Debug, Clone)]
pub struct LlgGrammar {
    grammar: TopLevelGrammar,
}

impl LlgGrammar {
    /// Wrap an llguidance grammar.
    pub fn new(grammar: TopLevelGrammar) -> Self {
        Self { grammar }
    }

    /// JSON schema grammar with an optional indentation hint.
    pub fn json_schema(schema: &str, indent: Option<usize>) -> Result<Self> {
        let value: Value = serde_json::from_str(schema)
            .map_err(|e| TrellisError::Construction(format!("invalid JSON schema: {}", e)))?;
        Ok(Self::new(TopLevelGrammar::from_json_schema(with_formatting(
            value, indent,
        ))))
    }

    /// Lark grammar.
    pub fn lark(source: &str) -> Self {
        Self::new(TopLevelGrammar::from_lark(source.to_string()))
    }

    fn token_env(tokenizer: &TokenizerInfo) -> Result<TokEnv> {
        let eos = *tokenizer.stop_tokens().ids().first().ok_or_else(|| {
            TrellisError::Construction("llguidance grammars need a stop token".to_string())
        })?;
        let mut words: Vec<Vec<u8>> = tokenizer.token_bytes()?.to_vec();
        for &id in tokenizer.stop_tokens().ids() {
            let word = &mut words[id as usize];
            word.insert(0, SPECIAL_TOKEN_PREFIX);
        }
        for &id in tokenizer.special_tokens() {
            if let (Some(word), Some(surface)) =
                (words.get_mut(id as usize), tokenizer.vocabulary().get(id))
            {
                *word = std::iter::once(SPECIAL_TOKEN_PREFIX)
                    .chain(surface.bytes())
                    .collect();
            }
        }
        let info = TokRxInfo::new(words.len() as u32, eos);
        let trie = TokTrie::from(&info, &words);
        Ok(Arc::new(ApproximateTokEnv::new(trie)))
    }
}

impl CompiledGrammar for LlgGrammar {
    fn bind(&self, tokenizer: &Arc<TokenizerInfo>) -> Result<Box<dyn EngineMatcher>> {
        let env = Self::token_env(tokenizer)?;
        let factory = ParserFactory::new_simple(&env)
            .map_err(|e| TrellisError::Construction(format!("llguidance factory: {}", e)))?;
        let parser = factory.create_parser(self.grammar.clone());
        let matcher = Matcher::new(parser);
        if let Some(e) = matcher.get_error() {
            return Err(TrellisError::Construction(format!("llguidance grammar: {}", e)));
        }
        Ok(Box::new(LlgMatcher {
            matcher,
            tokenizer: tokenizer.clone(),
        }))
    }
}

struct LlgMatcher {
    matcher: Matcher,
    tokenizer: Arc<TokenizerInfo>,
}

impl LlgMatcher {
    fn eos(&self) -> u32 {
        self.tokenizer.stop_tokens().ids()[0]
    }
}

impl EngineMatcher for LlgMatcher {
    fn fill_mask(&mut self, mask: &mut TokenMask) -> Result<()> {
        mask.set_all(false);
        if self.matcher.is_stopped() {
            return Ok(());
        }
        let vob = self
            .matcher
            .compute_mask()
            .map_err(|e| TrellisError::Model(format!("llguidance mask: {}", e)))?;
        let eos_allowed = vob.is_allowed(self.eos());
        for id in 0..self.tokenizer.vocab_size() as u32 {
            let permitted = if self.tokenizer.is_stop_token(id) {
                eos_allowed
            } else {
                !self.tokenizer.is_special_token(id) && vob.is_allowed(id)
            };
            if permitted {
                mask.allow(id);
            }
        }
        Ok(())
    }

    fn accept(&mut self, token: u32) -> Result<AdvanceResult> {
        if self.matcher.is_stopped() || self.tokenizer.is_special_token(token) {
            return Ok(AdvanceResult::Rejected);
        }
        // Every stop token is presented to llguidance as its EOS.
        let token = if self.tokenizer.is_stop_token(token) {
            self.eos()
        } else {
            token
        };
        let valid = self
            .matcher
            .validate_tokens(&[token])
            .map_err(|e| TrellisError::Model(format!("llguidance validate: {}", e)))?;
        if valid == 0 {
            return Ok(AdvanceResult::Rejected);
        }
        self.matcher
            .consume_token(token)
            .map_err(|e| TrellisError::Model(format!("llguidance consume: {}", e)))?;
        if self.matcher.is_stopped() {
            Ok(AdvanceResult::Terminal)
        } else {
            Ok(AdvanceResult::Continue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TokenDecoder;

    #[test]
    fn to_llguidance_variants() {
        assert!(to_llguidance(&Grammar::json_schema(r#"{"type": "string"}"#)).is_some());
        assert!(to_llguidance(&Grammar::regex("[a-z]+")).is_some());
        assert!(to_llguidance(&Grammar::lark(r#"start: "hello""#)).is_some());
        assert!(to_llguidance(&Grammar::None).is_none());
    }

    #[test]
    fn formatting_hint() {
        let compact = with_formatting(serde_json::json!({"type": "object"}), None);
        assert_eq!(compact["x-guidance"]["key_separator"], ":");
        let indented = with_formatting(serde_json::json!({"type": "object"}), Some(2));
        assert_eq!(indented["x-guidance"]["whitespace_flexible"], true);
    }

    fn name_vocabulary() -> Arc<TokenizerInfo> {
        Arc::new(TokenizerInfo::from_tokens(
            &["{", "\"name\"", ":", "\"", "A", "}", "</s>"],
            &[6],
        ))
    }

    fn name_matcher() -> Box<dyn EngineMatcher> {
        let schema = r#"{
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"],
            "additionalProperties": false
        }"#;
        LlgGrammar::json_schema(schema, None)
            .unwrap()
            .bind(&name_vocabulary())
            .unwrap()
    }

    #[test]
    fn json_schema_runs_to_terminal() {
        let info = name_vocabulary();
        let mut matcher = name_matcher();
        let mut mask = TokenMask::block_all(info.vocab_size());

        matcher.fill_mask(&mut mask).unwrap();
        assert_eq!(mask.allowed_tokens().collect::<Vec<_>>(), vec![0]);

        let mut accepted = Vec::new();
        let mut result = AdvanceResult::Continue;
        for _ in 0..16 {
            matcher.fill_mask(&mut mask).unwrap();
            let token = mask.allowed_tokens().next().expect("grammar left no token");
            result = matcher.accept(token).unwrap();
            accepted.push(token);
            if result == AdvanceResult::Terminal {
                break;
            }
        }
        assert_eq!(result, AdvanceResult::Terminal);
        assert_eq!(accepted.last(), Some(&6));

        let text = info.decode(&accepted).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert!(value["name"].is_string());
    }

    #[test]
    fn rejected_token_leaves_state() {
        let mut matcher = name_matcher();
        assert_eq!(matcher.accept(5).unwrap(), AdvanceResult::Rejected);
        assert_eq!(matcher.accept(6).unwrap(), AdvanceResult::Rejected);
        assert_eq!(matcher.accept(0).unwrap(), AdvanceResult::Continue);
        assert_eq!(matcher.accept(1).unwrap(), AdvanceResult::Continue);
    }

    #[test]
    fn needs_stop_token() {
        let info = Arc::new(TokenizerInfo::from_tokens(&["a"], &[]));
        let err = LlgGrammar::lark(r#"start: "a""#).bind(&info).unwrap_err();
        assert!(matches!(err, TrellisError::Construction(_)));
    }
}
