//! Logit masking against a grammar matcher.

use crate::error::{Result, TrellisError};
use crate::grammar::{AdvanceResult, GrammarMatcher, TokenMask};
use candle_core::Tensor;
use tracing::trace;

/// Applies the grammar mask to raw logits before sampling.
///
/// One processor per generation session. Call [`reset`](Self::reset) before
/// reusing it for another session.
#[derive(Debug)]
pub struct MaskedLogitProcessor {
    matcher: GrammarMatcher,
    mask: TokenMask,
}

impl MaskedLogitProcessor {
    /// Wrap a matcher.
    pub fn new(matcher: GrammarMatcher) -> Self {
        let mask = TokenMask::block_all(matcher.tokenizer().vocab_size());
        Self { matcher, mask }
    }

    /// Mask `logits` (shape [vocab]) to the tokens the grammar permits.
    ///
    /// Permitted entries are left untouched, every other entry becomes
    /// negative infinity, including logits beyond the grammar's vocabulary.
    pub fn apply(&mut self, logits: &Tensor) -> Result<Tensor> {
        self.matcher.fill_mask(&mut self.mask)?;

        let width = logits.dims1()?;
        if !self.mask.allowed_tokens().any(|t| (t as usize) < width) {
            return Err(TrellisError::NoPermittedTokens);
        }
        trace!(permitted = self.mask.num_allowed(), width, "applying grammar mask");

        let mut values = logits.to_vec1::<f32>()?;
        self.mask.apply_to_logits(&mut values);
        Ok(Tensor::from_vec(values, width, logits.device())?)
    }

    /// Advance the grammar with the sampled token.
    ///
    /// A rejected token means the sampler ignored the mask; the session
    /// cannot continue.
    pub fn on_token_accepted(&mut self, token: u32) -> Result<AdvanceResult> {
        match self.matcher.accept(token)? {
            AdvanceResult::Rejected => Err(TrellisError::ContractViolation { token }),
            result => Ok(result),
        }
    }

    /// Fresh grammar state for a new session.
    pub fn reset(&mut self) -> Result<()> {
        self.mask.set_all(false);
        self.matcher.reset()
    }

    /// Mask used by the latest [`apply`](Self::apply).
    pub fn last_mask(&self) -> &TokenMask {
        &self.mask
    }

    /// The underlying matcher.
    pub fn matcher(&self) -> &GrammarMatcher {
        &self.matcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{DfaGrammar, Grammar};
    use crate::vocab::TokenizerInfo;
    use candle_core::Device;
    use std::sync::Arc;

    fn processor(pattern: &str) -> MaskedLogitProcessor {
        let info = Arc::new(TokenizerInfo::from_tokens(&["a", "b", "</s>"], &[2]));
        let grammar = Arc::new(DfaGrammar::new(pattern).unwrap());
        MaskedLogitProcessor::new(GrammarMatcher::new(info, grammar).unwrap())
    }

    #[test]
    fn masks_disallowed_logits() {
        let mut p = processor("ab");
        let logits = Tensor::new(&[0.5f32, 2.0, 3.0], &Device::Cpu).unwrap();
        let masked = p.apply(&logits).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(masked[0], 0.5);
        assert_eq!(masked[1], f32::NEG_INFINITY);
        assert_eq!(masked[2], f32::NEG_INFINITY);
        assert!(p.last_mask().is_allowed(0));
    }

    #[test]
    fn wider_logits_are_masked() {
        let mut p = processor("ab");
        let logits = Tensor::new(&[1f32, 1.0, 1.0, 9.0], &Device::Cpu).unwrap();
        let masked = p.apply(&logits).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(masked[3], f32::NEG_INFINITY);
    }

    #[test]
    fn rejected_token_is_contract_violation() {
        let mut p = processor("ab");
        let err = p.on_token_accepted(1).unwrap_err();
        assert!(matches!(err, TrellisError::ContractViolation { token: 1 }));
    }

    #[test]
    fn empty_mask_is_an_error() {
        let mut p = processor("ab");
        p.on_token_accepted(0).unwrap();
        p.on_token_accepted(1).unwrap();
        assert_eq!(p.on_token_accepted(2).unwrap(), AdvanceResult::Terminal);
        let logits = Tensor::new(&[0f32, 0.0, 0.0], &Device::Cpu).unwrap();
        assert!(matches!(
            p.apply(&logits),
            Err(TrellisError::NoPermittedTokens)
        ));
    }

    #[test]
    fn reset_restores_initial_mask() {
        let mut p = processor("ab");
        p.on_token_accepted(0).unwrap();
        p.reset().unwrap();
        let logits = Tensor::new(&[0f32, 0.0, 0.0], &Device::Cpu).unwrap();
        p.apply(&logits).unwrap();
        assert_eq!(p.last_mask().allowed_tokens().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn unconstrained_passes_everything() {
        let info = Arc::new(TokenizerInfo::from_tokens(&["a", "b", "</s>"], &[2]));
        let matcher = GrammarMatcher::new(info, Grammar::None.compile().unwrap()).unwrap();
        let mut p = MaskedLogitProcessor::new(matcher);
        let logits = Tensor::new(&[1f32, 2.0, 3.0], &Device::Cpu).unwrap();
        let masked = p.apply(&logits).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(masked, vec![1.0, 2.0, 3.0]);
    }
}
