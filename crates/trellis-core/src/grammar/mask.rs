//! Token masking for constrained decoding.

/// A mask over the vocabulary indicating allowed tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMask {
    /// Bit vector of allowed tokens.
    mask: Vec<u64>,
    /// Vocabulary size.
    vocab_size: usize,
    /// Number of allowed tokens.
    num_allowed: usize,
}

impl TokenMask {
    /// Create a mask that allows all tokens.
    pub fn allow_all(vocab_size: usize) -> Self {
        let mut mask = Self::block_all(vocab_size);
        mask.set_all(true);
        mask
    }

    /// Create a mask that blocks all tokens.
    pub fn block_all(vocab_size: usize) -> Self {
        Self {
            mask: vec![0; vocab_size.div_ceil(64)],
            vocab_size,
            num_allowed: 0,
        }
    }

    /// Create a mask from allowed token IDs.
    pub fn from_allowed(vocab_size: usize, allowed: &[u32]) -> Self {
        let mut mask = Self::block_all(vocab_size);
        for &token in allowed {
            mask.allow(token);
        }
        mask
    }

    /// Allow or block every token.
    pub fn set_all(&mut self, allowed: bool) {
        if !allowed {
            self.mask.fill(0);
            self.num_allowed = 0;
            return;
        }
        self.mask.fill(u64::MAX);
        // Clear bits beyond vocab_size
        let remainder = self.vocab_size % 64;
        if remainder > 0 {
            if let Some(last) = self.mask.last_mut() {
                *last = (1u64 << remainder) - 1;
            }
        }
        self.num_allowed = self.vocab_size;
    }

    /// Check if a token is allowed.
    pub fn is_allowed(&self, token: u32) -> bool {
        if token as usize >= self.vocab_size {
            return false;
        }
        let word_idx = token as usize / 64;
        let bit_idx = token as usize % 64;
        (self.mask[word_idx] >> bit_idx) & 1 == 1
    }

    /// Allow a token.
    pub fn allow(&mut self, token: u32) {
        if token as usize >= self.vocab_size || self.is_allowed(token) {
            return;
        }
        self.mask[token as usize / 64] |= 1u64 << (token % 64);
        self.num_allowed += 1;
    }

    /// Block a token.
    pub fn block(&mut self, token: u32) {
        if !self.is_allowed(token) {
            return;
        }
        self.mask[token as usize / 64] &= !(1u64 << (token % 64));
        self.num_allowed -= 1;
    }

    /// Get vocabulary size.
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Get number of allowed tokens.
    pub fn num_allowed(&self) -> usize {
        self.num_allowed
    }

    /// Apply mask to logits (set blocked tokens to -inf).
    ///
    /// Logits past the end of the mask are blocked as well.
    pub fn apply_to_logits(&self, logits: &mut [f32]) {
        for (i, logit) in logits.iter_mut().enumerate() {
            if !self.is_allowed(i as u32) {
                *logit = f32::NEG_INFINITY;
            }
        }
    }

    /// Iterate over allowed tokens.
    pub fn allowed_tokens(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.vocab_size as u32).filter(|&t| self.is_allowed(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        let mask = TokenMask::allow_all(100);
        assert_eq!(mask.num_allowed(), 100);
        assert!(mask.is_allowed(0));
        assert!(mask.is_allowed(99));
        assert!(!mask.is_allowed(100));
    }

    #[test]
    fn test_block_all() {
        let mask = TokenMask::block_all(100);
        assert_eq!(mask.num_allowed(), 0);
        assert!(!mask.is_allowed(0));
    }

    #[test]
    fn test_allow_block() {
        let mut mask = TokenMask::block_all(100);
        mask.allow(42);
        mask.allow(42);
        assert!(mask.is_allowed(42));
        assert_eq!(mask.num_allowed(), 1);

        mask.block(42);
        assert!(!mask.is_allowed(42));
        assert_eq!(mask.num_allowed(), 0);
    }

    #[test]
    fn apply_blocks_out_of_range() {
        let mask = TokenMask::from_allowed(2, &[1]);
        let mut logits = vec![1.0, 2.0, 3.0];
        mask.apply_to_logits(&mut logits);
        assert_eq!(logits[0], f32::NEG_INFINITY);
        assert_eq!(logits[1], 2.0);
        assert_eq!(logits[2], f32::NEG_INFINITY);
        assert_eq!(mask.allowed_tokens().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn set_all_round_trip() {
        let mut mask = TokenMask::block_all(65);
        mask.set_all(true);
        assert_eq!(mask.num_allowed(), 65);
        assert!(mask.is_allowed(64));
        mask.set_all(false);
        assert_eq!(mask, TokenMask::block_all(65));
    }
}
