//! Token sampling from (masked) logits.

use crate::error::{Result, TrellisError};
use candle_core::Tensor;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Sampling parameters for generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Temperature for sampling; zero or below is greedy.
    pub temperature: f32,
    /// Top-p (nucleus) sampling; 1.0 disables it.
    pub top_p: f32,
    /// Top-k sampling; 0 disables it.
    pub top_k: usize,
    /// Seed for reproducible sampling.
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            top_k: 0,
            seed: None,
        }
    }
}

impl SamplingParams {
    /// Greedy sampling (temperature=0).
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            ..Default::default()
        }
    }

    /// Sampling with temperature.
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature,
            ..Default::default()
        }
    }

    /// Set the seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Whether sampling is deterministic argmax.
    pub fn is_greedy(&self) -> bool {
        self.temperature <= 0.0
    }
}

/// Picks the next token from a logit vector.
///
/// Masked-out entries are negative infinity and must never be chosen.
pub trait Sampler: Send {
    /// Choose a token from `logits` (shape [vocab]).
    fn sample(&mut self, logits: &Tensor) -> Result<u32>;
}

/// Temperature, top-k and top-p sampling over a seeded RNG.
#[derive(Debug)]
pub struct LogitsSampler {
    params: SamplingParams,
    rng: StdRng,
}

impl LogitsSampler {
    /// Create a sampler; an absent seed draws one from the OS.
    pub fn new(params: SamplingParams) -> Self {
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { params, rng }
    }

    /// Sampling parameters in use.
    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    fn candidates(&self, scaled: &Tensor) -> Result<Vec<(u32, f32)>> {
        let probs = candle_nn::ops::softmax(scaled, 0)?.to_vec1::<f32>()?;

        let mut indexed: Vec<(u32, f32)> = probs
            .into_iter()
            .enumerate()
            .filter(|(_, p)| *p > 0.0 && p.is_finite())
            .map(|(i, p)| (i as u32, p))
            .collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        if self.params.top_k > 0 {
            indexed.truncate(self.params.top_k);
        }
        if self.params.top_p < 1.0 {
            let mut cumsum = 0.0;
            let mut keep = 0;
            for (_, p) in &indexed {
                keep += 1;
                cumsum += p;
                if cumsum >= self.params.top_p {
                    break;
                }
            }
            indexed.truncate(keep.max(1));
        }
        Ok(indexed)
    }
}

impl Sampler for LogitsSampler {
    fn sample(&mut self, logits: &Tensor) -> Result<u32> {
        if self.params.is_greedy() {
            return argmax(logits);
        }

        // A tiny temperature can overflow the scaled logits; that limit is greedy.
        let scaled = (logits / self.params.temperature as f64)?;
        let overflowed = scaled
            .to_vec1::<f32>()?
            .iter()
            .any(|v| v.is_nan() || *v == f32::INFINITY);
        if overflowed {
            return argmax(logits);
        }

        let candidates = self.candidates(&scaled)?;
        if candidates.is_empty() {
            return Err(TrellisError::Sampling(
                "no finite probability to sample from".to_string(),
            ));
        }
        let dist = WeightedIndex::new(candidates.iter().map(|(_, p)| *p))
            .map_err(|e| TrellisError::Sampling(e.to_string()))?;
        Ok(candidates[dist.sample(&mut self.rng)].0)
    }
}

fn argmax(logits: &Tensor) -> Result<u32> {
    Ok(logits.argmax(0)?.to_scalar::<u32>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn logits(values: &[f32]) -> Tensor {
        Tensor::new(values, &Device::Cpu).unwrap()
    }

    #[test]
    fn greedy_picks_max() {
        let mut s = LogitsSampler::new(SamplingParams::greedy());
        let t = logits(&[0.1, 5.0, f32::NEG_INFINITY, 2.0]);
        assert_eq!(s.sample(&t).unwrap(), 1);
    }

    #[test]
    fn tiny_temperature_falls_back_to_argmax() {
        let mut s = LogitsSampler::new(SamplingParams::with_temperature(1e-39).seed(5));
        let t = logits(&[5.0, 0.0, f32::NEG_INFINITY]);
        assert_eq!(s.sample(&t).unwrap(), 0);
    }

    #[test]
    fn never_samples_masked_tokens() {
        let mut s = LogitsSampler::new(SamplingParams::with_temperature(1.0).seed(7));
        let t = logits(&[f32::NEG_INFINITY, 0.0, f32::NEG_INFINITY, 0.0]);
        for _ in 0..50 {
            let token = s.sample(&t).unwrap();
            assert!(token == 1 || token == 3);
        }
    }

    #[test]
    fn top_k_one_is_argmax() {
        let params = SamplingParams {
            top_k: 1,
            ..SamplingParams::with_temperature(2.0).seed(1)
        };
        let mut s = LogitsSampler::new(params);
        for _ in 0..20 {
            assert_eq!(s.sample(&logits(&[1.0, 3.0, 2.0])).unwrap(), 1);
        }
    }

    #[test]
    fn top_p_keeps_head() {
        let params = SamplingParams {
            top_p: 0.5,
            ..SamplingParams::with_temperature(1.0).seed(3)
        };
        let mut s = LogitsSampler::new(params);
        for _ in 0..20 {
            assert_eq!(s.sample(&logits(&[10.0, 0.0, 0.0])).unwrap(), 0);
        }
    }

    #[test]
    fn seeded_is_reproducible() {
        let t = logits(&[1.0, 1.0, 1.0, 1.0, 1.0]);
        let mut a = LogitsSampler::new(SamplingParams::default().seed(42));
        let mut b = LogitsSampler::new(SamplingParams::default().seed(42));
        let xs: Vec<u32> = (0..10).map(|_| a.sample(&t).unwrap()).collect();
        let ys: Vec<u32> = (0..10).map(|_| b.sample(&t).unwrap()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn params_from_json() {
        let params: SamplingParams = serde_json::from_str(r#"{"temperature": 0.0}"#).unwrap();
        assert!(params.is_greedy());
        assert_eq!(params.top_p, 1.0);
    }
}
