//! Forward-pass interface of the language model.

use super::KvCache;
use crate::error::{Result, TrellisError};
use async_trait::async_trait;
use candle_core::{DType, Device, IndexOp, Tensor};

/// An autoregressive model driven by the decode loop.
///
/// The numerical computation is up to the implementation; the loop only
/// relies on the shapes described here.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Device for input tensors.
    fn device(&self) -> &Device;

    /// Fresh, empty cache for a new session.
    fn new_cache(&self) -> KvCache;

    /// Run `input_ids` ([1, seq_len]) through the model.
    ///
    /// Appends the processed positions to `cache` and returns logits of shape
    /// [1, seq_len, vocab]. Rank-2 ([seq_len, vocab]) and rank-1 ([vocab])
    /// outputs are accepted as well.
    async fn forward(&self, input_ids: &Tensor, cache: &mut KvCache) -> Result<Tensor>;
}

/// Logits of the last position as an F32 vector tensor.
pub fn last_position_logits(logits: &Tensor) -> Result<Tensor> {
    let row = match logits.rank() {
        1 => logits.clone(),
        2 => {
            let (seq_len, _) = logits.dims2()?;
            logits.i(seq_len.saturating_sub(1))?
        }
        3 => {
            let (_, seq_len, _) = logits.dims3()?;
            logits.i((0, seq_len.saturating_sub(1)))?
        }
        rank => {
            return Err(TrellisError::Model(format!(
                "expected logits of rank 1-3, got rank {}",
                rank
            )))
        }
    };
    Ok(row.to_dtype(DType::F32)?)
}

/// Build a [1, n] input tensor from token ids.
pub fn input_tensor(tokens: &[u32], device: &Device) -> Result<Tensor> {
    Ok(Tensor::new(tokens, device)?.unsqueeze(0)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_position_of_rank3() {
        let logits = Tensor::new(&[[[0f32, 1.0], [2.0, 3.0]]], &Device::Cpu).unwrap();
        let row = last_position_logits(&logits).unwrap();
        assert_eq!(row.to_vec1::<f32>().unwrap(), vec![2.0, 3.0]);
    }

    #[test]
    fn last_position_of_rank1() {
        let logits = Tensor::new(&[0.5f64, 1.5], &Device::Cpu).unwrap();
        let row = last_position_logits(&logits).unwrap();
        assert_eq!(row.to_vec1::<f32>().unwrap(), vec![0.5, 1.5]);
    }

    #[test]
    fn input_shape() {
        let t = input_tensor(&[1, 2, 3], &Device::Cpu).unwrap();
        assert_eq!(t.dims(), &[1, 3]);
    }
}
