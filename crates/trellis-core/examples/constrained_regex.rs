//! Example: Regex-Constrained Decoding
//!
//! Drives the decode loop by hand over a tiny vocabulary. The model prefers
//! the stop token at every step; the grammar mask overrides it until the
//! output is a complete date.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=trellis_core=trace cargo run --example constrained_regex
//! ```

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use std::sync::Arc;
use trellis_core::generate::{GenerateParameters, TokenIterator};
use trellis_core::grammar::{Grammar, GrammarMatcher};
use trellis_core::model::{KvCache, LanguageModel};
use trellis_core::sampling::SamplingParams;
use trellis_core::vocab::TokenizerInfo;

/// Model that always puts its weight on one token.
struct StubbornModel {
    vocab_size: usize,
    favourite: usize,
    device: Device,
}

#[async_trait]
impl LanguageModel for StubbornModel {
    fn device(&self) -> &Device {
        &self.device
    }

    fn new_cache(&self) -> KvCache {
        KvCache::new(1, self.device.clone())
    }

    async fn forward(&self, input_ids: &Tensor, cache: &mut KvCache) -> trellis_core::Result<Tensor> {
        let (_, n) = input_ids.dims2()?;
        let kv = Tensor::zeros((1, 1, n, 1), DType::F32, &self.device)?;
        cache.layer_mut(0).append(&kv, &kv)?;

        let mut row = vec![0f32; self.vocab_size];
        row[self.favourite] = 10.0;
        Ok(Tensor::from_vec(row.repeat(n), (1, n, self.vocab_size), &self.device)?)
    }
}

#[tokio::main]
async fn main() -> trellis_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let tokens = [
        "0", "1", "2", "3", "4", "5", "6", "7", "8", "9", "-", "20", "19", "12", "<|end|>",
    ];
    let stop = (tokens.len() - 1) as u32;
    let info = Arc::new(TokenizerInfo::from_tokens(&tokens, &[stop]));
    let model = Arc::new(StubbornModel {
        vocab_size: tokens.len(),
        favourite: stop as usize,
        device: Device::Cpu,
    });

    let grammar = Grammar::regex(r"(19|20)[0-9]{2}-(0[1-9]|1[0-2])-(0[1-9]|[12][0-9]|3[01])");
    let matcher = GrammarMatcher::new(info.clone(), grammar.compile()?)?;
    let params = GenerateParameters::default()
        .sampling(SamplingParams::with_temperature(0.8).seed(2024))
        .max_tokens(32);
    let mut iter = TokenIterator::constrained(vec![0], model, matcher, info, params)?;

    print!("Output: ");
    while let Some(generation) = iter.next().await {
        let generation = generation?;
        print!("{}", generation.chunk);
        if let Some(reason) = generation.finish {
            println!("\nFinished: {}", reason);
        }
    }
    println!("Tokens: {:?}", iter.tokens());

    Ok(())
}
