//! JSON output example.
//!
//! Loads the tokenizer metadata of a local model directory and generates a
//! JSON object with a model that has no opinion at all: every logit is zero,
//! so the grammar alone shapes the output.
//!
//! ```bash
//! cargo run --example json_output -- path/to/model_dir
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use trellis::prelude::*;

/// Model emitting uniform logits over `vocab_size` tokens.
struct UniformModel {
    vocab_size: usize,
    device: Device,
}

#[async_trait]
impl LanguageModel for UniformModel {
    fn device(&self) -> &Device {
        &self.device
    }

    fn new_cache(&self) -> KvCache {
        KvCache::new(0, self.device.clone())
    }

    async fn forward(&self, input_ids: &Tensor, _cache: &mut KvCache) -> trellis::Result<Tensor> {
        let (_, n) = input_ids.dims2()?;
        Ok(Tensor::zeros((1, n, self.vocab_size), DType::F32, &self.device)?)
    }
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Person {
    name: String,
    age: u32,
}

const PERSON: &str = r#"\{"name":"[A-Z][a-z]{1,10}","age":[1-9][0-9]?\}"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let model_dir = std::env::args()
        .nth(1)
        .context("usage: json_output <model_dir>")?;

    // Probe the vocabulary size first; logits must cover it.
    let files = ModelFiles::from_dir(&model_dir)?;
    let info = VocabularyReconciler::new().reconcile_files(&files);
    let model = Arc::new(UniformModel {
        vocab_size: info.vocab_size(),
        device: Device::Cpu,
    });

    let engine = Engine::builder()
        .model_dir(&model_dir)
        .model(model)
        .build()?;

    println!("Engine initialized: {:?}", engine);

    let result = engine
        .generate("Generate a person's profile as JSON:")
        .regex(PERSON)
        .max_tokens(64)
        .seed(7)
        .execute()
        .await?;
    println!("Result ({}): {}", result.stop_reason, result.text);

    let person: Person = result.parse()?;
    println!("Parsed: {:?}", person);

    // Same request, watched while it is written.
    let mut partials = engine
        .generate("Generate a person's profile as JSON:")
        .regex(PERSON)
        .max_tokens(64)
        .seed(8)
        .stream_partial::<serde_json::Value>()?;
    while let Some(partial) = partials.next().await {
        println!("Partial: {}", partial?);
    }

    Ok(())
}
