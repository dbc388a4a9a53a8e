//! High-level constrained generation engine.

use anyhow::{anyhow, bail, Context, Result};
use futures::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use trellis_core::generate::{
    self, Disposition, GenerateParameters, GenerationStream, TokenIterator,
};
use trellis_core::grammar::{CompiledGrammar, Grammar, GrammarMatcher};
use trellis_core::model::{KvCache, LanguageModel, ModelFiles, TokenDecoder, Tokenizer};
use trellis_core::projection::{self, GenerateResult};
use trellis_core::vocab::{TokenizerInfo, VocabularyReconciler};

/// Configuration for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Model directory holding `tokenizer.json` and optional configs.
    pub model_dir: Option<PathBuf>,
    /// Default parameters for every request.
    pub parameters: GenerateParameters,
    /// Extra token strings that end generation.
    pub extra_eos_tokens: Vec<String>,
    /// Whether prompts get the tokenizer's special tokens (BOS etc.).
    pub add_special_tokens: bool,
    /// Channel capacity for streamed generations.
    pub stream_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            parameters: GenerateParameters::default(),
            extra_eos_tokens: Vec::new(),
            add_special_tokens: true,
            stream_buffer: generate::DEFAULT_STREAM_BUFFER,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing engine config {}", path.display()))
    }
}

/// Builder for creating an Engine.
pub struct EngineBuilder {
    config: EngineConfig,
    model: Option<Arc<dyn LanguageModel>>,
    tokenizer_info: Option<Arc<TokenizerInfo>>,
}

impl EngineBuilder {
    /// Create a new engine builder.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            model: None,
            tokenizer_info: None,
        }
    }

    /// Start from a full configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Load tokenizer metadata from a model directory.
    pub fn model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.model_dir = Some(dir.into());
        self
    }

    /// Set the language model.
    pub fn model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Use an already reconciled vocabulary instead of a model directory.
    ///
    /// The engine then only accepts token prompts.
    pub fn tokenizer_info(mut self, info: Arc<TokenizerInfo>) -> Self {
        self.tokenizer_info = Some(info);
        self
    }

    /// Treat `token` as an additional end-of-sequence token.
    pub fn extra_eos_token(mut self, token: impl Into<String>) -> Self {
        self.config.extra_eos_tokens.push(token.into());
        self
    }

    /// Set default generation parameters.
    pub fn parameters(mut self, parameters: GenerateParameters) -> Self {
        self.config.parameters = parameters;
        self
    }

    /// Build the engine.
    pub fn build(self) -> Result<Engine> {
        let model = self
            .model
            .ok_or_else(|| anyhow!("a language model is required"))?;

        let (info, tokenizer) = match (self.tokenizer_info, &self.config.model_dir) {
            (Some(info), _) => (info, None),
            (None, Some(dir)) => {
                let files = ModelFiles::from_dir(dir)
                    .with_context(|| format!("loading model metadata from {}", dir.display()))?;
                let info = VocabularyReconciler::new()
                    .extra_eos_tokens(self.config.extra_eos_tokens.iter().cloned())
                    .reconcile_files(&files);
                let tokenizer = Tokenizer::from_dir(dir)?;
                (Arc::new(info), Some(Arc::new(tokenizer)))
            }
            (None, None) => bail!("either a model directory or a tokenizer info is required"),
        };

        info!(
            vocab_size = info.vocab_size(),
            encoding = %info.encoding(),
            stop_tokens = ?info.stop_tokens().ids(),
            "engine ready"
        );

        Ok(Engine {
            config: self.config,
            model,
            info,
            tokenizer,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Constrained generation over one model and vocabulary.
pub struct Engine {
    config: EngineConfig,
    model: Arc<dyn LanguageModel>,
    info: Arc<TokenizerInfo>,
    tokenizer: Option<Arc<Tokenizer>>,
}

impl Engine {
    /// Create a new engine builder.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Get engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reconciled vocabulary shared by every session.
    pub fn tokenizer_info(&self) -> &Arc<TokenizerInfo> {
        &self.info
    }

    /// Generate from a text prompt.
    pub fn generate(&self, prompt: &str) -> GenerateRequest<'_> {
        self.request(Prompt::Text(prompt.to_string()))
    }

    /// Generate from an already tokenized prompt.
    pub fn generate_tokens(&self, tokens: Vec<u32>) -> GenerateRequest<'_> {
        self.request(Prompt::Tokens(tokens))
    }

    fn request(&self, prompt: Prompt) -> GenerateRequest<'_> {
        GenerateRequest {
            engine: self,
            prompt,
            grammar: Grammar::None,
            compiled: None,
            parameters: self.config.parameters.clone(),
            cache: None,
        }
    }

    /// Generate JSON matching `schema` and deserialize it into `T`.
    pub async fn generate_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        schema: &str,
        indent: Option<usize>,
    ) -> Result<T> {
        self.generate(prompt)
            .grammar(json_grammar(schema, indent))
            .json()
            .await
    }

    /// Stream partially generated values of `T` as JSON matching `schema`.
    pub fn stream_partial<T: DeserializeOwned>(
        &self,
        prompt: &str,
        schema: &str,
        indent: Option<usize>,
    ) -> Result<impl Stream<Item = trellis_core::Result<T>>> {
        self.generate(prompt)
            .grammar(json_grammar(schema, indent))
            .stream_partial()
    }

    fn encode(&self, prompt: &Prompt) -> Result<Vec<u32>> {
        match prompt {
            Prompt::Tokens(tokens) => Ok(tokens.clone()),
            Prompt::Text(text) => {
                let tokenizer = self
                    .tokenizer
                    .as_ref()
                    .ok_or_else(|| anyhow!("text prompts need a tokenizer; load a model_dir"))?;
                Ok(tokenizer.encode(text, self.config.add_special_tokens)?)
            }
        }
    }

    fn decoder(&self) -> Arc<dyn TokenDecoder> {
        match &self.tokenizer {
            Some(tokenizer) => tokenizer.clone(),
            None => self.info.clone(),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("vocab_size", &self.info.vocab_size())
            .finish()
    }
}

fn json_grammar(schema: &str, indent: Option<usize>) -> Grammar {
    match indent {
        Some(indent) => Grammar::json_schema_indented(schema, indent),
        None => Grammar::json_schema(schema),
    }
}

#[derive(Debug, Clone)]
enum Prompt {
    Text(String),
    Tokens(Vec<u32>),
}

/// A generation request.
pub struct GenerateRequest<'a> {
    engine: &'a Engine,
    prompt: Prompt,
    grammar: Grammar,
    compiled: Option<Arc<dyn CompiledGrammar>>,
    parameters: GenerateParameters,
    cache: Option<KvCache>,
}

impl<'a> GenerateRequest<'a> {
    /// Constrain the output.
    pub fn grammar(mut self, grammar: Grammar) -> Self {
        self.grammar = grammar;
        self.compiled = None;
        self
    }

    /// Constrain the output with a pre-compiled grammar.
    pub fn compiled_grammar(mut self, grammar: Arc<dyn CompiledGrammar>) -> Self {
        self.compiled = Some(grammar);
        self
    }

    /// Constrain the output to a regular expression.
    pub fn regex(self, pattern: &str) -> Self {
        self.grammar(Grammar::regex(pattern))
    }

    /// Replace all generation parameters.
    pub fn parameters(mut self, parameters: GenerateParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set maximum tokens to generate.
    pub fn max_tokens(mut self, n: usize) -> Self {
        self.parameters.max_tokens = Some(n);
        self
    }

    /// Set temperature.
    pub fn temperature(mut self, t: f32) -> Self {
        self.parameters.sampling.temperature = t;
        self
    }

    /// Set the sampling seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.parameters.sampling.seed = Some(seed);
        self
    }

    /// Continue from an earlier session's cache.
    pub fn with_cache(mut self, cache: KvCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set up the session without running it.
    pub fn iterator(self) -> Result<TokenIterator> {
        let engine = self.engine;
        let input = engine.encode(&self.prompt)?;
        let compiled = match self.compiled {
            Some(compiled) => compiled,
            None => self.grammar.compile()?,
        };
        let matcher = GrammarMatcher::new(engine.info.clone(), compiled)?;
        let iterator = TokenIterator::constrained(
            input,
            engine.model.clone(),
            matcher,
            engine.decoder(),
            self.parameters,
        )?;
        Ok(match self.cache {
            Some(cache) => iterator.with_cache(cache),
            None => iterator,
        })
    }

    /// Run to completion.
    pub async fn execute(self) -> Result<GenerateResult> {
        self.execute_with(|_| Disposition::Continue).await
    }

    /// Run to completion, consulting `callback` after every token.
    pub async fn execute_with<F>(self, callback: F) -> Result<GenerateResult>
    where
        F: FnMut(&[u32]) -> Disposition + Send,
    {
        let mut iterator = self.iterator()?;
        let result = projection::collect(&mut iterator, callback).await?;
        info!(
            tokens = result.num_generated_tokens,
            stop_reason = %result.stop_reason,
            "generation complete"
        );
        Ok(result)
    }

    /// Run to completion and deserialize the output as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let result = self.execute().await?;
        result
            .parse()
            .with_context(|| format!("output is not the requested shape: {}", result.text))
    }

    /// Run on a background task, streaming generations.
    pub fn stream(self) -> Result<GenerationStream> {
        let buffer = self.engine.config.stream_buffer;
        Ok(generate::spawn(self.iterator()?, buffer))
    }

    /// Run on a background task, streaming partial values of `T`.
    pub fn stream_partial<T: DeserializeOwned>(
        self,
    ) -> Result<impl Stream<Item = trellis_core::Result<T>>> {
        Ok(projection::project_partial(self.stream()?))
    }
}
