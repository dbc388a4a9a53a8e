//! The token iteration loop.

use super::{Disposition, GenerateParameters, StopReason, StreamingDetokenizer};
use crate::error::{Result, TrellisError};
use crate::grammar::{AdvanceResult, GrammarMatcher};
use crate::model::{input_tensor, last_position_logits, KvCache, LanguageModel, TokenDecoder};
use crate::processor::MaskedLogitProcessor;
use crate::sampling::{LogitsSampler, Sampler};
use futures::Stream;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// One generated token.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Token id.
    pub token: u32,
    /// Text completed by this token; empty while a character is incomplete.
    pub chunk: String,
    /// Set on the last token of the session.
    pub finish: Option<StopReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Prefill,
    Decode,
    Finished(StopReason),
    Aborted,
}

/// Lazily drives prefill and decode, one token per [`next`](Self::next).
///
/// Owns the session: KV cache, grammar state and output buffer. Dropping the
/// iterator abandons the session.
pub struct TokenIterator {
    model: Arc<dyn LanguageModel>,
    processor: MaskedLogitProcessor,
    sampler: Box<dyn Sampler>,
    detokenizer: StreamingDetokenizer,
    params: GenerateParameters,
    cache: KvCache,
    input: Vec<u32>,
    tokens: Vec<u32>,
    next_input: u32,
    state: State,
}

impl TokenIterator {
    /// Start a session over `input`.
    ///
    /// The processor must be fresh (or reset).
    pub fn new(
        input: Vec<u32>,
        model: Arc<dyn LanguageModel>,
        processor: MaskedLogitProcessor,
        sampler: Box<dyn Sampler>,
        decoder: Arc<dyn TokenDecoder>,
        params: GenerateParameters,
    ) -> Result<Self> {
        let Some(&last) = input.last() else {
            return Err(TrellisError::InvalidInput(
                "generation needs at least one input token".to_string(),
            ));
        };
        let cache = model.new_cache();
        debug!(
            prompt_tokens = input.len(),
            max_tokens = ?params.max_tokens,
            "starting generation session"
        );
        Ok(Self {
            model,
            processor,
            sampler,
            detokenizer: StreamingDetokenizer::new(decoder),
            params,
            cache,
            input,
            tokens: Vec::new(),
            next_input: last,
            state: State::Prefill,
        })
    }

    /// Session with a [`LogitsSampler`] built from `params.sampling`.
    pub fn constrained(
        input: Vec<u32>,
        model: Arc<dyn LanguageModel>,
        matcher: GrammarMatcher,
        decoder: Arc<dyn TokenDecoder>,
        params: GenerateParameters,
    ) -> Result<Self> {
        let sampler = Box::new(LogitsSampler::new(params.sampling.clone()));
        Self::new(
            input,
            model,
            MaskedLogitProcessor::new(matcher),
            sampler,
            decoder,
            params,
        )
    }

    /// Continue from a pre-populated cache instead of an empty one.
    pub fn with_cache(mut self, cache: KvCache) -> Self {
        self.cache = cache;
        self
    }

    /// Produce the next token, or `None` once the session has ended.
    pub async fn next(&mut self) -> Option<Result<Generation>> {
        self.next_with(&mut |_| Disposition::Continue).await
    }

    /// Like [`next`](Self::next), consulting `callback` with the tokens so
    /// far after each accepted token.
    pub async fn next_with(
        &mut self,
        callback: &mut (dyn FnMut(&[u32]) -> Disposition + Send),
    ) -> Option<Result<Generation>> {
        match self.state {
            State::Finished(_) | State::Aborted => return None,
            State::Prefill | State::Decode => {}
        }
        if self.params.max_tokens == Some(0) {
            self.finish(StopReason::Length);
            return None;
        }

        match self.step(callback).await {
            Ok(generation) => Some(Ok(generation)),
            Err(e) => {
                debug!(error = %e, tokens = self.tokens.len(), "generation aborted");
                self.state = State::Aborted;
                Some(Err(e))
            }
        }
    }

    async fn step(
        &mut self,
        callback: &mut (dyn FnMut(&[u32]) -> Disposition + Send),
    ) -> Result<Generation> {
        if self.state == State::Prefill {
            self.prefill().await?;
            self.state = State::Decode;
        }

        let ids = input_tensor(&[self.next_input], self.model.device())?;
        let logits = self.model.forward(&ids, &mut self.cache).await?;
        let logits = last_position_logits(&logits)?;
        let masked = self.processor.apply(&logits)?;
        let token = self.sampler.sample(&masked)?;
        let advance = self.processor.on_token_accepted(token)?;

        self.tokens.push(token);
        self.next_input = token;
        let mut chunk = self.detokenizer.push(token)?;
        trace!(token, step = self.tokens.len(), ?advance, "decoded token");

        let disposition = callback(&self.tokens);
        let finish = self.stop_check(token, advance, disposition);
        if let Some(reason) = finish {
            chunk.push_str(&self.detokenizer.flush()?);
            self.finish(reason);
        }
        Ok(Generation {
            token,
            chunk,
            finish,
        })
    }

    async fn prefill(&mut self) -> Result<()> {
        let prompt = &self.input[..self.input.len() - 1];
        let step = self.params.prefill_step_size.max(1);
        for chunk in prompt.chunks(step) {
            let ids = input_tensor(chunk, self.model.device())?;
            self.model.forward(&ids, &mut self.cache).await?;
            trace!(len = chunk.len(), cached = self.cache.seq_len(), "prefill chunk");
        }
        Ok(())
    }

    fn stop_check(
        &self,
        token: u32,
        advance: AdvanceResult,
        disposition: Disposition,
    ) -> Option<StopReason> {
        if self.processor.matcher().tokenizer().is_stop_token(token) {
            Some(StopReason::StopToken)
        } else if self
            .params
            .max_tokens
            .is_some_and(|max| self.tokens.len() >= max)
        {
            Some(StopReason::Length)
        } else if disposition == Disposition::Stop {
            Some(StopReason::Callback)
        } else if advance == AdvanceResult::Terminal {
            Some(StopReason::GrammarComplete)
        } else {
            None
        }
    }

    fn finish(&mut self, reason: StopReason) {
        debug!(%reason, tokens = self.tokens.len(), "generation finished");
        self.state = State::Finished(reason);
    }

    /// Turn into a [`Stream`] of generations.
    pub fn into_stream(self) -> impl Stream<Item = Result<Generation>> + Send {
        futures::stream::unfold(self, |mut iter| async move {
            iter.next().await.map(|item| (item, iter))
        })
    }

    /// Why the session ended, once it has.
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.state {
            State::Finished(reason) => Some(reason),
            _ => None,
        }
    }

    /// Whether the session ended on an error.
    pub fn is_aborted(&self) -> bool {
        self.state == State::Aborted
    }

    /// Generated tokens so far.
    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }

    /// Prompt tokens.
    pub fn input(&self) -> &[u32] {
        &self.input
    }

    /// Full text of the generated tokens.
    pub fn text(&self) -> Result<String> {
        self.detokenizer.decoder().decode(&self.tokens)
    }

    /// Mask used for the latest token.
    pub fn processor(&self) -> &MaskedLogitProcessor {
        &self.processor
    }

    /// The session's KV cache.
    pub fn cache(&self) -> &KvCache {
        &self.cache
    }

    /// Take the KV cache, e.g. to continue from it in a later session.
    pub fn into_cache(self) -> KvCache {
        self.cache
    }
}

impl fmt::Debug for TokenIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIterator")
            .field("state", &self.state)
            .field("input_len", &self.input.len())
            .field("tokens", &self.tokens)
            .field("params", &self.params)
            .finish()
    }
}
