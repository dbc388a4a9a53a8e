//! Benchmarks for grammar-constrained decoding.
//!
//! Mask computation runs once per generated token and dominates the
//! per-token overhead of constrained decoding.
//!
//! # Benchmark Scenarios
//!
//! 1. Regex compilation (one-time cost)
//! 2. Binding a grammar to vocabularies of increasing size
//! 3. Mask computation and token acceptance
//! 4. Logit masking
//! 5. Partial JSON repair for streaming consumers

use candle_core::{Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use trellis_core::grammar::{Grammar, GrammarMatcher, TokenMask};
use trellis_core::processor::MaskedLogitProcessor;
use trellis_core::projection::repair_json;
use trellis_core::vocab::TokenizerInfo;

/// Sample regex patterns.
mod patterns {
    pub const SIMPLE_WORD: &str = r"[a-z]+";
    pub const EMAIL: &str = r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}";
    pub const UUID: &str = r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}";
    pub const ISO_DATE: &str = r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?Z?";
    pub const PERSON_JSON: &str = r#"\{"name":"[A-Za-z ]{1,32}","age":[0-9]{1,3}\}"#;
}

/// Synthetic vocabulary: single characters, then pairs and triples of them.
fn vocabulary(size: usize) -> Arc<TokenizerInfo> {
    let alphabet: Vec<char> = ('a'..='z')
        .chain('A'..='Z')
        .chain('0'..='9')
        .chain("{}\":,.-@ ".chars())
        .collect();
    let mut tokens: Vec<String> = alphabet.iter().map(|c| c.to_string()).collect();
    'fill: for a in &alphabet {
        for b in &alphabet {
            for c in ["".to_string(), alphabet[tokens.len() % alphabet.len()].to_string()] {
                if tokens.len() + 1 >= size {
                    break 'fill;
                }
                tokens.push(format!("{}{}{}", a, b, c));
            }
        }
    }
    tokens.push("</s>".to_string());
    let stop = (tokens.len() - 1) as u32;
    Arc::new(TokenizerInfo::from_tokens(&tokens, &[stop]))
}

/// Benchmark: Grammar compilation time.
fn bench_grammar_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("grammar_compile");

    for (name, pattern) in [
        ("word", patterns::SIMPLE_WORD),
        ("email", patterns::EMAIL),
        ("uuid", patterns::UUID),
        ("date", patterns::ISO_DATE),
        ("person", patterns::PERSON_JSON),
    ] {
        group.bench_with_input(BenchmarkId::new("regex", name), &pattern, |b, pattern| {
            b.iter(|| {
                let compiled = Grammar::regex(black_box(*pattern)).compile().unwrap();
                black_box(compiled)
            })
        });
    }

    group.finish();
}

/// Benchmark: Binding a compiled grammar to a vocabulary.
fn bench_matcher_bind(c: &mut Criterion) {
    let mut group = c.benchmark_group("matcher_bind");

    for vocab_size in [1000, 4000] {
        let info = vocabulary(vocab_size);
        let compiled = Grammar::regex(patterns::EMAIL).compile().unwrap();
        group.bench_with_input(
            BenchmarkId::new("vocab_size", vocab_size),
            &vocab_size,
            |b, _| {
                b.iter(|| {
                    let matcher = GrammarMatcher::new(info.clone(), compiled.clone()).unwrap();
                    black_box(matcher)
                })
            },
        );
    }

    group.finish();
}

/// Benchmark: Mask computation (critical path).
fn bench_mask_computation(c: &mut Criterion) {
    let mut group = c.benchmark_group("mask_computation");
    group.throughput(Throughput::Elements(1));

    for vocab_size in [1000, 4000] {
        let info = vocabulary(vocab_size);
        let compiled = Grammar::regex(patterns::PERSON_JSON).compile().unwrap();
        let mut matcher = GrammarMatcher::new(info.clone(), compiled).unwrap();
        let mut mask = TokenMask::block_all(info.vocab_size());

        group.bench_with_input(
            BenchmarkId::new("vocab_size", vocab_size),
            &vocab_size,
            |b, _| {
                b.iter(|| {
                    matcher.fill_mask(&mut mask).unwrap();
                    black_box(mask.num_allowed())
                })
            },
        );
    }

    for (name, pattern) in [
        ("word", patterns::SIMPLE_WORD),
        ("uuid", patterns::UUID),
        ("date", patterns::ISO_DATE),
    ] {
        let info = vocabulary(2000);
        let mut matcher =
            GrammarMatcher::new(info.clone(), Grammar::regex(pattern).compile().unwrap()).unwrap();
        group.bench_with_input(BenchmarkId::new("pattern", name), &name, |b, _| {
            b.iter(|| black_box(matcher.mask().unwrap()))
        });
    }

    group.finish();
}

/// Benchmark: Constrained decode steps (mask, pick first permitted, accept).
fn bench_constrained_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("constrained_steps");

    let info = vocabulary(2000);
    let compiled = Grammar::regex(patterns::SIMPLE_WORD).compile().unwrap();

    for steps in [10, 50] {
        group.throughput(Throughput::Elements(steps as u64));
        group.bench_with_input(BenchmarkId::new("steps", steps), &steps, |b, &steps| {
            b.iter(|| {
                let mut matcher = GrammarMatcher::new(info.clone(), compiled.clone()).unwrap();
                for _ in 0..steps {
                    let mask = matcher.mask().unwrap();
                    let Some(token) = mask.allowed_tokens().next() else {
                        break;
                    };
                    matcher.accept(token).unwrap();
                }
                black_box(matcher)
            })
        });
    }

    group.finish();
}

/// Benchmark: Applying the mask to a logit tensor.
fn bench_logit_masking(c: &mut Criterion) {
    let mut group = c.benchmark_group("logit_masking");

    let info = vocabulary(4000);
    let compiled = Grammar::regex(patterns::EMAIL).compile().unwrap();
    let mut processor =
        MaskedLogitProcessor::new(GrammarMatcher::new(info.clone(), compiled).unwrap());
    let logits = Tensor::zeros(info.vocab_size(), candle_core::DType::F32, &Device::Cpu).unwrap();

    group.bench_function("apply", |b| {
        b.iter(|| black_box(processor.apply(black_box(&logits)).unwrap()))
    });

    group.finish();
}

/// Benchmark: Partial JSON repair.
fn bench_json_repair(c: &mut Criterion) {
    let mut group = c.benchmark_group("json_repair");

    let document = r#"{"user":{"id":7,"profile":{"name":"Ada","tags":["a","b","c"],"email":"ada@example.com"}}}"#;
    for cut in [10, 40, document.len() - 1] {
        let prefix = &document[..cut];
        group.bench_with_input(BenchmarkId::new("prefix", cut), &prefix, |b, prefix| {
            b.iter(|| black_box(repair_json(black_box(prefix))))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_grammar_compile,
    bench_matcher_bind,
    bench_mask_computation,
    bench_constrained_steps,
    bench_logit_masking,
    bench_json_repair,
);
criterion_main!(benches);
