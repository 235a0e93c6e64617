//! Benchmarks for the identifier codec and span attribute handling.

use agentbus_core::telemetry::{codec, truncate, EnvelopeBuilder};
use agentbus_core::*;
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const BOUND: &str = "v3.report.vulnerability.0f0c4c1e-6bd0-4a34-9a3c-1a2b3c4d5e6f-3039-1869e";

fn bench_codec(c: &mut Criterion) {
    let ctx = TraceContext::remote(u128::MAX, u64::MAX);
    let encoded = codec::encode(&ctx);

    c.bench_function("codec_encode", |b| b.iter(|| codec::encode(black_box(&ctx))));
    c.bench_function("codec_decode", |b| b.iter(|| codec::decode(black_box(&encoded))));
}

fn bench_identifiers(c: &mut Criterion) {
    let extractor = InboundContextExtractor::new();
    let builder = EnvelopeBuilder::traced();
    let selector = TopicSelector::new("v3.report.vulnerability").unwrap();
    let payload = Bytes::from_static(br#"{"title":"t","technical_detail":"d","risk_rating":"MEDIUM"}"#);

    c.bench_function("extract_bound_selector", |b| {
        b.iter(|| extractor.extract(black_box(BOUND)))
    });
    c.bench_function("build_envelope", |b| {
        b.iter(|| builder.build(selector.clone(), payload.clone(), None).bound_selector().to_string())
    });
}

fn bench_truncate(c: &mut Criterion) {
    let mut group = c.benchmark_group("truncate");
    for size in [64usize, 4096, 65536] {
        let serialized = "x".repeat(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &serialized, |b, s| {
            b.iter(|| truncate(black_box(s), 1024))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_codec, bench_identifiers, bench_truncate);
criterion_main!(benches);
