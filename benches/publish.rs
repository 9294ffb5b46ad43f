//! Performance benchmarks for flowmq
//!
//! Run with: cargo bench

use criterion::{criterion_group, criterion_main, Criterion};
use flowmq::{CronExpression, Envelope, SubjectPattern};
use std::collections::HashMap;

fn sample_envelope() -> Envelope {
    Envelope {
        id: "msg-5b7a1c2e".to_string(),
        subject: "orders.eu.created".to_string(),
        data: serde_json::json!({"orderId": 42, "total": 99.5, "currency": "EUR"}),
        timestamp: 1_700_000_000_000,
        metadata: HashMap::from([("region".to_string(), "eu".to_string())]),
    }
}

fn bench_envelope_serialization(c: &mut Criterion) {
    let envelope = sample_envelope();

    c.bench_function("Envelope serialize", |b| {
        b.iter(|| serde_json::to_vec(&envelope).unwrap());
    });

    let bytes = serde_json::to_vec(&envelope).unwrap();
    c.bench_function("Envelope deserialize", |b| {
        b.iter(|| serde_json::from_slice::<Envelope>(&bytes).unwrap());
    });
}

fn bench_pattern_matching(c: &mut Criterion) {
    c.bench_function("SubjectPattern parse", |b| {
        b.iter(|| SubjectPattern::parse("orders.*.created").unwrap());
    });

    let literal = SubjectPattern::parse("orders.eu.created").unwrap();
    let single = SubjectPattern::parse("orders.*.created").unwrap();
    let tail = SubjectPattern::parse("orders.>").unwrap();

    let mut group = c.benchmark_group("pattern_match");
    group.bench_function("literal", |b| {
        b.iter(|| literal.matches("orders.eu.created"));
    });
    group.bench_function("single_wildcard", |b| {
        b.iter(|| single.matches("orders.eu.created"));
    });
    group.bench_function("tail_wildcard", |b| {
        b.iter(|| tail.matches("orders.eu.created.v2"));
    });
    group.bench_function("miss", |b| {
        b.iter(|| single.matches("invoices.eu.created"));
    });
    group.finish();
}

fn bench_cron(c: &mut Criterion) {
    c.bench_function("CronExpression parse", |b| {
        b.iter(|| CronExpression::parse("*/5 8-18 * * 1-5").unwrap());
    });

    let expr = CronExpression::parse("*/5 8-18 * * 1-5").unwrap();
    let now = chrono::Utc::now();
    c.bench_function("CronExpression next_after", |b| {
        b.iter(|| expr.next_after(now).unwrap());
    });
}

criterion_group!(
    benches,
    bench_envelope_serialization,
    bench_pattern_matching,
    bench_cron,
);
criterion_main!(benches);
