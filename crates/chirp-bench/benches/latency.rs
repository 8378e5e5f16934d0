//! Latency benchmarks for Chirp.
//!
//! These benchmarks focus on the time from publish to a frame being ready
//! for a subscriber.

use chirp_core::message::sanitize_text;
use chirp_core::{Broadcaster, Counter, TopicConfig};
use chirp_protocol::{codec, PublishRequest, TopicMessage};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Instant;

/// Benchmark publish + receive through a live subscription.
fn bench_pubsub_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("pubsub_latency");
    let request = PublishRequest::text("hello there").with_attributor("#FF6B6B");

    group.bench_function("single_subscriber", |b| {
        b.iter_custom(|iters| {
            let topic = Broadcaster::new("bench");
            let mut subscription = topic.subscribe().unwrap();

            let start = Instant::now();
            for _ in 0..iters {
                topic.publish(&request).unwrap();
                black_box(subscription.try_recv());
            }
            start.elapsed()
        });
    });

    group.bench_function("ten_subscribers", |b| {
        b.iter_custom(|iters| {
            let topic = Broadcaster::new("bench");
            let mut subscriptions: Vec<_> =
                (0..10).map(|_| topic.subscribe().unwrap()).collect();

            let start = Instant::now();
            for _ in 0..iters {
                topic.publish(&request).unwrap();
                for subscription in &mut subscriptions {
                    black_box(subscription.try_recv());
                }
            }
            start.elapsed()
        });
    });

    group.bench_function("client_timestamps", |b| {
        b.iter_custom(|iters| {
            let topic = Broadcaster::with_config(
                TopicConfig::new("bench").with_client_timestamps(true),
                Box::new(chirp_core::Anonymous::default()),
            );
            let mut subscription = topic.subscribe().unwrap();

            let start = Instant::now();
            for i in 0..iters {
                topic
                    .publish(&request.clone().with_timestamp(1_700_000_000_000 + i))
                    .unwrap();
                black_box(subscription.try_recv());
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmark counter increments with one listener.
fn bench_counter(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter");

    group.bench_function("increment", |b| {
        b.iter_custom(|iters| {
            let counter = Counter::new("likes");
            let mut subscription = counter.subscribe().unwrap();

            let start = Instant::now();
            for _ in 0..iters {
                counter.increment().unwrap();
                black_box(subscription.try_recv());
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmark the per-message work done before the topic lock is taken.
fn bench_prepare(c: &mut Criterion) {
    let mut group = c.benchmark_group("prepare");

    let short = "  hello world  ";
    let long = "ü".repeat(2000);

    group.bench_function("sanitize_short", |b| {
        b.iter(|| sanitize_text(black_box(Some(short)), 500))
    });
    group.bench_function("sanitize_truncate", |b| {
        b.iter(|| sanitize_text(black_box(Some(long.as_str())), 500))
    });

    let topic = Broadcaster::new("bench");
    let published = topic
        .publish(&PublishRequest::text("x".repeat(256)).with_attributor("#96CEB4"))
        .unwrap();
    group.bench_function("encode_event", |b| {
        b.iter(|| {
            codec::encode(&TopicMessage::new(
                black_box(&published.message),
                topic.attributor_field(),
            ))
        })
    });

    group.finish();
}

criterion_group!(benches, bench_pubsub_latency, bench_counter, bench_prepare);
criterion_main!(benches);
