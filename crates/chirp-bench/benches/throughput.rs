//! Throughput benchmarks for Chirp.
//!
//! These benchmarks measure publish, fan-out and poll throughput of a topic.

use bytes::Bytes;
use chirp_core::{
    Anonymous, Broadcaster, Message, MessageStore, Sink, SinkError, SubscriberRegistry, TopicConfig,
};
use chirp_protocol::PublishRequest;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

/// A sink that accepts and discards every frame.
struct NullSink;

impl Sink for NullSink {
    fn send(&self, frame: Bytes) -> Result<(), SinkError> {
        black_box(frame);
        Ok(())
    }
}

fn request() -> PublishRequest {
    PublishRequest::text("x".repeat(64)).with_attributor("#4ECDC4")
}

/// Benchmark publishing with a growing number of subscribers.
fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");

    for subscribers in [0usize, 1, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                let topic = Broadcaster::new("bench");
                let _attached: Vec<_> = (0..subscribers)
                    .map(|_| topic.attach(Arc::new(NullSink)).unwrap())
                    .collect();
                let request = request();

                b.iter(|| topic.publish(black_box(&request)).unwrap());
            },
        );
    }

    group.finish();
}

/// Benchmark raw registry fan-out of an encoded frame.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");
    let frame = Bytes::from(vec![b'x'; 128]);

    for size in [10usize, 100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let registry = SubscriberRegistry::new("bench");
            for _ in 0..size {
                registry.register(Arc::new(NullSink));
            }

            b.iter(|| registry.broadcast(black_box(&frame)));
        });
    }

    group.finish();
}

/// Benchmark poll queries against a full store.
fn bench_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("list");

    let mut store = MessageStore::bounded(1000);
    for seq in 0..1000u64 {
        store.append(Arc::new(Message {
            id: format!("msg_{seq}_{seq}"),
            text: "x".repeat(64),
            timestamp: 1_700_000_000_000 + seq,
            attributor: "#4ECDC4".to_string(),
            sent_at: None,
        }));
    }

    group.bench_function("latest_50", |b| {
        b.iter(|| store.list(black_box(None), black_box(None)))
    });
    group.bench_function("since_tail", |b| {
        b.iter(|| store.list(black_box(Some(1_700_000_000_990)), black_box(None)))
    });
    group.bench_function("all", |b| {
        b.iter(|| store.list(black_box(None), black_box(Some(0))))
    });

    group.finish();
}

/// Benchmark subscribing with a full replay.
fn bench_subscribe(c: &mut Criterion) {
    let mut group = c.benchmark_group("subscribe");

    for backlog in [0usize, 100, 1000] {
        group.throughput(Throughput::Elements(backlog as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(backlog),
            &backlog,
            |b, &backlog| {
                let topic = Broadcaster::with_config(
                    TopicConfig::new("bench").with_capacity(Some(1000)),
                    Box::new(Anonymous::default()),
                );
                let request = request();
                for _ in 0..backlog {
                    topic.publish(&request).unwrap();
                }

                b.iter(|| topic.subscribe().unwrap());
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_publish, bench_fanout, bench_list, bench_subscribe);
criterion_main!(benches);
