//! # Command Queue Benchmark
//!
//! Measures the two hot paths of a frame:
//! 1. Push: recording commands into a warm arena
//! 2. Replay: invoking every recorded command once
//!
//! Target: push cost independent of queue length once the arena is warm.

#![allow(dead_code)]
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use framequeue_core::{CommandQueue, Invocation};

#[derive(Default)]
struct Sink {
    calls: u64,
    acc: f32,
}

/// Push small commands into an arena that has already grown to size.
fn bench_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push");

    for count in [1_000usize, 10_000, 100_000] {
        let mut queue: CommandQueue<Sink> = CommandQueue::new();
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("closure_16b", count), &count, |b, &count| {
            b.iter(|| {
                queue.clear();
                for i in 0..count {
                    let x = i as f32;
                    let y = x * 0.5;
                    queue.push(move |sink: &mut Sink, _: &Invocation<'_>| {
                        sink.acc += x + y;
                    });
                }
                black_box(queue.len());
            });
        });
    }
    group.finish();
}

/// Push commands that each carry a short text.
fn bench_push_text(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push_text");
    let count = 10_000usize;
    let mut queue: CommandQueue<Sink> = CommandQueue::new();
    group.throughput(Throughput::Elements(count as u64));

    group.bench_function("hud_line", |b| {
        b.iter(|| {
            queue.clear();
            for _ in 0..count {
                queue.push_with_text("Cubes: 5000", |sink: &mut Sink, call: &Invocation<'_>| {
                    sink.calls += call.text().len() as u64;
                });
            }
            black_box(queue.used());
        });
    });
    group.finish();
}

/// Replay a full queue.
fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_replay");

    for count in [1_000usize, 10_000, 100_000] {
        let mut queue: CommandQueue<Sink> = CommandQueue::new();
        for i in 0..count {
            let x = i as f32;
            queue.push(move |sink: &mut Sink, _: &Invocation<'_>| {
                sink.calls += 1;
                sink.acc += x;
            });
        }
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("replay_all", count), &count, |b, _| {
            let mut sink = Sink::default();
            b.iter(|| {
                queue.replay_all(black_box(&mut sink));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_push, bench_push_text, bench_replay);
criterion_main!(benches);
