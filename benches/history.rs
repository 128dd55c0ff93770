//! Benchmarks for input history operations
//!
//! Run with: cargo bench --bench history

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lockstep_sync::{ControlKeys, Cycle, HistoryStore, InputFrame, SessionBuilder, Slot};
use std::hint::black_box;

fn frame(bits: u8) -> InputFrame {
    InputFrame::new(ControlKeys::from_bits(bits))
}

fn bench_cycle_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("Cycle");

    group.bench_function("new", |b| {
        b.iter(|| Cycle::new(black_box(42)));
    });

    group.bench_function("is_null", |b| {
        let cycle = Cycle::new(42);
        b.iter(|| black_box(cycle).is_null());
    });

    group.finish();
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("History append");

    for max_history in [64usize, 256, 1024] {
        group.throughput(Throughput::Elements(max_history as u64));
        group.bench_with_input(
            BenchmarkId::new("with_compaction", max_history),
            &max_history,
            |b, &max_history| {
                b.iter(|| {
                    let mut history = HistoryStore::new(Cycle::new(0), 1, Slot::new(0), max_history);
                    for i in 0..max_history {
                        history.append(Slot::new(0), frame(i as u8 & 0x7f));
                    }
                    black_box(history.starting_cycle(Slot::new(0)))
                });
            },
        );
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("History lookup");

    let mut history = HistoryStore::new(Cycle::new(0), 2, Slot::new(0), 1024);
    for i in 0..1000 {
        history.append(Slot::new(0), frame(i as u8 & 0x7f));
    }
    history.grow_to_include(Slot::new(1), Cycle::new(999), None);

    for cycle in [0, 500, 999] {
        group.bench_with_input(BenchmarkId::new("get", cycle), &cycle, |b, &cycle| {
            b.iter(|| history.get(Slot::new(0), black_box(Cycle::new(cycle))).keys());
        });
    }

    group.bench_function("try_get_miss", |b| {
        b.iter(|| history.try_get(Slot::new(1), black_box(Cycle::new(5000))).is_none());
    });

    group.finish();
}

fn bench_speculation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Speculation");

    for players in [2usize, 4, 8] {
        group.bench_with_input(
            BenchmarkId::new("add_local_input", players),
            &players,
            |b, &players| {
                let mut session = SessionBuilder::new()
                    .with_num_players(players)
                    .with_local_slot(Slot::new(0))
                    .build()
                    .expect("valid session");
                b.iter(|| session.add_local_input(black_box(frame(1))));
            },
        );
    }

    for span in [8i32, 64, 256] {
        group.bench_with_input(BenchmarkId::new("extend_forward", span), &span, |b, &span| {
            let mut history = HistoryStore::new(Cycle::new(0), 2, Slot::new(0), 1024);
            history.grow_to_include(Slot::new(1), Cycle::new(span), None);
            let mut toggle = 0u8;
            b.iter(|| {
                toggle ^= 1;
                history.extend_forward(Slot::new(1), Cycle::new(0), &frame(toggle))
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cycle_operations,
    bench_append,
    bench_lookup,
    bench_speculation
);
criterion_main!(benches);
