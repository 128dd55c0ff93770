//! Benchmarks for packet encoding and decoding
//!
//! Run with: cargo bench --bench packet_codec
//!
//! Packets are built from realistic input patterns: idle players, players
//! pressing a control every few cycles and players sending chat payloads.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use lockstep_sync::__internal::parse_packet;
use lockstep_sync::{
    compute_checksum, ControlKeys, InputFrame, LockstepSession, SessionBuilder, Slot,
};
use std::hint::black_box;

const MAX_LEAD: usize = 1024;

fn session(local: usize) -> LockstepSession {
    SessionBuilder::new()
        .with_num_players(2)
        .with_local_slot(Slot::new(local))
        .build()
        .expect("valid session")
}

/// Idle player: nothing pressed
fn idle_frame(_cycle: usize) -> InputFrame {
    InputFrame::default()
}

/// Active player: a control changes every 5 cycles
fn active_frame(cycle: usize) -> InputFrame {
    InputFrame::new(ControlKeys::from_bits(1 << ((cycle / 5) % 7)))
}

/// Chatty player: a short payload every 10 cycles
fn chat_frame(cycle: usize) -> InputFrame {
    if cycle % 10 == 0 {
        InputFrame::with_user(ControlKeys::from_bits(1), b"chat:gg wp").expect("no NUL")
    } else {
        active_frame(cycle)
    }
}

fn sender_with(cycles: usize, pattern: fn(usize) -> InputFrame) -> LockstepSession {
    let mut sender = session(0);
    for cycle in 0..cycles {
        sender.add_local_input(pattern(cycle));
    }
    sender
}

type Pattern = (&'static str, fn(usize) -> InputFrame);

const PATTERNS: [Pattern; 3] = [
    ("idle", idle_frame),
    ("active", active_frame),
    ("chat", chat_frame),
];

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("Packet encode");

    for (name, pattern) in PATTERNS {
        for cycles in [8, 32, 128, 512] {
            let mut sender = sender_with(cycles, pattern);
            group.throughput(Throughput::Elements(cycles as u64));
            group.bench_function(BenchmarkId::new(name, cycles), |b| {
                b.iter(|| black_box(sender.encode_packet()));
            });
        }
    }

    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("Packet parse");
    let receiver = session(1);

    for (name, pattern) in PATTERNS {
        for cycles in [8, 32, 128, 512] {
            let packet = sender_with(cycles, pattern).encode_packet();
            group.throughput(Throughput::Bytes(packet.len() as u64));
            group.bench_with_input(BenchmarkId::new(name, cycles), &packet, |b, packet| {
                b.iter(|| parse_packet(black_box(packet), receiver.state(), MAX_LEAD));
            });
        }
    }

    group.finish();
}

fn bench_handle(c: &mut Criterion) {
    let mut group = c.benchmark_group("Packet handle");

    for cycles in [8, 32, 128] {
        let packet = sender_with(cycles, active_frame).encode_packet();

        group.bench_with_input(BenchmarkId::new("fresh", cycles), &packet, |b, packet| {
            b.iter_batched(
                || session(1),
                |mut receiver| receiver.handle_packet(black_box(packet)).is_ok(),
                BatchSize::SmallInput,
            );
        });

        // receiver already speculated idle input for every cycle
        group.bench_with_input(BenchmarkId::new("corrections", cycles), &packet, |b, packet| {
            b.iter_batched(
                || {
                    let mut receiver = session(1);
                    for _ in 0..cycles {
                        receiver.add_local_input(InputFrame::default());
                    }
                    receiver
                },
                |mut receiver| receiver.handle_packet(black_box(packet)).is_ok(),
                BatchSize::SmallInput,
            );
        });

        // retransmission of a packet that has already been applied
        let mut receiver = session(1);
        let _ = receiver.handle_packet(&packet);
        group.bench_with_input(BenchmarkId::new("duplicate", cycles), &packet, |b, packet| {
            b.iter(|| receiver.handle_packet(black_box(packet)).is_ok());
        });
    }

    group.finish();
}

fn bench_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("State checksum");

    for entities in [16usize, 256, 4096] {
        let state: Vec<(u32, i32, i32)> = (0..entities)
            .map(|i| (i as u32, (i * 31) as i32, -(i as i32)))
            .collect();
        group.throughput(Throughput::Elements(entities as u64));
        group.bench_with_input(BenchmarkId::new("entities", entities), &state, |b, state| {
            b.iter(|| compute_checksum(black_box(state)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_parse, bench_handle, bench_checksum);
criterion_main!(benches);
