//! Benchmark for the synchronization hot paths.
//!
//! TARGET: encode + decode a 3-component update in under 1µs; sequence
//! lookup and delta over a full 128-snapshot store in under 50µs.
//!
//! Run with: cargo bench --package tether_net --bench sync_benchmark

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tether_core::{Health, ManualClock, Position, Velocity};
use tether_net::protocol::{InputCommand, StateUpdate};
use tether_net::snapshot::{
    EntitySnapshot, LinearScan, SequenceMap, SnapshotIndex, SnapshotStore, WorldSnapshot,
};

const ENTITIES: u64 = 256;
const CAPACITY: usize = 128;

fn world(step: u32) -> WorldSnapshot {
    let mut world = WorldSnapshot::new();
    for id in 0..ENTITIES {
        // A quarter of the entities move each step.
        let moved = if id % 4 == u64::from(step % 4) { f64::from(step) } else { 0.0 };
        world.insert(
            EntitySnapshot::new(id, Position::new(id as f64 + moved, 0.0), Velocity::new(1.0, 0.0))
                .with_component(&Health::new(100.0, 100.0)),
        );
    }
    world
}

fn filled_store(index: Box<dyn SnapshotIndex>) -> SnapshotStore {
    let clock = Arc::new(ManualClock::new(0));
    let store = SnapshotStore::with_index(CAPACITY, clock.clone(), index);
    for step in 0..CAPACITY as u32 * 2 {
        clock.advance(std::time::Duration::from_millis(50));
        store.add_snapshot(world(step));
    }
    store
}

fn benchmark_codec(c: &mut Criterion) {
    let update = StateUpdate::new(42, 1_000)
        .with_component(&Position::new(1.0, 2.0))
        .with_component(&Velocity::new(3.0, 4.0))
        .with_component(&Health::new(90.0, 100.0));
    let encoded = update.encode().unwrap();

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("state_update_encode", |b| {
        b.iter(|| black_box(&update).encode().unwrap());
    });
    group.bench_function("state_update_decode", |b| {
        b.iter(|| StateUpdate::decode(black_box(&encoded)).unwrap());
    });

    let command = InputCommand::new(7, 1_000, 99, "input", vec![1, 0]);
    group.bench_function("input_command_roundtrip", |b| {
        b.iter(|| InputCommand::decode(&black_box(&command).encode().unwrap()).unwrap());
    });
    group.finish();
}

fn benchmark_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_lookup");
    for (name, index) in [
        ("linear_scan", Box::new(LinearScan) as Box<dyn SnapshotIndex>),
        ("sequence_map", Box::<SequenceMap>::default() as Box<dyn SnapshotIndex>),
    ] {
        let store = filled_store(index);
        let oldest = store.sequences()[0];
        group.bench_with_input(BenchmarkId::new("oldest_sequence", name), &oldest, |b, &seq| {
            b.iter(|| store.get_snapshot_at_sequence(black_box(seq)).unwrap());
        });
    }

    let store = filled_store(Box::new(LinearScan));
    let newest = store.latest().unwrap().timestamp_ns;
    group.bench_function("nearest_by_time", |b| {
        b.iter(|| store.get_snapshot_at_time(black_box(newest / 2)).unwrap());
    });
    group.bench_function("interpolate_entity", |b| {
        b.iter(|| store.interpolate_entity(black_box(17), black_box(newest - 25_000_000)).unwrap());
    });
    group.finish();
}

fn benchmark_delta(c: &mut Criterion) {
    let store = filled_store(Box::<SequenceMap>::default());
    let sequences = store.sequences();
    let (from, to) = (sequences[sequences.len() - 2], sequences[sequences.len() - 1]);

    let mut group = c.benchmark_group("snapshot_delta");
    group.throughput(Throughput::Elements(ENTITIES));
    group.bench_function("create_delta", |b| {
        b.iter(|| store.create_delta(black_box(from), black_box(to)).unwrap());
    });

    let delta = store.create_delta(from, to).unwrap();
    group.bench_function("apply_delta", |b| {
        b.iter(|| store.apply_delta(black_box(from), black_box(&delta)).unwrap());
    });
    group.finish();
}

criterion_group!(benches, benchmark_codec, benchmark_lookup, benchmark_delta);
criterion_main!(benches);
