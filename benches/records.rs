//! Record store benchmarks for rmstore
//!
//! These benchmarks measure the block allocator and record index on the
//! in-memory backend, so the numbers reflect the engine rather than the disk.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rmstore::{RecordStore, Rms, SuiteId};
use std::hint::black_box as hint_black_box;

fn fresh_store(name: &str) -> (Rms, RecordStore) {
    let rms = Rms::builder()
        .in_memory()
        .suite(SuiteId(1))
        .open()
        .unwrap();
    let store = rms.open_record_store(name, true).unwrap();
    (rms, store)
}

fn filled_store(name: &str, count: usize, size: usize) -> (Rms, RecordStore) {
    let (rms, store) = fresh_store(name);
    let payload = vec![0xA5u8; size];
    for _ in 0..count {
        store.add_record(&payload).unwrap();
    }
    (rms, store)
}

fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_record");

    for size in [16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let payload = vec![7u8; size];
            b.iter_batched(
                || fresh_store("add"),
                |(rms, store)| {
                    let id = store.add_record(black_box(&payload)).unwrap();
                    (rms, store, id)
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_record");
    let (_rms, store) = filled_store("get", 1000, 64);

    group.bench_function("cached", |b| {
        b.iter(|| hint_black_box(store.get_record(black_box(500)).unwrap()));
    });

    group.bench_function("into_buffer", |b| {
        let mut buf = [0u8; 64];
        b.iter(|| hint_black_box(store.get_record_into(black_box(500), &mut buf).unwrap()));
    });

    group.bench_function("record_ids", |b| {
        b.iter(|| hint_black_box(store.get_record_ids().unwrap()));
    });

    group.finish();
}

fn bench_reuse(c: &mut Criterion) {
    c.bench_function("delete_then_add_reuses_block", |b| {
        let (_rms, store) = filled_store("reuse", 100, 128);
        let payload = vec![1u8; 120];
        let mut victim = 1;
        b.iter(|| {
            store.delete_record(victim).unwrap();
            victim = store.add_record(black_box(&payload)).unwrap();
        });
    });
}

fn bench_compact(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact");
    group.sample_size(20);

    for count in [100usize, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let (rms, store) = filled_store("compact", count, 64);
                    for id in (1..=count as i32).step_by(2) {
                        store.delete_record(id).unwrap();
                    }
                    (rms, store)
                },
                |(rms, store)| {
                    store.close().unwrap();
                    hint_black_box(rms)
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add, bench_get, bench_reuse, bench_compact);
criterion_main!(benches);
