//! # Hash Table Benchmarks: In-Memory vs Spilled
//!
//! Measures the cost of building and probing a `SpillHashTable` when every
//! row fits in memory and when nearly all of them land in overflow storage.
//!
//! ## Test Matrix
//!
//! | Phase | Budget          | Rows   | Keys  |
//! |-------|-----------------|--------|-------|
//! | Build | unbounded       | 20,000 | 2,000 |
//! | Build | 1,000 row cap   | 20,000 | 2,000 |
//! | Probe | unbounded       | 2,000 lookups |  |
//! | Probe | 1,000 row cap   | 2,000 lookups |  |
//!
//! ## Running Benchmarks
//!
//! ```bash
//! cargo bench --bench hashtable
//! cargo bench --bench hashtable -- probe
//! ```

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use hashspill::storage::TempSpace;
use hashspill::{HashKey, HashTableBuilder, Row, SpillHashTable, Value, VecRowSource};
use std::sync::Arc;
use tempfile::TempDir;

const ROWS: u64 = 20_000;
const KEYS: i64 = 2_000;
const SPILL_CAP: usize = 1_000;

fn input_rows() -> Vec<Row> {
    (0..ROWS as i64)
        .map(|i| {
            Row::new(vec![
                Value::Int(i % KEYS),
                Value::Text(format!("customer-{:06}", i)),
                Value::Float(i as f64 * 0.25),
            ])
        })
        .collect()
}

fn build_table(space: &Arc<TempSpace>, rows: Vec<Row>, cap: Option<usize>) -> SpillHashTable {
    let mut source = VecRowSource::new(rows);
    let mut builder = HashTableBuilder::new(space.clone(), vec![0])
        .source(&mut source)
        .estimated_rows(ROWS as usize);
    builder = match cap {
        Some(cap) => builder.max_in_memory_rows(cap),
        None => builder.max_in_memory_rows(usize::MAX),
    };
    builder.build().expect("Failed to build hash table")
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    group.throughput(Throughput::Elements(ROWS));
    group.sample_size(10);

    for (name, cap) in [("memory", None), ("spilled", Some(SPILL_CAP))] {
        group.bench_function(BenchmarkId::new("hashtable", name), |b| {
            b.iter_batched(
                || {
                    let dir = TempDir::new().expect("Failed to create temp directory");
                    let space = TempSpace::new(dir.path()).expect("Failed to create temp space");
                    (dir, space, input_rows())
                },
                |(dir, space, rows)| {
                    let mut table = build_table(&space, rows, cap);
                    table.close().expect("Failed to close hash table");
                    black_box((dir, table))
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

fn bench_probe(c: &mut Criterion) {
    let mut group = c.benchmark_group("probe");
    group.throughput(Throughput::Elements(KEYS as u64));
    group.sample_size(10);

    for (name, cap) in [("memory", None), ("spilled", Some(SPILL_CAP))] {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let space = TempSpace::new(dir.path()).expect("Failed to create temp space");
        let mut table = build_table(&space, input_rows(), cap);

        group.bench_function(BenchmarkId::new("hashtable", name), |b| {
            b.iter(|| {
                let mut found = 0usize;
                for key in 0..KEYS {
                    if let Some(entry) = table.get(&HashKey::from(key)).expect("probe failed") {
                        found += entry.len();
                    }
                }
                black_box(found)
            });
        });

        table.close().expect("Failed to close hash table");
    }

    group.finish();
}

criterion_group!(benches, bench_build, bench_probe);
criterion_main!(benches);
