// SPDX-License-Identifier: MIT OR Apache-2.0

//! Benchmarks for tree-based evaluation
//!
//! Run with: cargo bench --bench tree_matching_bench
//!
//! Benchmark groups:
//! - single_tree: one tree over a JSON stream
//! - data_parallel: the same workload split by each partition strategy

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use patternflux_rust::prelude::*;
use serde_json::json;

type S = PatternStructure;

const WINDOW: Timestamp = 1_000;

fn generate_records(count: usize, ids: i64) -> Vec<String> {
    let types = ["A", "B", "C"];
    (0..count)
        .map(|i| {
            json!({
                "type": types[i % types.len()],
                "timestamp": 1_000 + (i as i64) * 7,
                "id": (i as i64 * 31) % ids,
                "v": (i as i64 * 17) % 100,
            })
            .to_string()
        })
        .collect()
}

fn sequence() -> Pattern {
    Pattern::with_window_millis(
        S::seq(vec![
            S::primitive("A", "a"),
            S::primitive("B", "b"),
            S::primitive("C", "c"),
        ]),
        Condition::equal(Operand::attr("a", "id"), Operand::attr("b", "id"))
            .and(Condition::smaller(Operand::attr("a", "v"), Operand::attr("c", "v"))),
        WINDOW,
    )
}

fn run(
    mechanism: &mut TreeBasedEvaluationMechanism,
    records: &[String],
    formatter: &JsonDataFormatter,
) -> usize {
    let input = InputStream::from_items("input", records.to_vec());
    let output = OutputStream::new("output");
    mechanism
        .evaluate(&input, &output, formatter)
        .expect("evaluation failed");
    output.iter().count()
}

fn bench_single_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_tree");
    let formatter = JsonDataFormatter::default();

    for size in [1_000usize, 10_000] {
        let records = generate_records(size, 16);
        group.throughput(Throughput::Elements(size as u64));

        for (label, optimizer) in [
            ("static", OptimizerKind::Static),
            ("trivial", OptimizerKind::Trivial),
        ] {
            group.bench_with_input(BenchmarkId::new(label, size), &records, |b, records| {
                b.iter(|| {
                    let mut config = EvaluationConfig::default();
                    config.optimizer.kind = optimizer;
                    config.statistics.update_window_ms = 5 * WINDOW;
                    let mut mechanism = MechanismFactory::single(sequence(), config)
                        .expect("valid pattern")
                        .build()
                        .expect("valid tree");
                    black_box(run(&mut mechanism, records, &formatter))
                })
            });
        }
    }

    group.finish();
}

fn bench_data_parallel(c: &mut Criterion) {
    let mut group = c.benchmark_group("data_parallel");
    group.sample_size(10);
    let formatter = JsonDataFormatter::default();
    let size = 10_000usize;
    let records = generate_records(size, 16);
    group.throughput(Throughput::Elements(size as u64));

    let strategies = [
        (
            "key_hash",
            PartitionStrategyConfig::KeyHash {
                key: "id".to_string(),
            },
        ),
        (
            "interval",
            PartitionStrategyConfig::Interval {
                interval_ms: 4 * WINDOW,
                assignment: SlotAssignment::Modulo,
            },
        ),
    ];

    for units in [2usize, 4] {
        for (label, strategy) in &strategies {
            group.bench_with_input(BenchmarkId::new(*label, units), &records, |b, records| {
                b.iter(|| {
                    let mut config = EvaluationConfig::default();
                    config.parallel.units = units;
                    config.parallel.strategy = Some(strategy.clone());
                    let mut evaluation =
                        DataParallelEvaluation::from_patterns(vec![sequence()], config)
                            .expect("valid setup");
                    let input = InputStream::from_items("input", records.clone());
                    let output = OutputStream::new("output");
                    evaluation
                        .evaluate(&input, &output, &formatter)
                        .expect("evaluation failed");
                    black_box(output.iter().count())
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_single_tree, bench_data_parallel);
criterion_main!(benches);
