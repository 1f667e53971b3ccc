/// Benchmarks for the differ.
///
/// Run with: `cargo bench`
use std::path::Path;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use difftrace::domain::callgraph::CallGraph;
use difftrace::domain::diff::{compare, dedup_diff};

// ═══════════════════════════════════════════════════════════════════════════
// Synthetic Data Generators
// ═══════════════════════════════════════════════════════════════════════════

/// `modules` x `funcs` functions, each calling its next `fanout` neighbours.
/// Every `drop_every`-th edge is left out and every `retag_every`-th one
/// described differently, which gives the mutated side.
fn synthetic_graph(modules: usize, funcs: usize, fanout: usize, drop_every: usize, retag_every: usize) -> CallGraph {
    let mut graph = CallGraph::new();
    let mut n = 0;
    for m in 0..modules {
        for f in 0..funcs {
            let caller = format!("demo::m{}::f{}", m, f);
            for k in 1..=fanout {
                n += 1;
                if drop_every > 0 && n % drop_every == 0 {
                    continue;
                }
                let callee = format!("demo::m{}::f{}", (m + k) % modules, (f + k) % funcs);
                let desc = if retag_every > 0 && n % retag_every == 0 {
                    "dynamic call"
                } else {
                    "common call"
                };
                graph.insert(&caller, &callee, desc);
            }
        }
    }
    graph
}

// ═══════════════════════════════════════════════════════════════════════════
// Differ Benchmarks
// ═══════════════════════════════════════════════════════════════════════════

fn bench_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff/compare");
    let root = Path::new("/work/demo");

    for modules in [10, 50, 100, 250].iter() {
        let a = synthetic_graph(*modules, 20, 4, 0, 0);
        let b = synthetic_graph(*modules, 20, 4, 7, 11);
        group.throughput(Throughput::Elements(a.edge_count() as u64));

        group.bench_with_input(BenchmarkId::new("modules", modules), &(a, b), |bench, (a, b)| {
            bench.iter(|| compare(black_box(a), black_box(b), "demo", root))
        });
    }

    group.finish();
}

fn bench_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff/dedup");
    group.sample_size(30);
    let root = Path::new("/work/demo");

    for copies in [1, 4, 16].iter() {
        let a = synthetic_graph(50, 20, 4, 0, 0);
        let b = synthetic_graph(50, 20, 4, 5, 9);
        let once = compare(&a, &b, "demo", root);
        // The pipeline concatenates the diff sets of many test paths
        let repeated: Vec<_> = (0..*copies).flat_map(|_| once.iter().cloned()).collect();
        group.throughput(Throughput::Elements(repeated.len() as u64));

        group.bench_with_input(BenchmarkId::new("copies", copies), &repeated, |bench, diffs| {
            bench.iter(|| dedup_diff(black_box(diffs.clone())))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compare, bench_dedup);
criterion_main!(benches);
