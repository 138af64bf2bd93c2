//! Criterion benchmarks for the max-flow solver and the scenario modifier.
//!
//! Two benchmark groups:
//! - `solve_grid`: Edmonds-Karp on square grids, west column to east column
//! - `contraflow`: additive contraflow over the evacuation fixture

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use evacflow_core::contraflow;
use evacflow_core::maxflow::MaxFlowSolver;
use evacflow_core::scenario::{ContraflowRule, Scenario};
use evacflow_core::test_utils::*;

fn bench_solve_grid(c: &mut Criterion) {
    let mut group = c.benchmark_group("solve_grid");
    for side in [10i64, 25, 50] {
        let (graph, terminals) = grid_network(side, side);
        group.bench_with_input(BenchmarkId::from_parameter(side), &side, |b, _| {
            b.iter_batched(
                || graph.clone(),
                |mut g| {
                    MaxFlowSolver::default().solve(&mut g, &terminals).unwrap();
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_contraflow(c: &mut Criterion) {
    let (graph, _) = evacuation_network();
    let scenario = Scenario::baseline("cf").with_contraflow(ContraflowRule::default());
    let region = north_region();
    c.bench_function("contraflow_additive", |b| {
        b.iter(|| contraflow::apply(&graph, &scenario, &region).unwrap());
    });
}

criterion_group!(benches, bench_solve_grid, bench_contraflow);
criterion_main!(benches);
