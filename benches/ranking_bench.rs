use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use faultloc_core::exec_graph::{build_graph, RunInput};
use faultloc_core::id::{RunId, Sid, SiteNum};
use faultloc_core::predicate::{rank, ObservedCounts, SiteCounts};
use faultloc_core::trace::parse_trace;

// KPI-aligned benchmark scenarios: representative run populations of
// increasing size, each with a fixed failing/passing mix so `rank`'s input
// shape stays comparable across scenarios.

fn synthetic_trace(sites_hit: &[u32]) -> String {
    sites_hit
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// A small program with 8 instrumented sites, 20 runs (4 failing).
fn small_run_population() -> Vec<RunInput> {
    run_population(8, 20, 4)
}

/// A mid-size program with 64 sites, 400 runs (40 failing).
fn medium_run_population() -> Vec<RunInput> {
    run_population(64, 400, 40)
}

/// A large program with 512 sites, 4000 runs (200 failing) — the scale a
/// real genetic-search loop's localization pass is expected to run at.
fn large_run_population() -> Vec<RunInput> {
    run_population(512, 4000, 200)
}

fn run_population(n_sites: u32, n_runs: u32, n_failing: u32) -> Vec<RunInput> {
    (0..n_runs)
        .map(|i| {
            // Failing runs hit a denser subset of low-numbered sites so
            // the ranking table has real signal to sort, not ties.
            let passed = i >= n_failing;
            let hit: Vec<u32> = if passed {
                (0..n_sites).step_by(3).map(|s| s % n_sites + 1).collect()
            } else {
                (0..n_sites).step_by(2).map(|s| s % n_sites + 1).collect()
            };
            RunInput {
                run: RunId(i),
                trace: parse_trace(&synthetic_trace(&hit)),
                passed,
            }
        })
        .collect()
}

fn site_of(sid: Sid) -> SiteNum {
    SiteNum(sid.0)
}

fn scenarios() -> [(&'static str, fn() -> Vec<RunInput>); 3] {
    [
        ("small_8sites_20runs", small_run_population),
        ("medium_64sites_400runs", medium_run_population),
        ("large_512sites_4000runs", large_run_population),
    ]
}

fn rows_from_graph(graph: &faultloc_core::exec_graph::ExecGraph) -> Vec<SiteCounts> {
    graph
        .nodes
        .iter()
        .map(|n| SiteCounts {
            site: n.site,
            predicate: format!("@reached({})", n.site),
            counts: ObservedCounts {
                true_in_failed: n.visits_failed.count(),
                true_in_passed: n.visits_passed.count(),
                site_failed: n.visits_failed.count(),
                site_passed: n.visits_passed.count(),
            },
            total_failed: graph.total_failed,
            total_passed: graph.total_passed,
        })
        .collect()
}

// KPI: graph-build latency for representative run populations.
fn bench_kpi_graph_build_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/graph_build_latency");

    for (name, make_runs) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &make_runs, |b, make_runs| {
            b.iter_batched(
                make_runs,
                |runs| {
                    let graph = build_graph(black_box(runs), site_of);
                    black_box(&graph);
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

// KPI: ranking latency given an already-built graph, the hot path a
// genetic-search loop actually pays on every localization refresh.
fn bench_kpi_rank_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/rank_latency");

    for (name, make_runs) in scenarios() {
        let graph = build_graph(make_runs(), site_of);
        let rows = rows_from_graph(&graph);
        group.bench_with_input(BenchmarkId::from_parameter(name), &rows, |b, rows| {
            b.iter(|| {
                let ranked = rank(black_box(rows));
                black_box(&ranked);
            });
        });
    }

    group.finish();
}

// KPI: end-to-end ingest-then-rank latency, combining both phases above.
fn bench_kpi_ingest_and_rank_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/ingest_and_rank_latency");

    for (name, make_runs) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &make_runs, |b, make_runs| {
            b.iter_batched(
                make_runs,
                |runs| {
                    let graph = build_graph(runs, site_of);
                    let rows = rows_from_graph(&graph);
                    let ranked = rank(&rows);
                    black_box(&ranked);
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_kpi_graph_build_latency,
    bench_kpi_rank_latency,
    bench_kpi_ingest_and_rank_latency,
);
criterion_main!(benches);
