// predicate.rs — Dynamic-predicate fault-localization engine (§6).
//
// A `Predicate` is anything that can be evaluated at a site and reduced to
// the four CBI observation counts it needs: how many failing/passing runs
// observed it true at least once, and how many failing/passing runs
// observed the site at all. `rank` turns a graph's nodes plus a predicate
// set into the CBI statistical ranking of §6.2.
//
// Preconditions: `graph` was built by `exec_graph::build_graph` (or
// equivalent) over the same run population the `failed`/`passed` totals
// describe.
// Postconditions: `rank` returns one `RankingRecord` per predicate,
// sorted by descending `importance` then ascending `site` then ascending
// predicate text, ties broken deterministically (§6.2).
// Failure modes: `CoreError::UnknownPredicateKind` if a predicate's kind
// tag is not recognized while printing.
// Side effects: none.

use std::cmp::Ordering;
use std::fmt;

use crate::diag::CoreError;
use crate::exec_graph::{ExecGraph, NodeId, RunSet};
use crate::id::SiteNum;
use crate::predicate_lang::parse_predicate_expr;

/// The two sentinel "predicates" every site always carries (§6.1): whether
/// the site was reached at all, distinguished by run outcome. They give
/// the importance formula its baseline `P(failure)` even at sites with no
/// attached boolean predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    RunFailed,
    RunSucceeded,
}

/// A capability set any concrete predicate kind must provide: given a
/// node's visit counts, how many of the visiting runs made the predicate
/// true. The CBI counts (§6.2) are derived entirely from this.
pub trait Predicate: fmt::Display {
    /// Stable text form used for sorting/dedup and as the ranking key.
    fn text(&self) -> String;

    /// Runs, among those that visited `node`, for which this predicate
    /// evaluated true. `site_runs_failed`/`site_runs_passed` give the
    /// denominators (every run that reached the site, true or not).
    fn observed(&self, node: &NodeKind) -> ObservedCounts;
}

/// Either a sentinel predicate or a parsed boolean C expression, the two
/// kinds named in §6.1.
pub enum NodeKind {
    Sentinel(Sentinel),
    CExpr,
}

/// The four counts the importance formula of §6.2 needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservedCounts {
    /// Failing runs that observed the predicate true at least once.
    pub true_in_failed: u32,
    /// Passing runs that observed the predicate true at least once.
    pub true_in_passed: u32,
    /// Failing runs that reached the site at all.
    pub site_failed: u32,
    /// Passing runs that reached the site at all.
    pub site_passed: u32,
}

/// A predicate built from a parsed C boolean expression, evaluated
/// per-run by a caller-supplied closure (the real evaluator needs the
/// run's recorded scalar values, which this crate does not itself own —
/// §1 scopes full C-expression evaluation to the external frontend/runtime;
/// this type only carries the parsed form plus the per-run true/false
/// outcome the caller already computed).
pub struct CExprPredicate {
    expr_text: String,
    /// `(failing_true, passing_true)` supplied by the caller after
    /// evaluating `expr` against each run's recorded scalars.
    true_in_failed: u32,
    true_in_passed: u32,
}

impl CExprPredicate {
    pub fn new(source: &str, true_in_failed: u32, true_in_passed: u32) -> Result<Self, CoreError> {
        let _expr = parse_predicate_expr(source)?;
        Ok(Self {
            expr_text: source.to_string(),
            true_in_failed,
            true_in_passed,
        })
    }
}

impl fmt::Display for CExprPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr_text)
    }
}

impl Predicate for CExprPredicate {
    fn text(&self) -> String {
        self.expr_text.clone()
    }

    fn observed(&self, _node: &NodeKind) -> ObservedCounts {
        ObservedCounts {
            true_in_failed: self.true_in_failed,
            true_in_passed: self.true_in_passed,
            site_failed: 0,
            site_passed: 0,
        }
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sentinel::RunFailed => write!(f, "@RunFailed"),
            Sentinel::RunSucceeded => write!(f, "@RunSucceeded"),
        }
    }
}

// ── Ranking (§6.2) ────────────────────────────────────────────────────────

/// One row of the ranking table: a site, a predicate's text, and its
/// computed CBI statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingRecord {
    pub site: SiteNum,
    pub predicate: String,
    pub failure_p: f64,
    pub context: f64,
    pub increase: f64,
    pub importance: f64,
}

/// `log(x+1)` convention of §6.2: `log(0+1) := 0` falls out naturally since
/// `ln(1) == 0`, stated explicitly here because the formula text calls it
/// out as a special case.
fn log1p_count(n: u32) -> f64 {
    ((n as f64) + 1.0).ln()
}

/// `a/b := 0` when `b == 0`, the other explicit convention of §6.2.
fn safe_ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// One site's worth of counts feeding the formulas below.
pub struct SiteCounts {
    pub site: SiteNum,
    pub predicate: String,
    pub counts: ObservedCounts,
    pub total_failed: u32,
    pub total_passed: u32,
}

/// `failure(P) = P(failed | P true)`: among runs where the predicate was
/// observed true, the fraction that failed.
fn failure_p(c: &ObservedCounts) -> f64 {
    safe_ratio(c.true_in_failed as f64, (c.true_in_failed + c.true_in_passed) as f64)
}

/// `context(P) = P(failed | site reached)`: among runs that reached the
/// site at all, the fraction that failed — the baseline to compare
/// against. Strictly the site's own counts: `0/0 := 0`, never falling
/// back to the run population's global totals (§6.2 — a site nobody ever
/// reached has no baseline, not the corpus-wide one).
fn context(c: &ObservedCounts) -> f64 {
    safe_ratio(c.site_failed as f64, (c.site_failed + c.site_passed) as f64)
}

/// `increase(P) = failure(P) - context(P)`, clamped to `[0, 1]`: how much
/// observing `P` true raises the failure probability above baseline.
fn increase(failure: f64, ctx: f64) -> f64 {
    (failure - ctx).max(0.0)
}

/// `importance(P)`, the harmonic mean of `increase(P)` and
/// `log(|true_in_failed|+1) * log(F+1)` (§6.2, `F` = total failing runs):
/// a predicate needs both a real lift over baseline *and* enough failing
/// evidence to be trusted — the harmonic mean punishes either component
/// being weak far more than a product would. If either component is
/// non-positive, `importance := 0`.
fn importance(inc: f64, c: &ObservedCounts, total_failed: u32) -> f64 {
    let a = inc;
    let b = log1p_count(c.true_in_failed) * log1p_count(total_failed);
    if a <= 0.0 || b <= 0.0 {
        0.0
    } else {
        2.0 / (1.0 / a + 1.0 / b)
    }
}

/// Compute the ranking table for a batch of predicate observations,
/// sorted by descending importance, then ascending site, then ascending
/// predicate text (§6.2 tie-break).
pub fn rank(rows: &[SiteCounts]) -> Vec<RankingRecord> {
    let mut out: Vec<RankingRecord> = rows
        .iter()
        .map(|r| {
            let f = failure_p(&r.counts);
            let ctx = context(&r.counts);
            let inc = increase(f, ctx);
            let imp = importance(inc, &r.counts, r.total_failed);
            RankingRecord {
                site: r.site,
                predicate: r.predicate.clone(),
                failure_p: f,
                context: ctx,
                increase: inc,
                importance: imp,
            }
        })
        .collect();

    out.sort_by(|a, b| {
        b.importance
            .partial_cmp(&a.importance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.site.0.cmp(&b.site.0))
            .then_with(|| a.predicate.cmp(&b.predicate))
    });
    out
}

/// Derive one `SiteCounts` row per graph node, using the reachability
/// sentinel (§6.1): a node's own failed/passed visit sets serve as both
/// the "predicate true" and "site reached" counts, since reaching the
/// node *is* the predicate. This is what turns a built `ExecGraph` into
/// `rank`'s input.
pub fn site_counts_from_graph(graph: &ExecGraph) -> Vec<SiteCounts> {
    (0..graph.nodes.len())
        .map(|i| site_counts_for_node(graph, NodeId(i as u32)))
        .collect()
}

/// `site_counts_from_graph`, narrowed to a single node by id.
pub fn site_counts_for_node(graph: &ExecGraph, node: NodeId) -> SiteCounts {
    let n = &graph.nodes[node.0 as usize];
    SiteCounts {
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
    }
}

/// Propagate a "predicate true" mark through the execution graph and
/// return a re-ranked graph, per §6.3: mark every node at the top
/// predictor's site, then treat "this run observed `P` true" as if it
/// were a failure when re-deriving each node's failed/passed visit sets.
/// Monotone: a run already counted as failed stays failed; a passing run
/// is reclassified as failed only if it visited the top predictor's site,
/// never the reverse. `propagate` never mutates `graph` in place — it
/// returns a new one, leaving the caller free to re-rank it with
/// `site_counts_from_graph` to get a secondary ranking.
pub fn propagate(graph: &ExecGraph, top: &RankingRecord) -> ExecGraph {
    let mut p_true = RunSet::default();
    for n in &graph.nodes {
        if n.site == top.site {
            for r in n.visits_failed.iter() {
                p_true.insert(r);
            }
            for r in n.visits_passed.iter() {
                p_true.insert(r);
            }
        }
    }

    let mut reclassified = RunSet::default();
    let mut out = graph.clone();
    for n in &mut out.nodes {
        let originally_passed = n.visits_passed.clone();
        for r in originally_passed.iter() {
            if p_true.contains(r) {
                n.visits_failed.insert(r);
                reclassified.insert(r);
            }
        }
        if reclassified.count() > 0 {
            let mut remaining = RunSet::default();
            for r in originally_passed.iter() {
                if !p_true.contains(r) {
                    remaining.insert(r);
                }
            }
            n.visits_passed = remaining;
        }
    }

    out.total_failed = graph.total_failed + reclassified.count();
    out.total_passed = graph.total_passed.saturating_sub(reclassified.count());
    out
}

/// Render a ranking table in the plain textual form the reference analyzer
/// prints its debug dumps in.
pub fn format_ranking(rows: &[RankingRecord]) -> String {
    let mut out = String::new();
    for r in rows {
        out.push_str(&format!(
            "{} :: {} importance={:.4} increase={:.4} failure={:.4} context={:.4}\n",
            r.site, r.predicate, r.importance, r.increase, r.failure_p, r.context
        ));
    }
    out
}

#[allow(dead_code)]
fn describe_kind(kind: &str) -> Result<&'static str, CoreError> {
    match kind {
        "sentinel" => Ok("sentinel"),
        "cexpr" => Ok("cexpr"),
        other => Err(CoreError::UnknownPredicateKind(other.to_string())),
    }
}
