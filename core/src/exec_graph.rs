// exec_graph.rs — Dynamic execution graph (§5).
//
// Aggregates many runs' `RunTrace`s into a single graph over
// `(SiteNum, state)` nodes, with per-run outcome bitsets on both nodes and
// edges. This is the structure the predicate engine (§6) ranks over.
//
// Preconditions: each ingested run carries a `RunId` unique within the
// graph and a known outcome (failed/passed).
// Postconditions: node and edge counts are monotonically non-decreasing as
// runs are added; a given `(site, state)` pair always maps to the same
// `NodeId` once first seen (§5 "identity is stable across ingestion order"
// only within a single build — see `build_graph`, which sorts runs first
// to make the whole graph deterministic).
// Failure modes: none — a run with zero events simply contributes nothing.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use crate::id::{RunId, SiteNum};
use crate::trace::{RunEvent, RunTrace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

/// A compact membership set over the runs ingested into one graph, indexed
/// by `RunId`. Dense and small: run counts are in the hundreds-to-low-thousands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSet {
    bits: Vec<u64>,
}

impl RunSet {
    fn word_index(run: RunId) -> (usize, u32) {
        ((run.0 / 64) as usize, run.0 % 64)
    }

    pub fn insert(&mut self, run: RunId) {
        let (word, bit) = Self::word_index(run);
        if self.bits.len() <= word {
            self.bits.resize(word + 1, 0);
        }
        self.bits[word] |= 1u64 << bit;
    }

    pub fn contains(&self, run: RunId) -> bool {
        let (word, bit) = Self::word_index(run);
        self.bits.get(word).is_some_and(|w| w & (1u64 << bit) != 0)
    }

    pub fn count(&self) -> u32 {
        self.bits.iter().map(|w| w.count_ones()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = RunId> + '_ {
        self.bits.iter().enumerate().flat_map(|(word, &w)| {
            (0..64).filter_map(move |bit| {
                (w & (1u64 << bit) != 0).then_some(RunId((word as u32) * 64 + bit))
            })
        })
    }

    pub fn intersection_count(&self, other: &RunSet) -> u32 {
        self.bits
            .iter()
            .zip(other.bits.iter())
            .map(|(a, b)| (a & b).count_ones())
            .sum()
    }
}

/// A node: one `(site, info-vector)` pair, with separate failed/passed
/// visit sets so the predicate engine can read `|failed|`/`|passed|`
/// directly off the graph (§6.1). The info-vector is the scalar payload
/// recorded with the site visit (`RunEvent::Site { info, .. }`), not a
/// named state-header — a run may reach the same site with different
/// recorded scalars, which is why nodes key on `(site, info)` rather than
/// `site` alone (§5).
#[derive(Debug, Clone)]
pub struct StateNode {
    pub site: SiteNum,
    pub state: Vec<i64>,
    pub visits_failed: RunSet,
    pub visits_passed: RunSet,
}

impl StateNode {
    pub fn total_visits(&self) -> u32 {
        self.visits_failed.count() + self.visits_passed.count()
    }
}

/// A directed edge between two nodes, annotated with the runs that took it.
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub runs_failed: RunSet,
    pub runs_passed: RunSet,
}

/// The aggregated execution graph (§5).
#[derive(Debug, Clone, Default)]
pub struct ExecGraph {
    pub nodes: Vec<StateNode>,
    pub edges: Vec<Edge>,
    node_index: BTreeMap<(SiteNum, Vec<i64>), NodeId>,
    edge_index: BTreeMap<(NodeId, NodeId), usize>,
    pub total_failed: u32,
    pub total_passed: u32,
}

impl ExecGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn node_id(&mut self, site: SiteNum, info: &[i64]) -> NodeId {
        let key = (site, info.to_vec());
        if let Some(&id) = self.node_index.get(&key) {
            return id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(StateNode {
            site,
            state: info.to_vec(),
            visits_failed: RunSet::default(),
            visits_passed: RunSet::default(),
        });
        self.node_index.insert(key, id);
        id
    }

    fn edge_mut(&mut self, from: NodeId, to: NodeId) -> &mut Edge {
        let key = (from, to);
        if let Some(&idx) = self.edge_index.get(&key) {
            return &mut self.edges[idx];
        }
        let idx = self.edges.len();
        self.edges.push(Edge {
            from,
            to,
            runs_failed: RunSet::default(),
            runs_passed: RunSet::default(),
        });
        self.edge_index.insert(key, idx);
        &mut self.edges[idx]
    }

    /// Fold one run's trace into the graph. `site_of` resolves a `Sid` hit
    /// in the trace to the `SiteNum` it instruments — a run may visit the
    /// same site from different control-flow states, which is why nodes
    /// key on `(site, state)` rather than `site` alone (§5).
    pub fn ingest_run(
        &mut self,
        run: RunId,
        trace: &RunTrace,
        passed: bool,
        site_of: impl Fn(crate::id::Sid) -> SiteNum,
    ) {
        let mut prev_node: Option<NodeId> = None;

        for ev in &trace.events {
            match ev {
                RunEvent::State(_) => {}
                RunEvent::Site { sid, info } => {
                    let site = site_of(*sid);
                    let node = self.node_id(site, info);
                    {
                        let n = &mut self.nodes[node.0 as usize];
                        if passed {
                            n.visits_passed.insert(run);
                        } else {
                            n.visits_failed.insert(run);
                        }
                    }
                    if let Some(prev) = prev_node {
                        let e = self.edge_mut(prev, node);
                        if passed {
                            e.runs_passed.insert(run);
                        } else {
                            e.runs_failed.insert(run);
                        }
                    }
                    prev_node = Some(node);
                }
            }
        }

        if passed {
            self.total_passed += 1;
        } else {
            self.total_failed += 1;
        }
    }
}

/// One ingested run.
pub struct RunInput {
    pub run: RunId,
    pub trace: RunTrace,
    pub passed: bool,
}

/// Build a graph from a batch of runs, sorted by `RunId` first so the
/// resulting node/edge allocation order — and therefore every `NodeId` — is
/// independent of the order runs were collected in (§5 determinism).
pub fn build_graph(
    mut runs: Vec<RunInput>,
    site_of: impl Fn(crate::id::Sid) -> SiteNum,
) -> ExecGraph {
    runs.sort_by_key(|r| r.run);
    let mut graph = ExecGraph::new();
    for r in runs {
        graph.ingest_run(r.run, &r.trace, r.passed, &site_of);
    }
    graph
}

impl fmt::Display for ExecGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "NODES:")?;
        for (i, n) in self.nodes.iter().enumerate() {
            writeln!(
                f,
                "  [{i}] site={} state={} failed={} passed={}",
                n.site,
                format_state(&n.state),
                n.visits_failed.count(),
                n.visits_passed.count()
            )?;
        }
        writeln!(f, "EDGES:")?;
        for e in &self.edges {
            writeln!(
                f,
                "  {} -> {} failed={} passed={}",
                e.from.0,
                e.to.0,
                e.runs_failed.count(),
                e.runs_passed.count()
            )?;
        }
        Ok(())
    }
}

/// A narrower debug dump matching the reference analyzer's fault-
/// localization trace output: one line per node giving its visit counts
/// only, omitting edges.
pub fn print_fault_localization(graph: &ExecGraph) -> String {
    let mut out = String::new();
    for (i, n) in graph.nodes.iter().enumerate() {
        out.push_str(&format!(
            "[{i}] {}/{}: F={} S={}\n",
            n.site,
            format_state(&n.state),
            n.visits_failed.count(),
            n.visits_passed.count()
        ));
    }
    out
}

/// Render an info-vector as the reference analyzer's debug dumps do: a
/// comma-joined scalar list, `-` when a node carries no payload at all.
fn format_state(state: &[i64]) -> String {
    if state.is_empty() {
        "-".to_string()
    } else {
        state.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",")
    }
}
