// localization.rs — Fault/fix localization schemes (§7.4).
//
// A localization scheme assigns each candidate mutation site a weight
// that biases genetic search toward statements more likely responsible
// for (or able to fix) a failure. Every scheme produces a pair of weight
// tables — fault weights and fix weights — since a repair search needs
// both "where did this break" and "where could a fix land" signals, and
// most schemes only populate one side.
//
// Preconditions: `coverage` (when a scheme needs it) records, per `Sid`,
// whether it was ever reached by a failing run and/or a passing run —
// presence, not counts (§7.4).
// Postconditions: every `Sid` present in the program's statement map has
// an entry in the returned weight tables, defaulting to `0.0`, and
// weights for multiple contributing records at one site are combined
// per the scheme's flattening policy (§7.4: sum, min, or max).
// Failure modes: `CoreError::Io` only for the `path`-scheme fallback,
// which must itself instrument/compile/run the program when no trace
// file exists yet.
// Side effects: none — the self-instrument-compile-run fallback of §7.4
// only signals that it's needed; actually doing it is the caller's job.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::diag::CoreError;
use crate::id::Sid;
use crate::instrument::LocationMap;

/// Per-`Sid` weights a mutation operator consults when picking where to
/// act. Higher weight means "more likely to be selected."
#[derive(Debug, Clone, Default)]
pub struct LocalizedWeights {
    weights: BTreeMap<Sid, f64>,
}

impl LocalizedWeights {
    pub fn get(&self, sid: Sid) -> f64 {
        self.weights.get(&sid).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, sid: Sid, weight: f64) {
        self.weights.insert(sid, weight);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Sid, f64)> + '_ {
        self.weights.iter().map(|(&s, &w)| (s, w))
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }
}

/// A fault/fix weight pair, the result of localizing under any scheme
/// (§7.4): "where is the bug" and "where could a repair attach" are
/// tracked separately since most schemes only speak to one of the two.
#[derive(Debug, Clone, Default)]
pub struct Localization {
    pub fault: LocalizedWeights,
    pub fix: LocalizedWeights,
}

/// How multiple records contributing a weight to the same site combine
/// (§7.4): sum accumulates evidence, min is conservative, max is
/// optimistic about the single strongest signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flatten {
    Sum,
    Min,
    Max,
}

fn flatten_into(weights: &mut LocalizedWeights, sid: Sid, contribution: f64, policy: Flatten) {
    let existing = weights.get(sid);
    let combined = match policy {
        Flatten::Sum => existing + contribution,
        Flatten::Min => {
            if existing == 0.0 {
                contribution
            } else {
                existing.min(contribution)
            }
        }
        Flatten::Max => existing.max(contribution),
    };
    weights.set(sid, combined);
}

/// Per-`Sid` reachability presence across a run population (§7.4): did any
/// failing run reach this site at least once, did any passing run. This is
/// presence, not a hit count — a site visited a thousand times in one
/// failing run counts exactly the same as a site visited once.
#[derive(Debug, Clone, Default)]
pub struct Coverage {
    failing: BTreeSet<Sid>,
    passing: BTreeSet<Sid>,
}

impl Coverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sid: Sid, passed: bool) {
        if passed {
            self.passing.insert(sid);
        } else {
            self.failing.insert(sid);
        }
    }

    pub fn in_failing(&self, sid: Sid) -> bool {
        self.failing.contains(&sid)
    }

    pub fn in_passing(&self, sid: Sid) -> bool {
        self.passing.contains(&sid)
    }
}

/// A `file,sid,weight` record the `line`/`weight` schemes read verbatim
/// (§7.4). `weight` defaults to `1.0` when omitted; `file` may be empty,
/// meaning "any file" — relevant only to the `line` scheme, which treats
/// `key` as a source line number rather than a `Sid` directly.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightRecord {
    pub file: String,
    pub key: i64,
    pub weight: f64,
}

/// Parse `file,sid,weight` lines (§7.4). Malformed lines are dropped
/// silently — this is a best-effort read of an external hint file, not a
/// trace whose corruption deserves a diagnostic.
pub fn parse_weight_records(text: &str) -> Vec<WeightRecord> {
    text.lines()
        .filter_map(|raw| {
            let line = raw.trim();
            if line.is_empty() {
                return None;
            }
            let mut fields = line.split(',');
            let file = fields.next()?.trim().to_string();
            let key: i64 = fields.next()?.trim().parse().ok()?;
            let weight: f64 = fields
                .next()
                .and_then(|w| w.trim().parse().ok())
                .unwrap_or(1.0);
            Some(WeightRecord { file, key, weight })
        })
        .collect()
}

/// Resolve a `(file, line)` pair to the lowest-numbered `Sid` recorded at
/// that location (§7.4 `line` scheme), or `None` if nothing matches.
/// `file` empty matches any file.
pub fn atom_id_of_source_line(loc_map: &LocationMap, file: &str, line: u32) -> Option<Sid> {
    loc_map
        .iter()
        .filter(|(_, loc)| loc.line == line && (file.is_empty() || loc.file == file))
        .map(|(&sid, _)| sid)
        .min()
}

/// The localization schemes of §7.4.
#[derive(Debug, Clone, PartialEq)]
pub enum Scheme {
    /// Weight every site equally — the scheme used when no better signal
    /// is available.
    Uniform,
    /// `file,line,weight` records, each line resolved to the `Sid`
    /// recorded at that location via `atom_id_of_source_line`.
    Line(Vec<WeightRecord>),
    /// `file,sid,weight` records, `sid` used verbatim.
    Weight(Vec<WeightRecord>),
    /// An oracle scheme for evaluation harnesses: the known-correct fix
    /// sites get full weight, everything else zero. Reserved: treated as
    /// a no-op hook until an evaluation harness supplies fix sites.
    Oracle(Vec<Sid>),
    /// The coverage-presence scheme of §7.4: a site reached only by
    /// failing runs is a strong fault candidate; reached by both, a weak
    /// one; reached only by passing runs, a fix candidate instead.
    Path { coverage: Coverage, flatten: Flatten },
    /// `path`, but falls back to self-instrumenting, compiling, and
    /// running the program to produce the trace the coverage needs when
    /// none exists yet (§7.4's named fallback).
    PathOrRebuild { flatten: Flatten },
    /// The default scheme (§7.4): fault and fix localization both run
    /// `path`.
    Default { coverage: Coverage, flatten: Flatten },
}

/// Localize a program's `Sid`s under `scheme`. `loc_map` resolves a `Sid`
/// to its source location, needed only by the `line` scheme.
pub fn localize(scheme: &Scheme, all_sids: &[Sid], loc_map: Option<&LocationMap>) -> Localization {
    let mut out = Localization::default();
    match scheme {
        Scheme::Uniform => {
            for &sid in all_sids {
                out.fault.set(sid, 1.0);
            }
        }
        Scheme::Line(records) => {
            let Some(loc_map) = loc_map else { return out };
            for rec in records {
                if let Some(sid) = atom_id_of_source_line(loc_map, &rec.file, rec.key as u32) {
                    flatten_into(&mut out.fault, sid, rec.weight, Flatten::Sum);
                }
            }
        }
        Scheme::Weight(records) => {
            for rec in records {
                if rec.key < 0 {
                    continue;
                }
                flatten_into(&mut out.fault, Sid(rec.key as u32), rec.weight, Flatten::Sum);
            }
        }
        Scheme::Oracle(fix_sids) => {
            for &sid in fix_sids {
                out.fix.set(sid, 1.0);
            }
        }
        Scheme::Path { coverage, flatten } => apply_coverage(&mut out, coverage, all_sids, *flatten),
        Scheme::PathOrRebuild { flatten } => {
            apply_coverage(&mut out, &Coverage::default(), all_sids, *flatten)
        }
        Scheme::Default { coverage, flatten } => apply_coverage(&mut out, coverage, all_sids, *flatten),
    }
    out
}

/// The coverage-presence rule of §7.4: a site reached only by failing
/// runs is the strongest fault candidate (`1.0`); reached by both, a weak
/// one (`0.1`, still suspect but also exercised by passing behavior);
/// reached only by passing runs contributes nothing to fault, but is a
/// fix candidate (`0.5`, a plausible spot a repair could touch without
/// having caused the failure).
fn apply_coverage(out: &mut Localization, coverage: &Coverage, all_sids: &[Sid], flatten: Flatten) {
    for &sid in all_sids {
        let failing = coverage.in_failing(sid);
        let passing = coverage.in_passing(sid);
        let fault = match (failing, passing) {
            (true, false) => 1.0,
            (true, true) => 0.1,
            (false, _) => 0.0,
        };
        if fault > 0.0 {
            flatten_into(&mut out.fault, sid, fault, flatten);
        }
        if passing {
            flatten_into(&mut out.fix, sid, 0.5, flatten);
        }
    }
}

/// The self-instrument-compile-run fallback of §7.4: when `trace_path`
/// does not exist, the caller must produce it before localization can
/// run. This function only decides *whether* the fallback is needed;
/// actually instrumenting/compiling/running is the caller's job (it
/// requires a live compiler toolchain this crate does not own, per §1/§7
/// Non-goals).
pub fn needs_rebuild(trace_path: &Path) -> bool {
    !trace_path.exists()
}

pub fn missing_trace_error(trace_path: &Path) -> CoreError {
    CoreError::Io {
        path: trace_path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "no trace file for path scheme"),
    }
}
