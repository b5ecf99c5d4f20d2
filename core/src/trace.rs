// trace.rs — Trace ingest (§4.3, §4.4).
//
// Parses the line-oriented `RunRecord` format a single instrumented run
// emits on its trace stream (§6's record format) into a sequence of
// `RunEvent`s, and renders the `Processed` textual summary of §4.3 used by
// the reference analyzer's debug output.
//
// Preconditions: `text` is the verbatim contents of one `.path` file.
// Postconditions: malformed lines are reported as `Diagnostic` warnings and
// skipped; well-formed lines appear in `RunEvent` order.
// Failure modes: none fatal — a wholly empty or garbage trace yields zero
// events plus diagnostics, never a `CoreError`.
// Side effects: none (pure parsing).

use std::fmt;

use crate::diag::{DiagLevel, Diagnostic};
use crate::id::Sid;

/// One line of a run's trace: either a state-transition header (`*...`) or
/// a site hit (`site_num,info_1,info_2,...`).
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// `*state` — the run entered a new named state.
    State(String),
    /// A site was reached, with its positional scalar payload.
    Site { sid: Sid, info: Vec<i64> },
}

/// The outcome of ingesting one run's trace file.
#[derive(Debug, Clone, Default)]
pub struct RunTrace {
    pub events: Vec<RunEvent>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse a trace file's contents into an ordered event list. Lines that
/// are neither a state header nor a well-formed site record are reported
/// as warnings and dropped — a single corrupt run must not abort ingest
/// of the rest of the corpus (§4.3).
pub fn parse_trace(text: &str) -> RunTrace {
    let mut out = RunTrace::default();
    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(state) = line.strip_prefix('*') {
            out.events.push(RunEvent::State(state.to_string()));
            continue;
        }
        match parse_site_line(line) {
            Some(ev) => out.events.push(ev),
            None => out.diagnostics.push(
                Diagnostic::new(
                    DiagLevel::Warning,
                    format!("malformed trace record at line {}: {line:?}", lineno + 1),
                )
                .with_hint("expected `site_num` or `site_num,info...`"),
            ),
        }
    }
    out
}

fn parse_site_line(line: &str) -> Option<RunEvent> {
    let mut fields = line.split(',');
    let sid_text = fields.next()?;
    let sid: u32 = sid_text.trim().parse().ok()?;
    let mut info = Vec::new();
    for f in fields {
        info.push(f.trim().parse::<i64>().ok()?);
    }
    Some(RunEvent::Site { sid: Sid(sid), info })
}

// ── Processed summary (§4.3 debug dump) ──────────────────────────────────

/// One scalar-pair comparison table entry: `(sid, constant) → times seen`.
#[derive(Debug, Clone, Default)]
pub struct Processed {
    pub scalar_pairs: Vec<(Sid, i64, u32)>,
    /// Bare site hits (no info payload), run-length collapsed: consecutive
    /// hits of the same site merge into one entry with an accumulated
    /// count, but the same site reappearing later — after some other site
    /// broke the run — is a new entry (§4.3: collapses only *consecutive*
    /// identical records, never a global aggregate).
    pub other_sites: Vec<(Sid, u32)>,
    /// Every consecutive site pair seen in this run, recorded once each
    /// regardless of how many times the pair repeats (§4.3 presence, not
    /// a count).
    pub transitions: Vec<(Sid, Sid)>,
}

/// Fold a run's events into the three tables §4.3 prints: scalar-pair
/// comparisons against the first info field, run-length-collapsed bare
/// site-hit counts, and the set of consecutive site-to-site transitions.
/// State headers (`*name`) are ignored here — the transition table tracks
/// site pairs, not state names (§4.3/§4.4).
pub fn summarize(trace: &RunTrace) -> Processed {
    use std::collections::{BTreeMap, BTreeSet};

    let mut scalar_pairs: BTreeMap<(Sid, i64), u32> = BTreeMap::new();
    let mut other_sites: Vec<(Sid, u32)> = Vec::new();
    let mut transitions: BTreeSet<(Sid, Sid)> = BTreeSet::new();
    let mut prev_site: Option<Sid> = None;
    let mut prev_was_bare: Option<Sid> = None;

    for ev in &trace.events {
        let RunEvent::Site { sid, info } = ev else { continue };

        if let Some(first) = info.first() {
            *scalar_pairs.entry((*sid, *first)).or_insert(0) += 1;
            prev_was_bare = None;
        } else {
            match (other_sites.last_mut(), prev_was_bare) {
                (Some((_, count)), Some(last)) if last == *sid => *count += 1,
                _ => other_sites.push((*sid, 1)),
            }
            prev_was_bare = Some(*sid);
        }

        if let Some(prev) = prev_site {
            transitions.insert((prev, *sid));
        }
        prev_site = Some(*sid);
    }

    Processed {
        scalar_pairs: scalar_pairs.into_iter().map(|((s, c), n)| (s, c, n)).collect(),
        other_sites,
        transitions: transitions.into_iter().collect(),
    }
}

impl fmt::Display for Processed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SCALAR PAIRS INFO:")?;
        for (sid, c, n) in &self.scalar_pairs {
            writeln!(f, "  {sid},{c}: {n}")?;
        }
        writeln!(f, "OTHER SITES INFO:")?;
        for (sid, n) in &self.other_sites {
            writeln!(f, "  {sid}: {n}")?;
        }
        writeln!(f, "TRANSITION TABLE:")?;
        for (a, b) in &self.transitions {
            writeln!(f, "  {a} -> {b}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_state_header_and_site_record() {
        let trace = parse_trace("*init\n3,7\n*running\n");
        assert_eq!(
            trace.events,
            vec![
                RunEvent::State("init".into()),
                RunEvent::Site { sid: Sid(3), info: vec![7] },
                RunEvent::State("running".into()),
            ]
        );
        assert!(trace.diagnostics.is_empty());
    }

    #[test]
    fn bare_site_hit_has_no_info() {
        let trace = parse_trace("5\n");
        assert_eq!(trace.events, vec![RunEvent::Site { sid: Sid(5), info: vec![] }]);
    }

    #[test]
    fn malformed_line_is_reported_and_skipped() {
        let trace = parse_trace("not,a,number\n3,7\n");
        assert_eq!(trace.events.len(), 1);
        assert_eq!(trace.diagnostics.len(), 1);
        assert_eq!(trace.diagnostics[0].level, DiagLevel::Warning);
    }

    #[test]
    fn summary_counts_scalar_pairs_and_site_transitions() {
        let trace = parse_trace("1,10\n1,10\n2\n3\n1,10\n");
        let p = summarize(&trace);
        assert_eq!(p.scalar_pairs, vec![(Sid(1), 10, 3)]);
        assert_eq!(p.other_sites, vec![(Sid(2), 1), (Sid(3), 1)]);
        assert_eq!(
            p.transitions,
            vec![(Sid(1), Sid(1)), (Sid(1), Sid(2)), (Sid(2), Sid(3)), (Sid(3), Sid(1))]
        );
    }

    #[test]
    fn other_sites_collapses_only_consecutive_repeats() {
        let trace = parse_trace("4\n4\n1,1\n4\n");
        let p = summarize(&trace);
        // Two consecutive `4`s collapse into one entry, but the later
        // lone `4` — separated by an unrelated site — is a new entry.
        assert_eq!(p.other_sites, vec![(Sid(4), 2), (Sid(4), 1)]);
    }

    #[test]
    fn transitions_are_recorded_once_per_run_even_if_repeated() {
        let trace = parse_trace("1\n2\n1\n2\n");
        let p = summarize(&trace);
        assert_eq!(p.transitions, vec![(Sid(1), Sid(2)), (Sid(2), Sid(1))]);
    }

    #[test]
    fn display_matches_section_headers() {
        let trace = parse_trace("1,4\n");
        let text = summarize(&trace).to_string();
        assert!(text.contains("SCALAR PAIRS INFO:"));
        assert!(text.contains("OTHER SITES INFO:"));
        assert!(text.contains("TRANSITION TABLE:"));
    }
}
