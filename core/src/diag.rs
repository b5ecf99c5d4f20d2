// diag.rs — Unified diagnostics and error model (§7).
//
// `Diagnostic` carries the softer, builder-style notices subsystems attach
// to warnings (e.g. a skipped malformed trace record); `CoreError` carries
// the fatal kinds of §7 that unwind to a subsystem's top-level entry point.
// Recovery happens only at those boundaries — everything in between
// propagates with `?`, per §7's propagation policy.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;
use std::path::PathBuf;

use crate::ast::Loc;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g. `E0001`, `W0300`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related location ─────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedLoc {
    pub loc: Loc,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A non-fatal notice emitted by any subsystem (§7's "warning is surfaced"
/// kind of outcome — the offending record is skipped, counters unaffected).
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub loc: Option<Loc>,
    pub message: String,
    pub hint: Option<String>,
    pub related: Vec<RelatedLoc>,
}

impl Diagnostic {
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            loc: None,
            message: message.into(),
            hint: None,
            related: Vec::new(),
        }
    }

    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_loc(mut self, loc: Loc) -> Self {
        self.loc = Some(loc);
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_related(mut self, loc: Loc, label: impl Into<String>) -> Self {
        self.related.push(RelatedLoc {
            loc,
            label: label.into(),
        });
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{level}[{code}]: {}", self.message)?;
        } else {
            write!(f, "{level}: {}", self.message)?;
        }
        if let Some(loc) = &self.loc {
            write!(f, " ({}:{})", loc.file, loc.line)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {hint}")?;
        }
        Ok(())
    }
}

// ── Fatal errors (§7) ─────────────────────────────────────────────────────

/// The fatal error kinds named in §7. Each top-level subsystem entry point
/// (instrumenter, ingest pass, variant-test call) returns `Result<_, CoreError>`;
/// everything beneath it propagates with `?`.
#[derive(Debug)]
pub enum CoreError {
    /// Missing input file or unwritable artifact.
    Io { path: PathBuf, source: std::io::Error },
    /// A construct the visitor does not expect (e.g. a `for` with multiple
    /// definitions). Indicates a caller/frontend bug, not a data problem.
    AstShape(String),
    /// Mismatched version tag on a serialized binary artifact.
    VersionMismatch {
        artifact: &'static str,
        expected: String,
        found: String,
    },
    /// An unknown predicate kind was encountered while printing or
    /// evaluating. Indicates a missing engine case.
    UnknownPredicateKind(String),
    /// `sanity_check` failed and `--allow-sanity-fail` was not set.
    SanityViolation(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Io { path, source } => {
                write!(f, "I/O failure on {}: {source}", path.display())
            }
            CoreError::AstShape(msg) => write!(f, "AST-shape violation: {msg}"),
            CoreError::VersionMismatch {
                artifact,
                expected,
                found,
            } => write!(
                f,
                "version mismatch in {artifact}: expected {expected}, found {found}"
            ),
            CoreError::UnknownPredicateKind(kind) => {
                write!(f, "unknown predicate kind: {kind}")
            }
            CoreError::SanityViolation(msg) => write!(f, "sanity violation: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoreError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl CoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> Loc {
        Loc {
            file: "t.c".into(),
            line: 3,
            byte: 40,
        }
    }

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code_and_loc() {
        let d = Diagnostic::new(DiagLevel::Warning, "skipped malformed record")
            .with_code(DiagCode("W0001"))
            .with_loc(loc());
        assert_eq!(
            format!("{d}"),
            "warning[W0001]: skipped malformed record (t.c:3)"
        );
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::new(DiagLevel::Error, "bad site kind")
            .with_code(DiagCode("E0200"))
            .with_hint("check the predicate family")
            .with_related(loc(), "site declared here");
        assert_eq!(d.code, Some(DiagCode("E0200")));
        assert_eq!(d.hint.as_deref(), Some("check the predicate family"));
        assert_eq!(d.related.len(), 1);
    }

    #[test]
    fn core_error_display() {
        let e = CoreError::VersionMismatch {
            artifact: "test cache",
            expected: "2".into(),
            found: "1".into(),
        };
        assert_eq!(
            format!("{e}"),
            "version mismatch in test cache: expected 2, found 1"
        );
    }
}
