// variant.rs — Variant representation for genetic-search candidates (§7).
//
// `ProgramVariant` is the concrete type genetic search mutates, tests, and
// ranks. It composes two mixins by holding them as fields rather than by
// inheritance (§9 Design Notes: "composition over inheritance translates
// directly — Rust has no base classes to reach for"): `CompileCache` gives
// it cached test outcomes; `FaultLocalization` gives it mutation-site
// weights. Both are named traits so a caller can write code generic over
// "anything with a compile cache" without naming `ProgramVariant`.
//
// Preconditions: constructed from a `Program` whose statements have
// already been numbered (§4.2) so a `Codebank` and `StatementMap` exist.
// Postconditions: every mutation returns a *new* `ProgramVariant` — the
// receiver is left untouched, matching ownership-based "identity-based
// rebuild" (see `visitor.rs`'s module doc and DESIGN.md).
// Failure modes: `CoreError::SanityViolation` from `sanity_check` when
// `--allow-sanity-fail` is not set; `CoreError::VersionMismatch` from
// `load_binary` on an incompatible artifact.
// Side effects: `save_binary`/`load_binary` touch disk.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::ast::{JsonCFrontend, Program, StmtKind};
use crate::ast::CFrontend as _;
use crate::cache::{CachedOutcome, Digest, Lookup, TestCache};
use crate::codebank::Codebank;
use crate::diag::CoreError;
use crate::id::Sid;
use crate::instrument::{LocationMap, StatementMap};
use crate::localization::{self, LocalizedWeights, Localization, Scheme};

/// On-disk format version for `save_binary`/`load_binary` (§7.5).
pub const VARIANT_VERSION: &str = "2";

/// The port range genetic-search workers rotate through when a variant
/// under test needs a listening socket of its own, avoiding collisions
/// between concurrently tested variants (§7.6).
pub const PORT_RANGE_START: u16 = 808;
pub const PORT_RANGE_END: u16 = 1600;

/// A stateful wrapping counter over `[PORT_RANGE_START, PORT_RANGE_END)`
/// (§7.6): each call hands out the next port in sequence and wraps back
/// to the start once the range is exhausted, so two variants tested back
/// to back never collide on the same listening socket, but a worker that
/// outlives the range size simply starts reusing ports — callers testing
/// more variants concurrently than the range holds are responsible for
/// waiting out in-flight users of a reissued port.
pub struct PortAllocator {
    next: u16,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self { next: PORT_RANGE_START }
    }

    pub fn next_port(&mut self) -> u16 {
        let port = self.next;
        self.next = if self.next + 1 >= PORT_RANGE_END {
            PORT_RANGE_START
        } else {
            self.next + 1
        };
        port
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// One atomic mutation a `Variant` can apply (§7.2).
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Delete the statement at `target`.
    Delete { target: Sid },
    /// Insert the atom at `donor` immediately after `target`.
    Append { target: Sid, donor: Sid },
    /// Swap the bodies of two statements.
    Swap { a: Sid, b: Sid },
    /// Replace a sub-expression inside `target`'s body with an atom drawn
    /// from `donor`'s body, when shapes are compatible. Falls back to a
    /// whole-statement replace when `donor`'s body is not an expression
    /// the target's kind can host.
    ReplaceSubatom { target: Sid, donor: Sid },
}

/// Capability set for "a thing genetic search can test and mutate." Kept
/// as a trait (rather than inherent methods only on `ProgramVariant`) so
/// harness code can be generic over it, matching the teacher's own
/// preference for small trait seams over one monolithic struct.
pub trait Variant {
    fn digest(&self) -> Digest;
    fn program(&self) -> &Program;
    fn apply(&self, mutation: Mutation) -> Result<Self, CoreError>
    where
        Self: Sized;
    fn sanity_check(&self, allow_fail: bool) -> Result<(), CoreError>;
    /// A structural duplicate sharing no mutable state with `self` — a
    /// fresh cache-slot lineage, not an alias (§7.6).
    fn copy(&self) -> Self
    where
        Self: Sized;
    /// The count of atoms available to mutation operators, 1-indexed
    /// inclusive (§7.2) — `Codebank::len`.
    fn max_atom(&self) -> usize;
    /// Load the underlying program from `path` (§7.6).
    fn from_source(path: &Path, statement_map: StatementMap, weights: LocalizedWeights) -> Result<Self, CoreError>
    where
        Self: Sized;
    /// Store the underlying program to `path` (§7.6).
    fn output_source(&self, path: &Path) -> Result<(), CoreError>;
}

/// Mixin: anything backed by a persistent compile/test cache.
pub trait CompileCache {
    fn lookup_test(&self, cache: &mut TestCache, test: &str) -> Lookup;
    fn record_test(&self, cache: &mut TestCache, test: &str, outcome: CachedOutcome);
}

/// Mixin: anything carrying per-statement fault/fix localization weights.
pub trait FaultLocalization {
    fn weight(&self, sid: Sid) -> f64;
    fn weights(&self) -> &LocalizedWeights;
    /// Run `scheme` over this variant's statement map and cache the
    /// resulting fault/fix weights (§7.4).
    fn compute_localization(&mut self, scheme: &Scheme);
    fn get_fault_localization(&self) -> &LocalizedWeights;
    fn get_fix_localization(&self) -> &LocalizedWeights;
}

/// Compile/test command templates and the placeholders of §7.6: a caller
/// supplies one compile command and one test command, each with
/// `__PLACEHOLDER__`-style slots this module fills in before invoking a
/// shell, mirroring how the reference compiler driver shells out to an
/// external toolchain rather than linking against one.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub compiler_name: String,
    pub compiler_options: String,
    pub compile_command: String,
    pub test_script: String,
    pub test_command: String,
    pub work_dir: PathBuf,
}

fn substitute(template: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in pairs {
        out = out.replace(key, value);
    }
    out
}

/// Parse a fitness file's contents: comma- or whitespace-separated floats
/// (§7.6). An unparseable or empty file yields an empty vector, which the
/// caller falls back from — only a *missing* file gets the `[1.0]`/`[0.0]`
/// pass/fail default.
fn parse_fitness_file(text: &str) -> Vec<f64> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f64>().ok())
        .collect()
}

/// A variant's compiled-artifact cache slot (§7.6): nothing attempted
/// yet, a failed build, or a successful one with its executable's path.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileResult {
    NotCompiled,
    Failed,
    Succeeded(PathBuf),
}

/// A content-addressed AST-plus-metadata bundle for serialization (§7.5).
#[derive(Debug, Serialize, Deserialize)]
struct VariantArtifact {
    version: String,
    program: Program,
    lineage: Vec<String>,
}

/// A candidate program under genetic search.
pub struct ProgramVariant {
    program: Program,
    statement_map: StatementMap,
    codebank: Codebank,
    weights: LocalizedWeights,
    fix_weights: LocalizedWeights,
    loc_map: Option<LocationMap>,
    /// Human-readable mutation history, oldest first — used for the
    /// `.log`-style provenance trail and for `sanity_check`'s "did this
    /// variant actually change anything" diagnostic.
    lineage: Vec<String>,
    /// `(path, digest)` of the last source snapshot written for this
    /// variant, so `test_case` re-snapshots only when the digest has
    /// actually changed (§7.6).
    source_snapshot: Option<(PathBuf, Digest)>,
    compile_result: CompileResult,
    /// Count of `(digest, test)` evaluations this variant actually ran,
    /// distinct from the cache's hit counter (§7.3).
    unique_evaluations: u64,
}

impl ProgramVariant {
    pub fn new(program: Program, statement_map: StatementMap, weights: LocalizedWeights) -> Self {
        let codebank = Codebank::from_statement_map(&statement_map);
        Self {
            program,
            statement_map,
            codebank,
            weights,
            fix_weights: LocalizedWeights::default(),
            loc_map: None,
            lineage: Vec::new(),
            source_snapshot: None,
            compile_result: CompileResult::NotCompiled,
            unique_evaluations: 0,
        }
    }

    /// Attach the source location map produced alongside numbering, used
    /// by `atom_id_of_source_line` and the `line` localization scheme.
    pub fn with_loc_map(mut self, loc_map: LocationMap) -> Self {
        self.loc_map = Some(loc_map);
        self
    }

    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    pub fn unique_evaluations(&self) -> u64 {
        self.unique_evaluations
    }

    /// Resolve the `Sid` recorded at `(file, line)`, via the attached
    /// location map (§7.6). `None` if no location map is attached or
    /// nothing matches.
    pub fn atom_id_of_source_line(&self, file: &str, line: u32) -> Option<Sid> {
        let loc_map = self.loc_map.as_ref()?;
        localization::atom_id_of_source_line(loc_map, file, line)
    }

    /// Resolve and cache one test's outcome against this variant (§7.6),
    /// following the ordering: a cache hit on `(digest, test)` short-
    /// circuits everything else; otherwise the variant is snapshotted to
    /// disk, compiled if not already, and — only on a successful compile
    /// — actually run.
    pub fn test_case(
        &mut self,
        cache: &mut TestCache,
        harness: &HarnessConfig,
        test: &str,
        ports: &mut PortAllocator,
    ) -> Result<CachedOutcome, CoreError> {
        let digest = self.digest();
        if let Lookup::Hit(outcome) = cache.lookup(&digest, test) {
            return Ok(outcome);
        }

        self.ensure_snapshot(harness)?;
        self.ensure_compile(harness)?;

        let outcome = match self.compile_result.clone() {
            CompileResult::Failed => CachedOutcome { passed: false, fitness: vec![0.0] },
            CompileResult::Succeeded(exe) => self.run_test(harness, &exe, test, ports)?,
            CompileResult::NotCompiled => {
                unreachable!("ensure_compile always leaves Failed or Succeeded")
            }
        };

        cache.record(digest, test.to_string(), outcome.clone());
        self.unique_evaluations += 1;
        Ok(outcome)
    }

    fn ensure_snapshot(&mut self, harness: &HarnessConfig) -> Result<(), CoreError> {
        let digest = self.digest();
        if let Some((_, existing)) = &self.source_snapshot {
            if *existing == digest {
                return Ok(());
            }
        }
        let source_path = harness.work_dir.join(format!("variant-{digest}.c"));
        self.output_source(&source_path)?;
        self.source_snapshot = Some((source_path, digest));
        self.compile_result = CompileResult::NotCompiled;
        Ok(())
    }

    fn ensure_compile(&mut self, harness: &HarnessConfig) -> Result<(), CoreError> {
        if self.compile_result != CompileResult::NotCompiled {
            return Ok(());
        }
        let (source_path, digest) = self
            .source_snapshot
            .clone()
            .ok_or_else(|| CoreError::AstShape("no source snapshot to compile".into()))?;
        let exe_path = harness.work_dir.join(format!("variant-{digest}.exe"));
        let command = substitute(
            &harness.compile_command,
            &[
                ("__COMPILER_NAME__", harness.compiler_name.as_str()),
                ("__EXE_NAME__", &exe_path.display().to_string()),
                ("__SOURCE_NAME__", &source_path.display().to_string()),
                ("__COMPILER_OPTIONS__", harness.compiler_options.as_str()),
            ],
        );
        let status = std::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .status()
            .map_err(|e| CoreError::io(&source_path, e))?;
        self.compile_result = if status.success() {
            CompileResult::Succeeded(exe_path)
        } else {
            CompileResult::Failed
        };
        Ok(())
    }

    fn run_test(
        &self,
        harness: &HarnessConfig,
        exe: &Path,
        test: &str,
        ports: &mut PortAllocator,
    ) -> Result<CachedOutcome, CoreError> {
        let fitness_path = harness
            .work_dir
            .join(format!("fitness-{}-{test}.txt", std::process::id()));
        let _ = std::fs::remove_file(&fitness_path);
        let port = ports.next_port().to_string();
        let source_name = self
            .source_snapshot
            .as_ref()
            .map(|(p, _)| p.display().to_string())
            .unwrap_or_default();
        let command = substitute(
            &harness.test_command,
            &[
                ("__TEST_SCRIPT__", harness.test_script.as_str()),
                ("__EXE_NAME__", &exe.display().to_string()),
                ("__TEST_NAME__", test),
                ("__PORT__", &port),
                ("__SOURCE_NAME__", &source_name),
                ("__FITNESS_FILE__", &fitness_path.display().to_string()),
            ],
        );
        let status = std::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .status()
            .map_err(|e| CoreError::io(exe, e))?;
        let passed = status.success();
        let fitness = std::fs::read_to_string(&fitness_path)
            .ok()
            .map(|text| parse_fitness_file(&text))
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| if passed { vec![1.0] } else { vec![0.0] });
        let _ = std::fs::remove_file(&fitness_path);
        Ok(CachedOutcome { passed, fitness })
    }

    fn with_mutated(&self, program: Program, note: String) -> Self {
        let mut lineage = self.lineage.clone();
        lineage.push(note);
        Self {
            program,
            statement_map: self.statement_map.clone(),
            codebank: Codebank::from_statement_map(&self.statement_map),
            weights: self.weights.clone(),
            fix_weights: self.fix_weights.clone(),
            loc_map: self.loc_map.clone(),
            lineage,
            source_snapshot: None,
            compile_result: CompileResult::NotCompiled,
            unique_evaluations: 0,
        }
    }

    /// Resolve which test(s) to run for this variant, per §7's ordering:
    /// an explicit single test name wins; otherwise a caller-supplied test
    /// suite list is used in full; with neither, the variant has no tests
    /// to run and callers should treat it as untested rather than failing.
    pub fn resolve_test_cases<'a>(
        explicit: Option<&'a str>,
        suite: &'a [String],
    ) -> Vec<&'a str> {
        if let Some(t) = explicit {
            return vec![t];
        }
        suite.iter().map(|s| s.as_str()).collect()
    }

    fn locate(&self, program: &mut Program, sid: Sid) -> bool {
        use crate::visitor::{walk_program, Action, Visitor};

        struct Finder {
            target: Sid,
            found: bool,
        }
        impl Visitor for Finder {
            fn visit_stmt(&mut self, stmt: &crate::ast::Stmt) -> Action<crate::ast::Stmt> {
                if stmt.sid == self.target {
                    self.found = true;
                }
                Action::Descend
            }
        }
        let mut finder = Finder { target: sid, found: false };
        let moved = std::mem::replace(program, Program { decls: vec![] });
        *program = walk_program(&mut finder, moved);
        finder.found
    }
}

fn delete_stmt(program: &mut Program, target: Sid) {
    use crate::visitor::{walk_program, Action, Visitor};
    struct Deleter(Sid);
    impl Visitor for Deleter {
        fn visit_stmt_expand(&mut self, stmt: crate::ast::Stmt) -> Vec<crate::ast::Stmt> {
            if stmt.sid == self.0 {
                vec![]
            } else {
                vec![crate::visitor::walk_stmt(self, stmt)]
            }
        }
    }
    let moved = std::mem::replace(program, Program { decls: vec![] });
    *program = walk_program(&mut Deleter(target), moved);
}

fn append_stmt(program: &mut Program, target: Sid, donor_kind: StmtKind) {
    use crate::visitor::{walk_program, Action, Visitor};
    struct Appender {
        target: Sid,
        donor: StmtKind,
    }
    impl Visitor for Appender {
        fn visit_stmt_expand(&mut self, stmt: crate::ast::Stmt) -> Vec<crate::ast::Stmt> {
            if stmt.sid == self.target {
                let donor_stmt = crate::ast::Stmt {
                    sid: Sid::UNTRACED,
                    labels: vec![],
                    kind: self.donor.clone(),
                    loc: stmt.loc.clone(),
                };
                vec![crate::visitor::walk_stmt(self, stmt), donor_stmt]
            } else {
                vec![crate::visitor::walk_stmt(self, stmt)]
            }
        }
    }
    let moved = std::mem::replace(program, Program { decls: vec![] });
    *program = walk_program(&mut Appender { target, donor: donor_kind }, moved);
}

fn swap_stmts(program: &mut Program, a: Sid, b: Sid) {
    use crate::visitor::{walk_program, Action, Visitor};
    struct Swapper {
        a: Sid,
        b: Sid,
        a_kind: Option<StmtKind>,
        b_kind: Option<StmtKind>,
    }
    impl Visitor for Swapper {
        fn visit_stmt(&mut self, stmt: &crate::ast::Stmt) -> Action<crate::ast::Stmt> {
            if stmt.sid == self.a {
                self.a_kind = Some(stmt.kind.clone());
            } else if stmt.sid == self.b {
                self.b_kind = Some(stmt.kind.clone());
            }
            Action::Descend
        }
    }
    let mut scan = Swapper { a, b, a_kind: None, b_kind: None };
    let scanned = walk_program(&mut scan, program.clone());
    let (Some(a_kind), Some(b_kind)) = (scan.a_kind, scan.b_kind) else {
        return;
    };

    struct Replacer {
        a: Sid,
        b: Sid,
        a_kind: StmtKind,
        b_kind: StmtKind,
    }
    impl Visitor for Replacer {
        fn visit_stmt(&mut self, stmt: &crate::ast::Stmt) -> Action<crate::ast::Stmt> {
            if stmt.sid == self.a {
                let mut s = stmt.clone();
                s.kind = self.b_kind.clone();
                Action::Replace(s)
            } else if stmt.sid == self.b {
                let mut s = stmt.clone();
                s.kind = self.a_kind.clone();
                Action::Replace(s)
            } else {
                Action::Descend
            }
        }
    }
    *program = walk_program(&mut Replacer { a, b, a_kind, b_kind }, scanned);
}

impl Variant for ProgramVariant {
    fn digest(&self) -> Digest {
        let bytes = bincode::serialize(&self.program).expect("Program is always serializable");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    }

    fn program(&self) -> &Program {
        &self.program
    }

    fn apply(&self, mutation: Mutation) -> Result<Self, CoreError> {
        match mutation {
            Mutation::Delete { target } => {
                let mut program = self.program.clone();
                if !self.locate(&mut program, target) {
                    return Err(CoreError::AstShape(format!("no statement with sid {target}")));
                }
                delete_stmt(&mut program, target);
                Ok(self.with_mutated(program, format!("delete({target})")))
            }
            Mutation::Append { target, donor } => {
                let donor_kind = self
                    .codebank
                    .get(donor)
                    .cloned()
                    .ok_or_else(|| CoreError::AstShape(format!("no atom with sid {donor}")))?;
                let mut program = self.program.clone();
                if !self.locate(&mut program, target) {
                    return Err(CoreError::AstShape(format!("no statement with sid {target}")));
                }
                append_stmt(&mut program, target, donor_kind);
                Ok(self.with_mutated(program, format!("append({target}, {donor})")))
            }
            Mutation::Swap { a, b } => {
                let mut program = self.program.clone();
                if !self.locate(&mut program, a) || !self.locate(&mut program, b) {
                    return Err(CoreError::AstShape("swap target missing".into()));
                }
                swap_stmts(&mut program, a, b);
                Ok(self.with_mutated(program, format!("swap({a}, {b})")))
            }
            Mutation::ReplaceSubatom { target, donor } => {
                // A sub-expression replacement needs the donor's body to be
                // expression-shaped; otherwise this degrades to a whole-
                // statement replace, matching §7.2's fallback rule.
                let donor_kind = self
                    .codebank
                    .get(donor)
                    .cloned()
                    .ok_or_else(|| CoreError::AstShape(format!("no atom with sid {donor}")))?;
                let replacement_expr = match &donor_kind {
                    StmtKind::Return(Some(e)) => Some(e.clone()),
                    StmtKind::Instr(instrs) => match instrs.first() {
                        Some(crate::ast::Instruction::Assign { rhs, .. }) => Some(rhs.clone()),
                        Some(crate::ast::Instruction::Expr(e)) => Some(e.clone()),
                        _ => None,
                    },
                    _ => None,
                };
                let mut program = self.program.clone();
                if !self.locate(&mut program, target) {
                    return Err(CoreError::AstShape(format!("no statement with sid {target}")));
                }
                match replacement_expr {
                    Some(expr) => {
                        replace_return_expr(&mut program, target, expr);
                        Ok(self.with_mutated(
                            program,
                            format!("replace_subatom({target}, {donor})"),
                        ))
                    }
                    None => {
                        let mut program = self.program.clone();
                        apply_whole_replace(&mut program, target, donor_kind);
                        Ok(self.with_mutated(program, format!("replace_whole({target}, {donor})")))
                    }
                }
            }
        }
    }

    fn sanity_check(&self, allow_fail: bool) -> Result<(), CoreError> {
        let unchanged = self.lineage.is_empty();
        if unchanged {
            return Ok(());
        }
        let has_function = self.program.functions().next().is_some();
        if !has_function && !allow_fail {
            return Err(CoreError::SanityViolation(
                "mutation removed every function from the translation unit".into(),
            ));
        }
        Ok(())
    }

    fn copy(&self) -> Self {
        Self {
            program: self.program.clone(),
            statement_map: self.statement_map.clone(),
            codebank: Codebank::from_statement_map(&self.statement_map),
            weights: self.weights.clone(),
            fix_weights: self.fix_weights.clone(),
            loc_map: self.loc_map.clone(),
            lineage: self.lineage.clone(),
            source_snapshot: None,
            compile_result: CompileResult::NotCompiled,
            unique_evaluations: 0,
        }
    }

    fn max_atom(&self) -> usize {
        self.codebank.len()
    }

    fn from_source(path: &Path, statement_map: StatementMap, weights: LocalizedWeights) -> Result<Self, CoreError> {
        let program = JsonCFrontend.parse(path)?;
        Ok(Self::new(program, statement_map, weights))
    }

    fn output_source(&self, path: &Path) -> Result<(), CoreError> {
        let text = serde_json::to_string_pretty(&self.program)
            .map_err(|e| CoreError::AstShape(format!("failed to encode program: {e}")))?;
        std::fs::write(path, text).map_err(|e| CoreError::io(path, e))
    }
}

fn replace_return_expr(program: &mut Program, target: Sid, expr: crate::ast::Expr) {
    use crate::visitor::{walk_program, Action, Visitor};
    struct R { target: Sid, expr: crate::ast::Expr }
    impl Visitor for R {
        fn visit_stmt(&mut self, stmt: &crate::ast::Stmt) -> Action<crate::ast::Stmt> {
            if stmt.sid == self.target {
                let mut s = stmt.clone();
                if let StmtKind::Return(slot) = &mut s.kind {
                    *slot = Some(self.expr.clone());
                }
                Action::Replace(s)
            } else {
                Action::Descend
            }
        }
    }
    let moved = std::mem::replace(program, Program { decls: vec![] });
    *program = walk_program(&mut R { target, expr }, moved);
}

fn apply_whole_replace(program: &mut Program, target: Sid, donor_kind: StmtKind) {
    use crate::visitor::{walk_program, Action, Visitor};
    struct R { target: Sid, kind: StmtKind }
    impl Visitor for R {
        fn visit_stmt(&mut self, stmt: &crate::ast::Stmt) -> Action<crate::ast::Stmt> {
            if stmt.sid == self.target {
                let mut s = stmt.clone();
                s.kind = self.kind.clone();
                Action::Replace(s)
            } else {
                Action::Descend
            }
        }
    }
    let moved = std::mem::replace(program, Program { decls: vec![] });
    *program = walk_program(&mut R { target, kind: donor_kind }, moved);
}

impl CompileCache for ProgramVariant {
    fn lookup_test(&self, cache: &mut TestCache, test: &str) -> Lookup {
        cache.lookup(&self.digest(), test)
    }

    fn record_test(&self, cache: &mut TestCache, test: &str, outcome: CachedOutcome) {
        cache.record(self.digest(), test.to_string(), outcome);
    }
}

impl FaultLocalization for ProgramVariant {
    fn weight(&self, sid: Sid) -> f64 {
        self.weights.get(sid)
    }

    fn weights(&self) -> &LocalizedWeights {
        &self.weights
    }

    fn compute_localization(&mut self, scheme: &Scheme) {
        let sids: Vec<Sid> = self.statement_map.keys().copied().collect();
        let Localization { fault, fix } = localization::localize(scheme, &sids, self.loc_map.as_ref());
        self.weights = fault;
        self.fix_weights = fix;
    }

    fn get_fault_localization(&self) -> &LocalizedWeights {
        &self.weights
    }

    fn get_fix_localization(&self) -> &LocalizedWeights {
        &self.fix_weights
    }
}

pub fn save_binary(variant: &ProgramVariant, path: &Path) -> Result<(), CoreError> {
    let artifact = VariantArtifact {
        version: VARIANT_VERSION.to_string(),
        program: variant.program.clone(),
        lineage: variant.lineage.clone(),
    };
    let bytes = bincode::serialize(&artifact)
        .map_err(|e| CoreError::AstShape(format!("failed to encode variant: {e}")))?;
    std::fs::write(path, bytes).map_err(|e| CoreError::io(path, e))
}

pub fn load_binary(
    path: &Path,
    statement_map: StatementMap,
    weights: LocalizedWeights,
) -> Result<ProgramVariant, CoreError> {
    let bytes = std::fs::read(path).map_err(|e| CoreError::io(path, e))?;
    let artifact: VariantArtifact = bincode::deserialize(&bytes)
        .map_err(|e| CoreError::AstShape(format!("corrupt variant artifact: {e}")))?;
    if artifact.version != VARIANT_VERSION {
        return Err(CoreError::VersionMismatch {
            artifact: "variant",
            expected: VARIANT_VERSION.to_string(),
            found: artifact.version,
        });
    }
    let codebank = Codebank::from_statement_map(&statement_map);
    Ok(ProgramVariant {
        program: artifact.program,
        statement_map,
        codebank,
        weights,
        fix_weights: LocalizedWeights::default(),
        loc_map: None,
        lineage: artifact.lineage,
        source_snapshot: None,
        compile_result: CompileResult::NotCompiled,
        unique_evaluations: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Decl, Expr, Function, Loc, Stmt, StmtKind};

    fn loc() -> Loc {
        Loc { file: "t.c".into(), line: 1, byte: 0 }
    }

    fn stmt(sid: u32, kind: StmtKind) -> Stmt {
        Stmt { sid: Sid(sid), labels: vec![], kind, loc: loc() }
    }

    fn sample() -> (Program, StatementMap) {
        let body = vec![
            stmt(1, StmtKind::Return(Some(Expr::IntLit(1)))),
            stmt(2, StmtKind::Return(Some(Expr::IntLit(2)))),
        ];
        let mut map = StatementMap::new();
        map.insert(Sid(1), StmtKind::Return(Some(Expr::IntLit(1))));
        map.insert(Sid(2), StmtKind::Return(Some(Expr::IntLit(2))));
        (
            Program {
                decls: vec![Decl::Function(Function {
                    name: "main".into(),
                    params: vec![],
                    body,
                })],
            },
            map,
        )
    }

    #[test]
    fn digest_is_stable_for_identical_programs() {
        let (program, map) = sample();
        let v1 = ProgramVariant::new(program.clone(), map.clone(), LocalizedWeights::default());
        let v2 = ProgramVariant::new(program, map, LocalizedWeights::default());
        assert_eq!(v1.digest(), v2.digest());
    }

    #[test]
    fn delete_removes_statement_and_changes_digest() {
        let (program, map) = sample();
        let v = ProgramVariant::new(program, map, LocalizedWeights::default());
        let mutated = v.apply(Mutation::Delete { target: Sid(1) }).unwrap();
        assert_ne!(v.digest(), mutated.digest());
        assert_eq!(mutated.program().functions().next().unwrap().body.len(), 1);
    }

    #[test]
    fn append_inserts_donor_after_target() {
        let (program, map) = sample();
        let v = ProgramVariant::new(program, map, LocalizedWeights::default());
        let mutated = v.apply(Mutation::Append { target: Sid(1), donor: Sid(2) }).unwrap();
        assert_eq!(mutated.program().functions().next().unwrap().body.len(), 3);
    }

    #[test]
    fn swap_exchanges_statement_bodies() {
        let (program, map) = sample();
        let v = ProgramVariant::new(program, map, LocalizedWeights::default());
        let mutated = v.apply(Mutation::Swap { a: Sid(1), b: Sid(2) }).unwrap();
        let body = &mutated.program().functions().next().unwrap().body;
        assert_eq!(body[0].kind, StmtKind::Return(Some(Expr::IntLit(2))));
        assert_eq!(body[1].kind, StmtKind::Return(Some(Expr::IntLit(1))));
    }

    #[test]
    fn apply_leaves_original_variant_unchanged() {
        let (program, map) = sample();
        let v = ProgramVariant::new(program, map, LocalizedWeights::default());
        let before = v.digest();
        let _ = v.apply(Mutation::Delete { target: Sid(1) }).unwrap();
        assert_eq!(v.digest(), before);
    }

    #[test]
    fn missing_target_is_an_ast_shape_error() {
        let (program, map) = sample();
        let v = ProgramVariant::new(program, map, LocalizedWeights::default());
        assert!(v.apply(Mutation::Delete { target: Sid(99) }).is_err());
    }

    #[test]
    fn sanity_check_passes_on_unmutated_variant() {
        let (program, map) = sample();
        let v = ProgramVariant::new(program, map, LocalizedWeights::default());
        assert!(v.sanity_check(false).is_ok());
    }

    #[test]
    fn sanity_check_flags_emptied_program_unless_allowed() {
        let (program, map) = sample();
        let v = ProgramVariant::new(program, map, LocalizedWeights::default());
        let d1 = v.apply(Mutation::Delete { target: Sid(1) }).unwrap();
        let d2 = d1.apply(Mutation::Delete { target: Sid(2) }).unwrap();
        assert!(d2.sanity_check(false).is_ok()); // body empty, but function decl remains
    }

    #[test]
    fn save_and_load_binary_round_trips() {
        let (program, map) = sample();
        let v = ProgramVariant::new(program, map.clone(), LocalizedWeights::default());
        let path = std::env::temp_dir().join(format!("flc-variant-{}.bin", std::process::id()));
        save_binary(&v, &path).unwrap();
        let loaded = load_binary(&path, map, LocalizedWeights::default()).unwrap();
        assert_eq!(loaded.digest(), v.digest());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn resolve_test_cases_prefers_explicit_over_suite() {
        let suite = vec!["t1".to_string(), "t2".to_string()];
        assert_eq!(ProgramVariant::resolve_test_cases(Some("explicit"), &suite), vec!["explicit"]);
        assert_eq!(ProgramVariant::resolve_test_cases(None, &suite), vec!["t1", "t2"]);
    }

    /// The range has 792 slots (`1600 - 808`); 792 consecutive calls
    /// produce 792 distinct ports covering the whole range exactly once,
    /// and the 793rd call repeats the first.
    #[test]
    fn port_allocator_wraps_after_covering_the_full_range() {
        let mut ports = PortAllocator::new();
        let span = (PORT_RANGE_END - PORT_RANGE_START) as usize;
        let first_cycle: Vec<u16> = (0..span).map(|_| ports.next_port()).collect();

        let distinct: std::collections::BTreeSet<u16> = first_cycle.iter().copied().collect();
        assert_eq!(distinct.len(), span);
        assert_eq!(*distinct.iter().next().unwrap(), PORT_RANGE_START);
        assert_eq!(*distinct.iter().next_back().unwrap(), PORT_RANGE_END - 1);

        assert_eq!(ports.next_port(), PORT_RANGE_START);
        assert_eq!(ports.next_port(), first_cycle[1]);
    }

    #[test]
    fn max_atom_matches_codebank_len() {
        let (program, map) = sample();
        let v = ProgramVariant::new(program, map, LocalizedWeights::default());
        assert_eq!(v.max_atom(), 2);
    }

    #[test]
    fn copy_is_structurally_equal_but_resets_compile_cache_slots() {
        let (program, map) = sample();
        let v = ProgramVariant::new(program, map, LocalizedWeights::default());
        let c = v.copy();
        assert_eq!(v.digest(), c.digest());
        assert_eq!(c.source_snapshot, None);
        assert_eq!(c.compile_result, CompileResult::NotCompiled);
    }

    #[test]
    fn from_source_and_output_source_round_trip() {
        let (program, map) = sample();
        let v = ProgramVariant::new(program, map.clone(), LocalizedWeights::default());
        let path = std::env::temp_dir().join(format!("flc-variant-src-{}.json", std::process::id()));
        v.output_source(&path).unwrap();
        let loaded = ProgramVariant::from_source(&path, map, LocalizedWeights::default()).unwrap();
        assert_eq!(loaded.digest(), v.digest());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn compute_localization_populates_fault_and_fix_weights() {
        let (program, map) = sample();
        let mut v = ProgramVariant::new(program, map, LocalizedWeights::default());
        let mut coverage = crate::localization::Coverage::new();
        coverage.record(Sid(1), false);
        coverage.record(Sid(2), true);
        v.compute_localization(&Scheme::Path { coverage, flatten: crate::localization::Flatten::Sum });
        assert_eq!(v.get_fault_localization().get(Sid(1)), 1.0);
        assert_eq!(v.get_fix_localization().get(Sid(2)), 0.5);
    }

    fn harness(work_dir: &Path) -> HarnessConfig {
        HarnessConfig {
            compiler_name: "cc".into(),
            compiler_options: String::new(),
            compile_command: "cc -o __EXE_NAME__ __SOURCE_NAME__ __COMPILER_OPTIONS__ 2>/dev/null; true".into(),
            test_script: String::new(),
            test_command: "true".into(),
            work_dir: work_dir.to_path_buf(),
        }
    }

    #[test]
    fn test_case_hits_cache_on_second_call_without_recompiling() {
        let (program, map) = sample();
        let mut v = ProgramVariant::new(program, map, LocalizedWeights::default());
        let work_dir = std::env::temp_dir().join(format!("flc-harness-{}", std::process::id()));
        std::fs::create_dir_all(&work_dir).unwrap();
        let h = harness(&work_dir);
        let cache_path = work_dir.join("cache.bin");
        let mut cache = TestCache::open(&cache_path, 10).unwrap();
        let mut ports = PortAllocator::new();

        let first = v.test_case(&mut cache, &h, "t1", &mut ports).unwrap();
        assert_eq!(v.unique_evaluations(), 1);
        let second = v.test_case(&mut cache, &h, "t1", &mut ports).unwrap();
        assert_eq!(v.unique_evaluations(), 1);
        assert_eq!(first.passed, second.passed);

        let _ = std::fs::remove_dir_all(&work_dir);
    }
}
