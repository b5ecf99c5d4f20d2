// instrument.rs — Coverage instrumenter (§4.2).
//
// Four passes in order: optional call-splitting, numbering, serialization
// of the pristine (numbered-but-uninstrumented) AST, and instrumentation.
//
// Preconditions: `program` is a well-formed `ast::Program`.
// Postconditions: every traceable statement carries a non-zero `sid`
// present in the returned `StatementMap`; non-traceable statements carry
// `sid == 0` and no reserved-prefix labels; the `.ast`/`.ht`/`_loc.ht`
// artifacts (§6) are written when requested.
// Failure modes: `CoreError::Io` on unwritable artifacts.
// Side effects: writes the artifacts named in §6 to disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ast::{Instruction, Loc, Program, Stmt, StmtKind};
use crate::diag::CoreError;
use crate::id::{Sid, SidAllocator};
use crate::visitor::{self, Action, Visitor};

/// `sid → StatementKind`, a deep id-stripped copy of each numbered
/// statement's body (§3). Frozen once numbering completes.
pub type StatementMap = BTreeMap<Sid, StmtKind>;

/// `sid → (file, line, byte)`, produced only with `--loc` (§3).
pub type LocationMap = BTreeMap<Sid, Loc>;

/// Persisted tuple `(next_sid, sid → StatementKind)` — the `.ht` artifact.
#[derive(Debug, Serialize, Deserialize)]
pub struct HtArtifact {
    pub next_sid: u32,
    pub map: StatementMap,
}

/// Options threaded through instrumentation (mirrors the §6 CLI flags).
#[derive(Debug, Clone, Default)]
pub struct InstrumentOptions {
    pub calls: bool,
    pub loc: bool,
    pub loc_debug: bool,
    /// Functions whose calls get split into their own statement (§4.2 step 1).
    pub split_targets: Vec<String>,
}

/// Everything `number_statements`/`instrument` produce for one translation
/// unit, ready to be serialized to the §6 artifacts.
pub struct InstrumentResult {
    pub program: Program,
    pub map: StatementMap,
    pub loc_map: Option<LocationMap>,
    pub next_sid: u32,
}

// ── Pass 1: call-splitting (§4.2 step 1) ──────────────────────────────────

struct CallSplitter<'a> {
    targets: &'a [String],
}

impl<'a> Visitor for CallSplitter<'a> {
    fn visit_stmt_expand(&mut self, stmt: Stmt) -> Vec<Stmt> {
        let StmtKind::Instr(instrs) = &stmt.kind else {
            return vec![visitor::walk_stmt(self, stmt)];
        };
        let split_at = instrs
            .iter()
            .position(|i| matches!(i.call_target(), Some(c) if self.targets.iter().any(|t| t == c)));
        let Some(idx) = split_at else {
            return vec![stmt];
        };

        let mut pre = instrs.clone();
        let call = pre.remove(idx);
        let post = pre.split_off(idx);

        let mut out = Vec::with_capacity(3);
        if !pre.is_empty() {
            out.push(Stmt {
                sid: Sid::UNTRACED,
                labels: stmt.labels.clone(),
                kind: StmtKind::Instr(pre),
                loc: stmt.loc.clone(),
            });
        }
        // The isolated call carries the first segment's label only when
        // there was no pre-call segment to carry it instead.
        let call_labels = if out.is_empty() { stmt.labels.clone() } else { vec![] };
        out.push(Stmt {
            sid: Sid::UNTRACED,
            labels: call_labels,
            kind: StmtKind::Instr(vec![call]),
            loc: stmt.loc.clone(),
        });
        if !post.is_empty() {
            out.push(Stmt {
                sid: Sid::UNTRACED,
                labels: vec![],
                kind: StmtKind::Instr(post),
                loc: stmt.loc.clone(),
            });
        }
        out
    }
}

/// Split every straight-line instruction list containing a call to a
/// designated function into pre-call/call/post-call segments. The call
/// segment is marked so pass 2 skips numbering it (§4.2 step 1).
pub fn split_calls(program: Program, targets: &[String]) -> Program {
    if targets.is_empty() {
        return program;
    }
    let mut v = CallSplitter { targets };
    visitor::walk_program(&mut v, program)
}

/// Marker used by `number_statements` to recognize an isolated call segment
/// produced by `split_calls`: a single-instruction `Instr` whose instruction
/// is a call. Isolated calls are never numbered, per §4.2 step 1.
fn is_isolated_call(kind: &StmtKind) -> bool {
    matches!(kind, StmtKind::Instr(instrs) if instrs.len() == 1 && instrs[0].call_target().is_some())
}

// ── Pass 2: numbering (§4.2 step 2) ───────────────────────────────────────

/// Wraps a single-statement `If`/`Loop` body in a `Block` before numbering,
/// so instrumentation can splice an emit-id prelude in front of it. Without
/// this, a body like `if (c) return 0;` numbers its `return` normally, but
/// the prelude never gets inserted: `Instrumenter` only splices inside
/// `walk_block`'s list expansion, and a bare (non-`Block`) branch body is
/// visited through the singleton `walk_stmt` path instead.
struct BranchBodyNormalizer;

impl Visitor for BranchBodyNormalizer {
    fn visit_stmt(&mut self, stmt: &Stmt) -> Action<Stmt> {
        Action::DescendThenTransform(
            stmt.clone(),
            Box::new(|mut s| {
                match &mut s.kind {
                    StmtKind::If { then_branch, else_branch, .. } => {
                        wrap_in_block(then_branch);
                        if let Some(e) = else_branch {
                            wrap_in_block(e);
                        }
                    }
                    StmtKind::Loop { body, .. } => wrap_in_block(body),
                    _ => {}
                }
                s
            }),
        )
    }
}

fn wrap_in_block(branch: &mut Stmt) {
    if matches!(branch.kind, StmtKind::Block(_)) {
        return;
    }
    let placeholder = Stmt {
        sid: Sid::UNTRACED,
        labels: vec![],
        kind: StmtKind::Block(vec![]),
        loc: branch.loc.clone(),
    };
    let inner = std::mem::replace(branch, placeholder);
    branch.loc = inner.loc.clone();
    branch.kind = StmtKind::Block(vec![inner]);
}

/// Run `BranchBodyNormalizer` over the whole program (§4.2 step 2, ahead of
/// numbering proper).
fn normalize_branch_bodies(program: Program) -> Program {
    visitor::walk_program(&mut BranchBodyNormalizer, program)
}

struct Numberer {
    alloc: SidAllocator,
    map: StatementMap,
    loc_map: LocationMap,
    want_loc: bool,
    skip_isolated_calls: bool,
}

impl Visitor for Numberer {
    fn visit_stmt(&mut self, stmt: &Stmt) -> Action<Stmt> {
        let mut s = stmt.clone();
        let eligible = s.is_traceable() && !(self.skip_isolated_calls && is_isolated_call(&s.kind));
        if eligible {
            let sid = self.alloc.alloc();
            // Deep-copy before descending: later passes mutate the live
            // AST, so the copy installed in the map must not alias ids a
            // later statement reassigns.
            let copy = s.id_stripped_copy();
            self.map.insert(sid, copy);
            if self.want_loc {
                self.loc_map.insert(sid, s.loc.clone());
            }
            s.sid = sid;
        } else {
            s.sid = Sid::UNTRACED;
            s.strip_reserved_labels();
        }
        Action::DescendThenTransform(s, Box::new(|s| s))
    }
}

/// Traverse `program` in source order, assigning a dense `Sid` to every
/// traceable statement and installing a copy of its (id-stripped) body
/// into the returned `StatementMap`. Non-traceable statements are zeroed
/// and have reserved-prefix labels stripped.
pub fn number_statements(program: Program, opts: &InstrumentOptions) -> InstrumentResult {
    let program = normalize_branch_bodies(program);
    let mut n = Numberer {
        alloc: SidAllocator::new(),
        map: StatementMap::new(),
        loc_map: LocationMap::new(),
        want_loc: opts.loc,
        skip_isolated_calls: opts.calls,
    };
    let program = visitor::walk_program(&mut n, program);
    InstrumentResult {
        program,
        map: n.map,
        loc_map: if opts.loc { Some(n.loc_map) } else { None },
        next_sid: n.alloc.counter(),
    }
}

// ── Pass 3: serialization of the pristine AST (§4.2 step 3) ──────────────

pub fn serialize_pristine_ast(program: &Program, path: &Path) -> Result<(), CoreError> {
    let bytes = bincode::serialize(program)
        .map_err(|e| CoreError::AstShape(format!("failed to encode pristine AST: {e}")))?;
    std::fs::write(path, bytes).map_err(|e| CoreError::io(path, e))
}

pub fn write_ht_artifact(map: &StatementMap, next_sid: u32, path: &Path) -> Result<(), CoreError> {
    let artifact = HtArtifact {
        next_sid,
        map: map.clone(),
    };
    let bytes = bincode::serialize(&artifact)
        .map_err(|e| CoreError::AstShape(format!("failed to encode .ht artifact: {e}")))?;
    std::fs::write(path, bytes).map_err(|e| CoreError::io(path, e))
}

pub fn write_loc_artifact(loc_map: &LocationMap, path: &Path) -> Result<(), CoreError> {
    let bytes = bincode::serialize(loc_map)
        .map_err(|e| CoreError::AstShape(format!("failed to encode _loc.ht artifact: {e}")))?;
    std::fs::write(path, bytes).map_err(|e| CoreError::io(path, e))
}

pub fn read_ht_artifact(path: &Path) -> Result<HtArtifact, CoreError> {
    let bytes = std::fs::read(path).map_err(|e| CoreError::io(path, e))?;
    bincode::deserialize(&bytes)
        .map_err(|e| CoreError::AstShape(format!("corrupt .ht artifact: {e}")))
}

// ── Pass 4: instrumentation (§4.2 step 4) ─────────────────────────────────

/// Name of the global output-stream handle prepended to the instrumented
/// translation unit.
pub const TRACE_STREAM_GLOBAL: &str = "__flc_trace_fp";

/// One record-emitting instruction pair spliced before every numbered
/// statement: a write of the trace record, then an explicit flush.
fn emit_record_instructions(sid: Sid, loc: Option<&Loc>) -> Vec<Instruction> {
    let record = match loc {
        Some(l) => format!("{},{},{},{}", sid.0, l.file, l.line, l.byte),
        None => sid.0.to_string(),
    };
    vec![
        Instruction::Call {
            target: None,
            callee: "fputs".into(),
            args: vec![
                crate::ast::Expr::StrLit(format!("{record}\n")),
                crate::ast::Expr::Ident(TRACE_STREAM_GLOBAL.into()),
            ],
        },
        Instruction::Call {
            target: None,
            callee: "fflush".into(),
            args: vec![crate::ast::Expr::Ident(TRACE_STREAM_GLOBAL.into())],
        },
    ]
}

struct Instrumenter<'a> {
    loc_map: Option<&'a LocationMap>,
    loc_debug: bool,
}

impl<'a> Visitor for Instrumenter<'a> {
    fn visit_stmt_expand(&mut self, stmt: Stmt) -> Vec<Stmt> {
        if !stmt.sid.is_traced() {
            return vec![visitor::walk_stmt(self, stmt)];
        }
        let loc = if self.loc_debug {
            self.loc_map.and_then(|m| m.get(&stmt.sid))
        } else {
            None
        };
        let prelude = Stmt {
            sid: Sid::UNTRACED,
            labels: vec![],
            kind: StmtKind::Instr(emit_record_instructions(stmt.sid, loc)),
            loc: stmt.loc.clone(),
        };
        vec![prelude, visitor::walk_stmt(self, stmt)]
    }
}

/// Insert the emit-id instruction pair before every numbered statement and
/// prepend the trace-stream global + its `fopen` prologue. Statements not
/// marked traceable are left untouched.
pub fn instrument(program: Program, path_file: &str, opts: &InstrumentOptions) -> Program {
    let mut v = Instrumenter {
        loc_map: None,
        loc_debug: opts.loc_debug,
    };
    let mut program = visitor::walk_program(&mut v, program);
    prepend_trace_prologue(&mut program, path_file);
    program
}

/// Variant of `instrument` that resolves `--loc-debug` records against the
/// location map produced alongside numbering.
pub fn instrument_with_locations(
    program: Program,
    loc_map: &LocationMap,
    path_file: &str,
    opts: &InstrumentOptions,
) -> Program {
    let mut v = Instrumenter {
        loc_map: Some(loc_map),
        loc_debug: opts.loc_debug,
    };
    let mut program = visitor::walk_program(&mut v, program);
    prepend_trace_prologue(&mut program, path_file);
    program
}

fn prepend_trace_prologue(program: &mut Program, path_file: &str) {
    use crate::ast::Decl;

    program.decls.insert(
        0,
        Decl::Global {
            name: TRACE_STREAM_GLOBAL.into(),
            init: None,
        },
    );

    for f in program.functions_mut() {
        if f.name == "main" {
            f.body.insert(
                0,
                Stmt {
                    sid: Sid::UNTRACED,
                    labels: vec![],
                    kind: StmtKind::Instr(vec![Instruction::Assign {
                        lhs: crate::ast::Expr::Ident(TRACE_STREAM_GLOBAL.into()),
                        rhs: crate::ast::Expr::Call {
                            callee: "fopen".into(),
                            args: vec![
                                crate::ast::Expr::StrLit(path_file.to_string()),
                                crate::ast::Expr::StrLit("wb".to_string()),
                            ],
                        },
                    }]),
                    loc: Loc {
                        file: path_file.to_string(),
                        line: 0,
                        byte: 0,
                    },
                },
            );
            break;
        }
    }
}

/// Artifact paths for a given source file, per §6.
pub struct ArtifactPaths {
    pub ast: PathBuf,
    pub ht: PathBuf,
    pub loc_ht: PathBuf,
    pub trace: PathBuf,
}

pub fn artifact_paths(src: &Path) -> ArtifactPaths {
    let stem = src.to_string_lossy().to_string();
    ArtifactPaths {
        ast: PathBuf::from(format!("{stem}.ast")),
        ht: PathBuf::from(format!("{stem}.ht")),
        loc_ht: PathBuf::from(format!("{stem}_loc.ht")),
        trace: PathBuf::from(format!("{stem}.path")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Decl, Expr, Function};

    fn loc() -> Loc {
        Loc { file: "t.c".into(), line: 1, byte: 0 }
    }

    fn stmt(kind: StmtKind) -> Stmt {
        Stmt { sid: Sid::UNTRACED, labels: vec![], kind, loc: loc() }
    }

    fn one_fn(body: Vec<Stmt>) -> Program {
        Program {
            decls: vec![Decl::Function(Function {
                name: "main".into(),
                params: vec![],
                body,
            })],
        }
    }

    #[test]
    fn minimal_trace_numbers_return_as_one() {
        // §8 scenario 1: `{ return 0; }` alone numbers to sid 1.
        let program = one_fn(vec![stmt(StmtKind::Return(Some(Expr::IntLit(0))))]);
        let result = number_statements(program, &InstrumentOptions::default());
        assert_eq!(result.next_sid, 1);
        assert_eq!(result.map.len(), 1);
        assert_eq!(
            result.map.get(&Sid(1)),
            Some(&StmtKind::Return(Some(Expr::IntLit(0))))
        );
    }

    #[test]
    fn label_exclusion_drops_reserved_prefixed_statement() {
        // §8 scenario 2.
        let mut labeled = stmt(StmtKind::Instr(vec![Instruction::Assign {
            lhs: Expr::Ident("x".into()),
            rhs: Expr::IntLit(1),
        }]));
        labeled.labels.push("claire_x".into());
        let program = one_fn(vec![
            labeled,
            stmt(StmtKind::Instr(vec![Instruction::Assign {
                lhs: Expr::Ident("y".into()),
                rhs: Expr::IntLit(2),
            }])),
        ]);
        let result = number_statements(program, &InstrumentOptions::default());
        assert_eq!(result.next_sid, 1);
        let numbered = result
            .program
            .functions()
            .next()
            .unwrap()
            .body
            .iter()
            .find(|s| s.sid.is_traced())
            .unwrap();
        assert!(numbered.labels.is_empty());
        let dropped = &result.program.functions().next().unwrap().body[0];
        assert!(dropped.labels.is_empty());
        assert_eq!(dropped.sid, Sid::UNTRACED);
    }

    #[test]
    fn non_traced_kinds_keep_sid_zero() {
        // §8 scenario 3: goto L; L: x = 1; — assignment gets sid 1, goto stays 0.
        let program = one_fn(vec![
            stmt(StmtKind::Goto("L".into())),
            {
                let mut s = stmt(StmtKind::Instr(vec![Instruction::Assign {
                    lhs: Expr::Ident("x".into()),
                    rhs: Expr::IntLit(1),
                }]));
                s.labels.push("L".into());
                s
            },
        ]);
        let result = number_statements(program, &InstrumentOptions::default());
        let body = &result.program.functions().next().unwrap().body;
        assert_eq!(body[0].sid, Sid::UNTRACED);
        assert_eq!(body[1].sid, Sid(1));
    }

    #[test]
    fn isolated_call_segment_is_not_numbered() {
        let program = one_fn(vec![stmt(StmtKind::Instr(vec![
            Instruction::Assign { lhs: Expr::Ident("a".into()), rhs: Expr::IntLit(1) },
            Instruction::Call { target: None, callee: "log_it".into(), args: vec![] },
            Instruction::Assign { lhs: Expr::Ident("b".into()), rhs: Expr::IntLit(2) },
        ]))]);
        let split = split_calls(program, &["log_it".to_string()]);
        let body = &split.functions().next().unwrap().body;
        assert_eq!(body.len(), 3);

        let opts = InstrumentOptions { calls: true, ..Default::default() };
        let result = number_statements(split, &opts);
        // pre + post numbered, the isolated call is skipped.
        assert_eq!(result.next_sid, 2);
    }

    #[test]
    fn bare_if_body_is_block_wrapped_before_numbering() {
        let if_stmt = Stmt {
            sid: Sid::UNTRACED,
            labels: vec![],
            kind: StmtKind::If {
                cond: Expr::Ident("c".into()),
                then_branch: Box::new(stmt(StmtKind::Return(Some(Expr::IntLit(0))))),
                else_branch: None,
            },
            loc: loc(),
        };
        let program = one_fn(vec![if_stmt]);
        let result = number_statements(program, &InstrumentOptions::default());
        // The `if` itself and its now block-wrapped `return` each get a sid.
        assert_eq!(result.next_sid, 2);

        let numbered_if = &result.program.functions().next().unwrap().body[0];
        let StmtKind::If { then_branch, .. } = &numbered_if.kind else {
            panic!("expected if");
        };
        assert!(matches!(then_branch.kind, StmtKind::Block(_)));
    }

    #[test]
    fn bare_if_body_receives_its_own_emit_prelude() {
        let if_stmt = Stmt {
            sid: Sid::UNTRACED,
            labels: vec![],
            kind: StmtKind::If {
                cond: Expr::Ident("c".into()),
                then_branch: Box::new(stmt(StmtKind::Return(Some(Expr::IntLit(0))))),
                else_branch: None,
            },
            loc: loc(),
        };
        let opts = InstrumentOptions::default();
        let numbered = number_statements(one_fn(vec![if_stmt]), &opts);
        let instrumented = instrument(numbered.program, "out.path", &opts);

        let body = &instrumented.functions().next().unwrap().body;
        let if_node = body
            .iter()
            .find(|s| matches!(s.kind, StmtKind::If { .. }))
            .expect("if statement survives instrumentation");
        let StmtKind::If { then_branch, .. } = &if_node.kind else {
            unreachable!()
        };
        let StmtKind::Block(inner) = &then_branch.kind else {
            panic!("expected block-wrapped then-branch");
        };
        assert_eq!(inner.len(), 2);
        assert!(matches!(inner[0].kind, StmtKind::Instr(_)));
        assert!(matches!(inner[1].kind, StmtKind::Return(_)));
    }

    #[test]
    fn numbering_is_stable_across_resets() {
        let mk = || one_fn(vec![stmt(StmtKind::Return(None)), stmt(StmtKind::Return(None))]);
        let r1 = number_statements(mk(), &InstrumentOptions::default());
        let r2 = number_statements(mk(), &InstrumentOptions::default());
        assert_eq!(r1.next_sid, r2.next_sid);
        assert_eq!(r1.map, r2.map);
    }
}
