// ast.rs — Typed C AST model (§3, §4.1).
//
// The shape a C frontend library is assumed to hand this crate (§1): a
// translation unit of function/global declarations whose statements carry
// the `Sid` this whole system threads end-to-end. C parsing and
// pretty-printing of the *full* C grammar is out of scope; what lives here
// is the subset needed for (a) the §3 traceability classification, (b) the
// statement-map round-trip property of §8, and (c) the `CFrontend` seam
// that stands in for the external parser.
//
// Preconditions: produced by a `CFrontend` implementation, or by the
// instrumenter's own passes acting on a previously produced `Program`.
// Postconditions: every node's `sid` is either 0 or a value installed by
// `crate::instrument::number_statements`.
// Failure modes: none (data-only module) except the round-trip parser,
// which reports an `AstShape` violation for input it does not expect.
// Side effects: none.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::diag::CoreError;
use crate::id::Sid;

/// Reserved label prefix marking a statement as user-synthetic
/// instrumentation (§6); such statements are never numbered and the label
/// is stripped from the output.
pub const RESERVED_LABEL_PREFIX: &str = "claire";

/// A source location: file, 1-based line, 0-based byte offset (§3 location map).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loc {
    pub file: String,
    pub line: u32,
    pub byte: u32,
}

// ── Root ─────────────────────────────────────────────────────────────────

/// A full translation unit as handed off by the external C frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub decls: Vec<Decl>,
}

/// A top-level declaration: a function definition or a global variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decl {
    Function(Function),
    Global { name: String, init: Option<Expr> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

impl Program {
    /// All statements across all function bodies, pre-order, depth-first —
    /// the traversal order numbering (§4.2 step 2) assigns sids in.
    pub fn functions_mut(&mut self) -> impl Iterator<Item = &mut Function> {
        self.decls.iter_mut().filter_map(|d| match d {
            Decl::Function(f) => Some(f),
            Decl::Global { .. } => None,
        })
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Function(f) => Some(f),
            Decl::Global { .. } => None,
        })
    }
}

// ── Statements ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    /// 0 until numbered; frozen thereafter (§3).
    pub sid: Sid,
    pub labels: Vec<String>,
    pub kind: StmtKind,
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    /// A straight-line instruction list — traceable.
    Instr(Vec<Instruction>),
    /// `return expr?;` — traceable.
    Return(Option<Expr>),
    /// `if (cond) then else?` — traceable.
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    /// `while (cond) body` or `do body while (cond)` — traceable.
    Loop {
        kind: LoopKind,
        cond: Expr,
        body: Box<Stmt>,
    },
    /// `goto label;` — not traceable.
    Goto(String),
    /// `break;` — not traceable.
    Break,
    /// `continue;` — not traceable.
    Continue,
    /// `switch (scrutinee) { cases }` — not traceable.
    Switch {
        scrutinee: Expr,
        cases: Vec<SwitchCase>,
    },
    /// `{ stmts }` — not traceable (the statements inside may be).
    Block(Vec<Stmt>),
    /// A structured-exception `try { } finally { }` construct — not traceable.
    TryFinally { try_block: Box<Stmt>, finally_block: Box<Stmt> },
    /// A structured-exception `try { } except { }` construct — not traceable.
    TryExcept { try_block: Box<Stmt>, except_block: Box<Stmt> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopKind {
    While,
    DoWhile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub value: Option<i64>, // None = default
    pub body: Vec<Stmt>,
}

/// One instruction inside a straight-line `Instr` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    Decl { ty: String, name: String, init: Option<Expr> },
    Assign { lhs: Expr, rhs: Expr },
    Call { target: Option<String>, callee: String, args: Vec<Expr> },
    Expr(Expr),
}

impl Instruction {
    /// The callee name if this instruction is (or contains, at the top
    /// level) a call — used by the call-splitting pass (§4.2 step 1).
    pub fn call_target(&self) -> Option<&str> {
        match self {
            Instruction::Call { callee, .. } => Some(callee),
            Instruction::Expr(Expr::Call { callee, .. }) => Some(callee),
            Instruction::Assign {
                rhs: Expr::Call { callee, .. },
                ..
            } => Some(callee),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Ident(String),
    IntLit(i64),
    FloatLit(f64),
    StrLit(String),
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Call { callee: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

// ── Traceability (§3) ───────────────────────────────────────────────────

impl Stmt {
    /// A statement is traceable iff its kind is one of
    /// `{Instr, Return, If, Loop}` and no label carries the reserved prefix.
    pub fn is_traceable(&self) -> bool {
        let kind_ok = matches!(
            self.kind,
            StmtKind::Instr(_) | StmtKind::Return(_) | StmtKind::If { .. } | StmtKind::Loop { .. }
        );
        kind_ok && !self.has_reserved_label()
    }

    pub fn has_reserved_label(&self) -> bool {
        self.labels
            .iter()
            .any(|l| l.starts_with(RESERVED_LABEL_PREFIX))
    }

    /// Strip reserved-prefix labels, used on statements that end up
    /// untraced (either by kind or by carrying a `claire` label).
    pub fn strip_reserved_labels(&mut self) {
        self.labels.retain(|l| !l.starts_with(RESERVED_LABEL_PREFIX));
    }

    /// A deep copy of this statement with every nested `sid` zeroed —
    /// the value installed into the statement map at numbering time
    /// (§4.2 step 2). Subsequent passes mutate the live AST in place;
    /// without zeroing, the map copy would end up aliasing ids a later
    /// pass reassigns.
    pub fn id_stripped_copy(&self) -> StmtKind {
        zero_ids_kind(&self.kind)
    }
}

fn zero_ids_stmt(s: &Stmt) -> Stmt {
    Stmt {
        sid: Sid::UNTRACED,
        labels: s.labels.clone(),
        kind: zero_ids_kind(&s.kind),
        loc: s.loc.clone(),
    }
}

fn zero_ids_kind(kind: &StmtKind) -> StmtKind {
    match kind {
        StmtKind::Instr(is) => StmtKind::Instr(is.clone()),
        StmtKind::Return(e) => StmtKind::Return(e.clone()),
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => StmtKind::If {
            cond: cond.clone(),
            then_branch: Box::new(zero_ids_stmt(then_branch)),
            else_branch: else_branch.as_ref().map(|b| Box::new(zero_ids_stmt(b))),
        },
        StmtKind::Loop { kind, cond, body } => StmtKind::Loop {
            kind: *kind,
            cond: cond.clone(),
            body: Box::new(zero_ids_stmt(body)),
        },
        StmtKind::Goto(l) => StmtKind::Goto(l.clone()),
        StmtKind::Break => StmtKind::Break,
        StmtKind::Continue => StmtKind::Continue,
        StmtKind::Switch { scrutinee, cases } => StmtKind::Switch {
            scrutinee: scrutinee.clone(),
            cases: cases
                .iter()
                .map(|c| SwitchCase {
                    value: c.value,
                    body: c.body.iter().map(zero_ids_stmt).collect(),
                })
                .collect(),
        },
        StmtKind::Block(stmts) => StmtKind::Block(stmts.iter().map(zero_ids_stmt).collect()),
        StmtKind::TryFinally {
            try_block,
            finally_block,
        } => StmtKind::TryFinally {
            try_block: Box::new(zero_ids_stmt(try_block)),
            finally_block: Box::new(zero_ids_stmt(finally_block)),
        },
        StmtKind::TryExcept {
            try_block,
            except_block,
        } => StmtKind::TryExcept {
            try_block: Box::new(zero_ids_stmt(try_block)),
            except_block: Box::new(zero_ids_stmt(except_block)),
        },
    }
}

// ── C-frontend seam (§1) ─────────────────────────────────────────────────

/// The external collaborator §1 assumes: "C parsing and pretty-printing
/// ... assumed provided by a C frontend library that yields an AST of the
/// shape described in §3." This crate never implements that parser; it
/// only names the boundary.
pub trait CFrontend {
    fn parse(&self, path: &Path) -> Result<Program, CoreError>;
}

/// A `CFrontend` that reads the `serde`-shaped `Program` directly from a
/// JSON file — standing in for whatever the real C frontend produces. This
/// is what `flc-instrument`'s CLI positional argument is read through.
pub struct JsonCFrontend;

impl CFrontend for JsonCFrontend {
    fn parse(&self, path: &Path) -> Result<Program, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| CoreError::AstShape(format!("{}: {e}", path.display())))
    }
}

// ── Pretty-printer / reparser for the traceable subset (§8 round-trip) ───
//
// Only the statement map ever needs round-tripping, and the map only ever
// holds the four traceable kinds (whose bodies may themselves nest any
// kind). The grammar below covers exactly that — it is not a general C
// pretty-printer.

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for l in &self.labels {
            write!(f, "{l}: ")?;
        }
        write_kind(f, &self.kind)
    }
}

fn write_kind(f: &mut fmt::Formatter<'_>, kind: &StmtKind) -> fmt::Result {
    match kind {
        StmtKind::Instr(is) => {
            write!(f, "{{ ")?;
            for i in is {
                write!(f, "{i}; ")?;
            }
            write!(f, "}}")
        }
        StmtKind::Return(Some(e)) => write!(f, "return {e};"),
        StmtKind::Return(None) => write!(f, "return;"),
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            write!(f, "if ({cond}) {then_branch}")?;
            if let Some(e) = else_branch {
                write!(f, " else {e}")?;
            }
            Ok(())
        }
        StmtKind::Loop { kind: LoopKind::While, cond, body } => write!(f, "while ({cond}) {body}"),
        StmtKind::Loop { kind: LoopKind::DoWhile, cond, body } => {
            write!(f, "do {body} while ({cond});")
        }
        StmtKind::Goto(l) => write!(f, "goto {l};"),
        StmtKind::Break => write!(f, "break;"),
        StmtKind::Continue => write!(f, "continue;"),
        StmtKind::Switch { scrutinee, cases } => {
            write!(f, "switch ({scrutinee}) {{ ")?;
            for c in cases {
                match c.value {
                    Some(v) => write!(f, "case {v}: ")?,
                    None => write!(f, "default: ")?,
                }
                for s in &c.body {
                    write!(f, "{s} ")?;
                }
            }
            write!(f, "}}")
        }
        StmtKind::Block(stmts) => {
            write!(f, "{{ ")?;
            for s in stmts {
                write!(f, "{s} ")?;
            }
            write!(f, "}}")
        }
        StmtKind::TryFinally {
            try_block,
            finally_block,
        } => write!(f, "try {try_block} finally {finally_block}"),
        StmtKind::TryExcept {
            try_block,
            except_block,
        } => write!(f, "try {try_block} except {except_block}"),
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Decl { ty, name, init: Some(e) } => write!(f, "{ty} {name} = {e}"),
            Instruction::Decl { ty, name, init: None } => write!(f, "{ty} {name}"),
            Instruction::Assign { lhs, rhs } => write!(f, "{lhs} = {rhs}"),
            Instruction::Call { target: Some(t), callee, args } => {
                write!(f, "{t} = {callee}(")?;
                write_args(f, args)?;
                write!(f, ")")
            }
            Instruction::Call { target: None, callee, args } => {
                write!(f, "{callee}(")?;
                write_args(f, args)?;
                write!(f, ")")
            }
            Instruction::Expr(e) => write!(f, "{e}"),
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{a}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ident(n) => write!(f, "{n}"),
            Expr::IntLit(v) => write!(f, "{v}"),
            Expr::FloatLit(v) => write!(f, "{v}"),
            Expr::StrLit(s) => write!(f, "\"{s}\""),
            Expr::Unary { op, expr } => {
                let o = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                };
                write!(f, "{o}{expr}")
            }
            Expr::Binary { op, lhs, rhs } => {
                let o = match op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Div => "/",
                    BinOp::Lt => "<",
                    BinOp::Le => "<=",
                    BinOp::Gt => ">",
                    BinOp::Ge => ">=",
                    BinOp::Eq => "==",
                    BinOp::Ne => "!=",
                    BinOp::And => "&&",
                    BinOp::Or => "||",
                };
                write!(f, "({lhs} {o} {rhs})")
            }
            Expr::Call { callee, args } => {
                write!(f, "{callee}(")?;
                write_args(f, args)?;
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> Loc {
        Loc {
            file: "t.c".into(),
            line: 1,
            byte: 0,
        }
    }

    fn stmt(kind: StmtKind) -> Stmt {
        Stmt {
            sid: Sid::UNTRACED,
            labels: vec![],
            kind,
            loc: loc(),
        }
    }

    #[test]
    fn traceable_kinds() {
        assert!(stmt(StmtKind::Instr(vec![])).is_traceable());
        assert!(stmt(StmtKind::Return(None)).is_traceable());
        assert!(!stmt(StmtKind::Goto("L".into())).is_traceable());
        assert!(!stmt(StmtKind::Break).is_traceable());
        assert!(!stmt(StmtKind::Block(vec![])).is_traceable());
    }

    #[test]
    fn reserved_label_excludes_from_numbering() {
        let mut s = stmt(StmtKind::Instr(vec![]));
        s.labels.push("claire_x".into());
        assert!(!s.is_traceable());
        s.strip_reserved_labels();
        assert!(s.labels.is_empty());
    }

    #[test]
    fn non_reserved_label_stays_traceable() {
        let mut s = stmt(StmtKind::Instr(vec![]));
        s.labels.push("retry".into());
        assert!(s.is_traceable());
    }

    #[test]
    fn id_stripped_copy_zeroes_nested_sids() {
        let inner = Stmt {
            sid: Sid(7),
            ..stmt(StmtKind::Return(None))
        };
        let outer = stmt(StmtKind::If {
            cond: Expr::IntLit(1),
            then_branch: Box::new(inner),
            else_branch: None,
        });
        let copy = outer.id_stripped_copy();
        match copy {
            StmtKind::If { then_branch, .. } => assert_eq!(then_branch.sid, Sid::UNTRACED),
            _ => panic!("expected If"),
        }
    }

    #[test]
    fn display_round_trips_through_parser() {
        let s = stmt(StmtKind::Return(Some(Expr::Binary {
            op: BinOp::Add,
            lhs: Box::new(Expr::Ident("x".into())),
            rhs: Box::new(Expr::IntLit(1)),
        })));
        let text = s.to_string();
        let reparsed = crate::predicate_lang::parse_stmt(&text).expect("reparse");
        assert_eq!(reparsed, s.kind);
        // and re-printing the reparsed form is byte-identical
        let reprinted = Stmt { kind: reparsed, ..s.clone() }.to_string();
        assert_eq!(reprinted, text);
    }
}
