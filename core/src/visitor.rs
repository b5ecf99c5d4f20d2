// visitor.rs — Generic AST traversal framework (§4.1).
//
// A `Visitor` returns one of four actions per node. `Descend` rebuilds the
// node from its (possibly changed) children; because traversal here owns
// the node by value, "identity-based rebuild" falls out of move semantics
// for free — there is no separate revision counter to maintain (see
// DESIGN.md for why this departs from the Design Notes' more general
// suggestion, which assumed a persistent/shared tree).
//
// Preconditions: `stmt`/`expr` are well-formed per `ast.rs`.
// Postconditions: the returned tree has the same shape except where a
// visitor substituted nodes; scope hooks fire exactly once per
// block/param-list/loop entered and exited.
// Failure modes: none — traversal itself cannot fail; a visitor may choose
// to report failures through its own state.
// Side effects: none beyond what a visitor's hooks do.

use crate::ast::{Decl, Expr, Function, Instruction, Program, Stmt, StmtKind, SwitchCase};

/// The four traversal actions of §4.1.
pub enum Action<T> {
    /// Return the node unchanged, do not descend.
    Skip,
    /// Return a replacement, do not descend into it.
    Replace(T),
    /// Visit children, rebuilding the node if any child changed.
    Descend,
    /// Substitute `node`, descend into *its* children, then apply `post`
    /// to the rebuilt result.
    DescendThenTransform(T, Box<dyn FnOnce(T) -> T>),
}

/// Client traversal hooks. All methods have identity defaults so a visitor
/// only needs to override what it cares about.
pub trait Visitor {
    fn visit_stmt(&mut self, _stmt: &Stmt) -> Action<Stmt> {
        Action::Descend
    }

    fn visit_expr(&mut self, _expr: &Expr) -> Action<Expr> {
        Action::Descend
    }

    /// List-expansion hook: lets a single statement expand into zero or
    /// more replacements (used by call-splitting, §4.2 step 1). Default:
    /// the ordinary singleton walk.
    fn visit_stmt_expand(&mut self, stmt: Stmt) -> Vec<Stmt> {
        vec![walk_stmt(self, stmt)]
    }

    fn enter_block(&mut self) {}
    fn exit_block(&mut self) {}
    fn enter_params(&mut self) {}
    fn exit_params(&mut self) {}
    fn enter_loop(&mut self) {}
    fn exit_loop(&mut self) {}
}

/// Walk a single statement, applying `v`'s action then recursing as needed.
pub fn walk_stmt<V: Visitor + ?Sized>(v: &mut V, stmt: Stmt) -> Stmt {
    match v.visit_stmt(&stmt) {
        Action::Skip => stmt,
        Action::Replace(n) => n,
        Action::Descend => descend_stmt(v, stmt),
        Action::DescendThenTransform(n, post) => {
            let n = descend_stmt(v, n);
            post(n)
        }
    }
}

fn descend_stmt<V: Visitor + ?Sized>(v: &mut V, mut stmt: Stmt) -> Stmt {
    stmt.kind = match stmt.kind {
        StmtKind::Instr(instrs) => StmtKind::Instr(
            instrs
                .into_iter()
                .map(|i| walk_instruction(v, i))
                .collect(),
        ),
        StmtKind::Return(e) => StmtKind::Return(e.map(|e| walk_expr(v, e))),
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => StmtKind::If {
            cond: walk_expr(v, cond),
            then_branch: Box::new(walk_stmt(v, *then_branch)),
            else_branch: else_branch.map(|b| Box::new(walk_stmt(v, *b))),
        },
        StmtKind::Loop { kind, cond, body } => {
            v.enter_loop();
            let cond = walk_expr(v, cond);
            let body = Box::new(walk_stmt(v, *body));
            v.exit_loop();
            StmtKind::Loop { kind, cond, body }
        }
        StmtKind::Goto(l) => StmtKind::Goto(l),
        StmtKind::Break => StmtKind::Break,
        StmtKind::Continue => StmtKind::Continue,
        StmtKind::Switch { scrutinee, cases } => StmtKind::Switch {
            scrutinee: walk_expr(v, scrutinee),
            cases: cases
                .into_iter()
                .map(|c| SwitchCase {
                    value: c.value,
                    body: walk_block(v, c.body),
                })
                .collect(),
        },
        StmtKind::Block(stmts) => StmtKind::Block(walk_block(v, stmts)),
        StmtKind::TryFinally {
            try_block,
            finally_block,
        } => StmtKind::TryFinally {
            try_block: Box::new(walk_stmt(v, *try_block)),
            finally_block: Box::new(walk_stmt(v, *finally_block)),
        },
        StmtKind::TryExcept {
            try_block,
            except_block,
        } => StmtKind::TryExcept {
            try_block: Box::new(walk_stmt(v, *try_block)),
            except_block: Box::new(walk_stmt(v, *except_block)),
        },
    };
    stmt
}

/// Walk a statement list with scope hooks and list-expansion, used for
/// `Block` bodies and function bodies alike.
pub fn walk_block<V: Visitor + ?Sized>(v: &mut V, stmts: Vec<Stmt>) -> Vec<Stmt> {
    v.enter_block();
    let out = stmts
        .into_iter()
        .flat_map(|s| v.visit_stmt_expand(s))
        .collect();
    v.exit_block();
    out
}

pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, expr: Expr) -> Expr {
    match v.visit_expr(&expr) {
        Action::Skip => expr,
        Action::Replace(n) => n,
        Action::Descend => descend_expr(v, expr),
        Action::DescendThenTransform(n, post) => {
            let n = descend_expr(v, n);
            post(n)
        }
    }
}

fn descend_expr<V: Visitor + ?Sized>(v: &mut V, expr: Expr) -> Expr {
    match expr {
        Expr::Unary { op, expr } => Expr::Unary {
            op,
            expr: Box::new(walk_expr(v, *expr)),
        },
        Expr::Binary { op, lhs, rhs } => Expr::Binary {
            op,
            lhs: Box::new(walk_expr(v, *lhs)),
            rhs: Box::new(walk_expr(v, *rhs)),
        },
        Expr::Call { callee, args } => Expr::Call {
            callee,
            args: args.into_iter().map(|a| walk_expr(v, a)).collect(),
        },
        atom @ (Expr::Ident(_) | Expr::IntLit(_) | Expr::FloatLit(_) | Expr::StrLit(_)) => atom,
    }
}

fn walk_instruction<V: Visitor + ?Sized>(v: &mut V, instr: Instruction) -> Instruction {
    match instr {
        Instruction::Decl { ty, name, init } => Instruction::Decl {
            ty,
            name,
            init: init.map(|e| walk_expr(v, e)),
        },
        Instruction::Assign { lhs, rhs } => Instruction::Assign {
            lhs: walk_expr(v, lhs),
            rhs: walk_expr(v, rhs),
        },
        Instruction::Call {
            target,
            callee,
            args,
        } => Instruction::Call {
            target,
            callee,
            args: args.into_iter().map(|a| walk_expr(v, a)).collect(),
        },
        Instruction::Expr(e) => Instruction::Expr(walk_expr(v, e)),
    }
}

/// Walk a whole translation unit. Function parameter scopes fire
/// `enter_params`/`exit_params` around the body traversal.
pub fn walk_program<V: Visitor + ?Sized>(v: &mut V, program: Program) -> Program {
    Program {
        decls: program
            .decls
            .into_iter()
            .map(|d| walk_decl(v, d))
            .collect(),
    }
}

fn walk_decl<V: Visitor + ?Sized>(v: &mut V, decl: Decl) -> Decl {
    match decl {
        Decl::Function(f) => Decl::Function(walk_function(v, f)),
        Decl::Global { name, init } => Decl::Global {
            name,
            init: init.map(|e| walk_expr(v, e)),
        },
    }
}

fn walk_function<V: Visitor + ?Sized>(v: &mut V, f: Function) -> Function {
    v.enter_params();
    let params = f.params;
    v.exit_params();
    Function {
        name: f.name,
        params,
        body: walk_block(v, f.body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Loc, Stmt};
    use crate::id::Sid;

    fn loc() -> Loc {
        Loc { file: "t.c".into(), line: 1, byte: 0 }
    }

    fn stmt(kind: StmtKind) -> Stmt {
        Stmt { sid: Sid::UNTRACED, labels: vec![], kind, loc: loc() }
    }

    struct CountVisitor {
        stmts_seen: u32,
    }
    impl Visitor for CountVisitor {
        fn visit_stmt(&mut self, _stmt: &Stmt) -> Action<Stmt> {
            self.stmts_seen += 1;
            Action::Descend
        }
    }

    #[test]
    fn descend_visits_nested_statements() {
        let program = stmt(StmtKind::Block(vec![
            stmt(StmtKind::Return(None)),
            stmt(StmtKind::Break),
        ]));
        let mut v = CountVisitor { stmts_seen: 0 };
        walk_stmt(&mut v, program);
        assert_eq!(v.stmts_seen, 3); // outer block + 2 children
    }

    struct ReplaceReturns;
    impl Visitor for ReplaceReturns {
        fn visit_stmt(&mut self, stmt: &Stmt) -> Action<Stmt> {
            match &stmt.kind {
                StmtKind::Return(_) => Action::Replace(Stmt {
                    kind: StmtKind::Return(Some(Expr::IntLit(42))),
                    ..stmt.clone()
                }),
                _ => Action::Descend,
            }
        }
    }

    #[test]
    fn replace_substitutes_without_descending() {
        let s = stmt(StmtKind::Return(None));
        let out = walk_stmt(&mut ReplaceReturns, s);
        assert_eq!(out.kind, StmtKind::Return(Some(Expr::IntLit(42))));
    }

    struct Splitter;
    impl Visitor for Splitter {
        fn visit_stmt_expand(&mut self, stmt: Stmt) -> Vec<Stmt> {
            match &stmt.kind {
                StmtKind::Instr(instrs) if instrs.len() > 1 => instrs
                    .iter()
                    .cloned()
                    .map(|i| Stmt {
                        kind: StmtKind::Instr(vec![i]),
                        ..stmt.clone()
                    })
                    .collect(),
                _ => vec![stmt],
            }
        }
    }

    #[test]
    fn list_expansion_splits_one_statement_into_several() {
        let block = vec![stmt(StmtKind::Instr(vec![
            Instruction::Expr(Expr::IntLit(1)),
            Instruction::Expr(Expr::IntLit(2)),
        ]))];
        let out = walk_block(&mut Splitter, block);
        assert_eq!(out.len(), 2);
    }

    struct ScopeTracker {
        depth: i32,
        max_depth: i32,
    }
    impl Visitor for ScopeTracker {
        fn enter_block(&mut self) {
            self.depth += 1;
            self.max_depth = self.max_depth.max(self.depth);
        }
        fn exit_block(&mut self) {
            self.depth -= 1;
        }
    }

    #[test]
    fn block_scope_hooks_fire_around_nested_blocks() {
        let program = stmt(StmtKind::Block(vec![stmt(StmtKind::Block(vec![stmt(
            StmtKind::Break,
        )]))]));
        let mut v = ScopeTracker { depth: 0, max_depth: 0 };
        walk_stmt(&mut v, program);
        assert_eq!(v.max_depth, 2);
        assert_eq!(v.depth, 0);
    }
}
