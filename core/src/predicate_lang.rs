// predicate_lang.rs — Tokenizer and grammar shared by two seams: the
// statement pretty-printer/reparser used for the §8 map round-trip
// property, and the "built-in variant wraps C expressions" predicate
// kind of §3/§4.5. Both need the same small boolean/relational/arithmetic
// expression language plus (for the reparser only) the four traceable
// statement shapes and the non-traceable ones they can nest.
//
// This is *not* a general C grammar — full C parsing is the external
// frontend's job (§1); this module covers exactly what §8's round-trip
// property and §4.5's predicate evaluation need.
//
// Preconditions: well-formed UTF-8 text produced by `ast::Stmt`'s
// `Display` impl, or a predicate expression string supplied by the
// caller (the "supplied predicate family" of §1).
// Postconditions: a structurally faithful `StmtKind`/`Expr`, or a
// `CoreError::AstShape` for input outside the grammar.
// Failure modes: `CoreError::AstShape` on lex or parse failure.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;
use logos::Logos;

use crate::ast::{BinOp, Expr, Instruction, LoopKind, Stmt, StmtKind, SwitchCase, UnaryOp};
use crate::diag::CoreError;

// ── Lexer ────────────────────────────────────────────────────────────────

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("do")]
    Do,
    #[token("goto")]
    Goto,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("switch")]
    Switch,
    #[token("case")]
    Case,
    #[token("default")]
    Default,
    #[token("try")]
    Try,
    #[token("finally")]
    Finally,
    #[token("except")]
    Except,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,

    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("=")]
    Assign,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("!")]
    Not,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse().ok())]
    FloatLit(f64),

    #[regex(r"[0-9]+", |lex| lex.slice().parse().ok())]
    IntLit(i64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].to_string()
    })]
    StrLit(String),
}

struct LexOutput {
    tokens: Vec<(Token, SimpleSpan)>,
}

fn lex(source: &str) -> Result<LexOutput, CoreError> {
    let mut tokens = Vec::new();
    for (tok, span) in Token::lexer(source).spanned() {
        let tok = tok.map_err(|_| {
            CoreError::AstShape(format!("unrecognized token at byte {}", span.start))
        })?;
        tokens.push((tok, SimpleSpan::from(span)));
    }
    Ok(LexOutput { tokens })
}

// ── Parser ───────────────────────────────────────────────────────────────

type Extra<'tokens> = extra::Err<Rich<'tokens, Token, SimpleSpan>>;

fn expr_parser<'tokens, I>() -> impl Parser<'tokens, I, Expr, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    recursive(|expr| {
        let atom = select! {
            Token::Ident(name) => Expr::Ident(name),
            Token::IntLit(v) => Expr::IntLit(v),
            Token::FloatLit(v) => Expr::FloatLit(v),
            Token::StrLit(s) => Expr::StrLit(s),
        };

        let call = select! { Token::Ident(name) => name }
            .then(
                expr.clone()
                    .separated_by(just(Token::Comma))
                    .allow_trailing()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map(|(callee, args)| Expr::Call { callee, args });

        let parenthesized = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let primary = call.or(parenthesized).or(atom);

        let unary = just(Token::Minus)
            .to(UnaryOp::Neg)
            .or(just(Token::Not).to(UnaryOp::Not))
            .repeated()
            .foldr(primary, |op, expr| Expr::Unary {
                op,
                expr: Box::new(expr),
            });

        let product = unary.clone().foldl(
            choice((
                just(Token::Star).to(BinOp::Mul),
                just(Token::Slash).to(BinOp::Div),
            ))
            .then(unary)
            .repeated(),
            |lhs, (op, rhs)| Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        );

        let sum = product.clone().foldl(
            choice((
                just(Token::Plus).to(BinOp::Add),
                just(Token::Minus).to(BinOp::Sub),
            ))
            .then(product)
            .repeated(),
            |lhs, (op, rhs)| Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        );

        let relational = sum.clone().foldl(
            choice((
                just(Token::Le).to(BinOp::Le),
                just(Token::Ge).to(BinOp::Ge),
                just(Token::Lt).to(BinOp::Lt),
                just(Token::Gt).to(BinOp::Gt),
            ))
            .then(sum)
            .repeated(),
            |lhs, (op, rhs)| Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        );

        let equality = relational.clone().foldl(
            choice((
                just(Token::EqEq).to(BinOp::Eq),
                just(Token::Ne).to(BinOp::Ne),
            ))
            .then(relational)
            .repeated(),
            |lhs, (op, rhs)| Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        );

        let and = equality.clone().foldl(
            just(Token::AndAnd)
                .to(BinOp::And)
                .then(equality)
                .repeated(),
            |lhs, (op, rhs)| Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        );

        and.clone().foldl(
            just(Token::OrOr).to(BinOp::Or).then(and).repeated(),
            |lhs, (op, rhs)| Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        )
    })
}

fn instruction_parser<'tokens, I>() -> impl Parser<'tokens, I, Instruction, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let expr = expr_parser();

    let assign = select! { Token::Ident(name) => name }
        .then_ignore(just(Token::Assign))
        .then(expr.clone())
        .map(|(name, rhs)| Instruction::Assign {
            lhs: Expr::Ident(name),
            rhs,
        });

    assign.or(expr.map(Instruction::Expr))
}

fn stmt_parser<'tokens, I>() -> impl Parser<'tokens, I, StmtKind, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let expr = expr_parser();
    let instruction = instruction_parser();

    recursive(|stmt| {
        let label_prefix = select! { Token::Ident(name) => name }
            .then_ignore(just(Token::Colon))
            .repeated()
            .collect::<Vec<_>>();

        let instr = instruction
            .clone()
            .then_ignore(just(Token::Semi))
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map(StmtKind::Instr);

        let ret = just(Token::Return)
            .ignore_then(expr.clone().or_not())
            .then_ignore(just(Token::Semi))
            .map(StmtKind::Return);

        let if_stmt = just(Token::If)
            .ignore_then(expr.clone().delimited_by(just(Token::LParen), just(Token::RParen)))
            .then(stmt.clone())
            .then(just(Token::Else).ignore_then(stmt.clone()).or_not())
            .map(|((cond, then_branch), else_branch)| StmtKind::If {
                cond,
                then_branch: Box::new(then_branch),
                else_branch: else_branch.map(Box::new),
            });

        let while_stmt = just(Token::While)
            .ignore_then(expr.clone().delimited_by(just(Token::LParen), just(Token::RParen)))
            .then(stmt.clone())
            .map(|(cond, body)| StmtKind::Loop {
                kind: LoopKind::While,
                cond,
                body: Box::new(body),
            });

        let do_while_stmt = just(Token::Do)
            .ignore_then(stmt.clone())
            .then_ignore(just(Token::While))
            .then(expr.clone().delimited_by(just(Token::LParen), just(Token::RParen)))
            .then_ignore(just(Token::Semi))
            .map(|(body, cond)| StmtKind::Loop {
                kind: LoopKind::DoWhile,
                cond,
                body: Box::new(body),
            });

        let goto = just(Token::Goto)
            .ignore_then(select! { Token::Ident(name) => name })
            .then_ignore(just(Token::Semi))
            .map(StmtKind::Goto);

        let brk = just(Token::Break)
            .then_ignore(just(Token::Semi))
            .to(StmtKind::Break);

        let cont = just(Token::Continue)
            .then_ignore(just(Token::Semi))
            .to(StmtKind::Continue);

        let case_label = just(Token::Case)
            .ignore_then(select! { Token::IntLit(v) => v })
            .then_ignore(just(Token::Colon))
            .map(Some)
            .or(just(Token::Default).then_ignore(just(Token::Colon)).to(None));

        let case = case_label
            .then(stmt.clone().repeated().collect::<Vec<_>>())
            .map(|(value, body)| SwitchCase { value, body });

        let switch = just(Token::Switch)
            .ignore_then(expr.clone().delimited_by(just(Token::LParen), just(Token::RParen)))
            .then(
                case.repeated()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .map(|(scrutinee, cases)| StmtKind::Switch { scrutinee, cases });

        let block = stmt
            .clone()
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map(StmtKind::Block);

        let try_finally = just(Token::Try)
            .ignore_then(stmt.clone())
            .then_ignore(just(Token::Finally))
            .then(stmt.clone())
            .map(|(try_block, finally_block)| StmtKind::TryFinally {
                try_block: Box::new(try_block),
                finally_block: Box::new(finally_block),
            });

        let try_except = just(Token::Try)
            .ignore_then(stmt.clone())
            .then_ignore(just(Token::Except))
            .then(stmt.clone())
            .map(|(try_block, except_block)| StmtKind::TryExcept {
                try_block: Box::new(try_block),
                except_block: Box::new(except_block),
            });

        let kind = choice((
            ret,
            if_stmt,
            while_stmt,
            do_while_stmt,
            goto,
            brk,
            cont,
            switch,
            try_finally,
            try_except,
            instr,
            block,
        ));

        label_prefix.then(kind).map(|(_labels, kind)| kind)
    })
}

fn make_stream(
    tokens: Vec<(Token, SimpleSpan)>,
    len: usize,
) -> impl ValueInput<'static, Token = Token, Span = SimpleSpan> {
    let eoi = SimpleSpan::from(len..len);
    Stream::from_iter(tokens).map(eoi, |(t, s)| (t, s))
}

/// Parse a single statement kind from its `Display`-produced text (§8 round
/// trip). Labels are accepted but (as with the rest of this grammar) not
/// retained in the returned `StmtKind` — they live on `ast::Stmt`, not
/// `StmtKind`, so a caller round-tripping a full `Stmt` re-attaches them.
pub fn parse_stmt(source: &str) -> Result<StmtKind, CoreError> {
    let lexed = lex(source)?;
    let len = source.len();
    let stream = make_stream(lexed.tokens, len);
    stmt_parser()
        .parse(stream)
        .into_result()
        .map_err(|errs| CoreError::AstShape(format_errors(source, &errs)))
}

/// Parse a predicate expression (§4.5's "built-in variant wraps C
/// expressions"), restricted to the boolean/relational/arithmetic subset
/// this grammar covers.
pub fn parse_predicate_expr(source: &str) -> Result<Expr, CoreError> {
    let lexed = lex(source)?;
    let len = source.len();
    let stream = make_stream(lexed.tokens, len);
    expr_parser()
        .parse(stream)
        .into_result()
        .map_err(|errs| CoreError::AstShape(format_errors(source, &errs)))
}

fn format_errors(source: &str, errs: &[Rich<'_, Token, SimpleSpan>]) -> String {
    let mut msg = format!("failed to parse {source:?}: ");
    for (i, e) in errs.iter().enumerate() {
        if i > 0 {
            msg.push_str("; ");
        }
        msg.push_str(&e.to_string());
    }
    msg
}
