// faultloc-core — coverage instrumentation, dynamic-predicate fault
// localization, and variant representation for automated C program repair.
//
// Library root. Modules are added bottom-up: `id`/`diag` underlie
// everything; `ast`/`predicate_lang`/`visitor` give the C1/C2 type and
// traversal model; `instrument` (C3), `trace`/`exec_graph` (C4/C5), and
// `predicate` (C6) form the fault-localization pipeline; `cache`,
// `codebank`, `localization`, and `variant` (C7) form the genetic-search
// variant-representation layer; `context` threads shared state across all
// of the above for a single binary entry point.

pub mod ast;
pub mod cache;
pub mod codebank;
pub mod context;
pub mod diag;
pub mod exec_graph;
pub mod id;
pub mod instrument;
pub mod localization;
pub mod predicate;
pub mod predicate_lang;
pub mod trace;
pub mod variant;
pub mod visitor;
