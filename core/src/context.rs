// context.rs — Shared mutable state threaded through a single run (§7, §9).
//
// Mirrors the teacher's `CompilationState`: one struct owning the pieces
// every subsystem needs read/write access to, passed by `&mut` rather than
// smuggled through statics or `RefCell`s, so ordinary borrow-checking
// catches any attempt to hold two mutable views at once.
//
// Preconditions: none — `Context::new` always succeeds.
// Postconditions: `next_sid`/`statement_map` reflect exactly the numbering
// pass's output once `install_numbering` has been called.
// Failure modes: `CoreError::Io` only from `open_cache`, which touches disk.
// Side effects: `open_cache` reads/creates the cache file at `cache_path`.

use std::path::PathBuf;

use crate::cache::TestCache;
use crate::codebank::Codebank;
use crate::diag::{CoreError, Diagnostic};
use crate::id::SidAllocator;
use crate::instrument::StatementMap;
use crate::localization::LocalizedWeights;

/// Global toggles mirroring the §6 CLI flags, readable by any subsystem.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub calls: bool,
    pub loc: bool,
    pub loc_debug: bool,
    pub allow_sanity_fail: bool,
}

/// The state one end-to-end run (instrument → ingest → rank → search)
/// shares. Subsystems take `&Context` or `&mut Context` rather than
/// reaching for ambient globals.
pub struct Context {
    pub options: Options,
    pub allocator: SidAllocator,
    pub statement_map: StatementMap,
    pub codebank: Option<Codebank>,
    pub weights: LocalizedWeights,
    pub diagnostics: Vec<Diagnostic>,
    cache: Option<TestCache>,
}

impl Context {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            allocator: SidAllocator::new(),
            statement_map: StatementMap::new(),
            codebank: None,
            weights: LocalizedWeights::default(),
            diagnostics: Vec::new(),
            cache: None,
        }
    }

    /// Install the output of `instrument::number_statements`, rebuilding
    /// the codebank from the fresh statement map in the same step so the
    /// two never drift apart.
    pub fn install_numbering(&mut self, map: StatementMap, next_sid_counter: u32) {
        self.codebank = Some(Codebank::from_statement_map(&map));
        self.statement_map = map;
        // The allocator's internal counter only ever grows; reinstalling
        // a lower value would let a later numbering pass collide with ids
        // already handed out this run.
        while self.allocator.counter() < next_sid_counter {
            self.allocator.alloc();
        }
    }

    pub fn open_cache(&mut self, path: impl Into<PathBuf>, flush_every: u32) -> Result<(), CoreError> {
        self.cache = Some(TestCache::open(path, flush_every)?);
        Ok(())
    }

    pub fn cache_mut(&mut self) -> Option<&mut TestCache> {
        self.cache.as_mut()
    }

    pub fn push_diagnostic(&mut self, d: Diagnostic) {
        self.diagnostics.push(d);
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.level == crate::diag::DiagLevel::Error)
    }
}
