// cache.rs — Persistent compile/test cache (§7.3).
//
// Keys variant outcomes by content digest so two variants with identical
// source text never recompile or rerun a test twice, even across process
// restarts. The cache is flushed periodically rather than on every write
// to keep the common case (many cache hits during a search run) cheap.
//
// Preconditions: `path` is writable; if it exists it holds a previously
// serialized `CacheFile` of a compatible version.
// Postconditions: `record`/`lookup` agree: a `record`ed `(digest, test)`
// pair is visible to a subsequent `lookup` in the same process, and to any
// process that `load`s the same `path` after a `flush`.
// Failure modes: `CoreError::VersionMismatch` on an incompatible on-disk
// version tag; `CoreError::Io` on an unreadable/unwritable path.
// Side effects: reads/writes `path`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::diag::CoreError;

/// Current on-disk format version (§7.3).
pub const CACHE_VERSION: &str = "2";

/// A content digest — the output of `Variant::digest()` (§7.1), opaque to
/// this module beyond its role as a hash-map key.
pub type Digest = String;

/// A single test's cached outcome against one digest. `fitness` is a
/// vector rather than a scalar (§7.6): a harness may report more than one
/// fitness component per run, and the default no-fitness-file outcome is
/// a one-element vector (`[1.0]` pass, `[0.0]` fail).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedOutcome {
    pub passed: bool,
    pub fitness: Vec<f64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    version: String,
    entries: HashMap<Digest, HashMap<String, CachedOutcome>>,
}

/// Either the cache already has an answer, or the caller must actually run
/// the test and then `record` the result (§7.3's control-flow split).
pub enum Lookup {
    Hit(CachedOutcome),
    MustRun,
}

/// The persistent digest → test → outcome cache, with a periodic-flush
/// policy and a hit/miss counter distinct from the unique-evaluation
/// counter a caller tracks separately (§7.3: "the cache hit count and the
/// unique-evaluation count are different things").
pub struct TestCache {
    path: PathBuf,
    file: CacheFile,
    dirty_since_flush: u32,
    flush_every: u32,
    hits: u64,
    misses: u64,
}

impl TestCache {
    /// Load an existing cache from `path`, or start an empty one if it
    /// does not exist yet.
    pub fn open(path: impl Into<PathBuf>, flush_every: u32) -> Result<Self, CoreError> {
        let path = path.into();
        let file = if path.exists() {
            let bytes = std::fs::read(&path).map_err(|e| CoreError::io(&path, e))?;
            let file: CacheFile = bincode::deserialize(&bytes)
                .map_err(|e| CoreError::AstShape(format!("corrupt test cache: {e}")))?;
            if file.version != CACHE_VERSION {
                return Err(CoreError::VersionMismatch {
                    artifact: "test cache",
                    expected: CACHE_VERSION.to_string(),
                    found: file.version,
                });
            }
            file
        } else {
            CacheFile {
                version: CACHE_VERSION.to_string(),
                entries: HashMap::new(),
            }
        };
        Ok(Self {
            path,
            file,
            dirty_since_flush: 0,
            flush_every: flush_every.max(1),
            hits: 0,
            misses: 0,
        })
    }

    pub fn lookup(&mut self, digest: &Digest, test: &str) -> Lookup {
        match self.file.entries.get(digest).and_then(|m| m.get(test)) {
            Some(outcome) => {
                self.hits += 1;
                Lookup::Hit(outcome.clone())
            }
            None => {
                self.misses += 1;
                Lookup::MustRun
            }
        }
    }

    /// Record a freshly computed outcome. The caller is responsible for
    /// calling this only after actually running the test — `TestCache`
    /// never runs anything itself.
    pub fn record(&mut self, digest: Digest, test: impl Into<String>, outcome: CachedOutcome) {
        self.file
            .entries
            .entry(digest)
            .or_default()
            .insert(test.into(), outcome);
        self.dirty_since_flush += 1;
        if self.dirty_since_flush >= self.flush_every {
            let _ = self.flush();
        }
    }

    pub fn flush(&mut self) -> Result<(), CoreError> {
        let bytes = bincode::serialize(&self.file)
            .map_err(|e| CoreError::AstShape(format!("failed to encode test cache: {e}")))?;
        std::fs::write(&self.path, bytes).map_err(|e| CoreError::io(&self.path, e))?;
        self.dirty_since_flush = 0;
        Ok(())
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
