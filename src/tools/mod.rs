//! Search engine runners.
//!
//! The store drives engines through two traits, one per execution shape:
//!
//! ```text
//!   Runner       (query, file)            → matches      per-file, stsearch
//!   BatchRunner  (queries, root, files)   → (i, match)   one process, semgrep
//! ```
//!
//! Per-file failures surface from [`Runner::try_run`]; the store logs them
//! and skips the file instead of caching an empty Run. Batch failures are
//! reported in [`BatchOutput::failure`] next to whatever output was
//! recovered.

pub mod semgrep;
pub mod stream;
pub mod stsearch;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use stbench_core::{Match, Query};

pub use semgrep::Semgrep;
pub use stream::{MatchStream, ToolError};
pub use stsearch::Stsearch;

// ═══════════════════════════════════════════════════════════════════════
// Per-file runner
// ═══════════════════════════════════════════════════════════════════════

/// An engine invoked once per (query, file).
#[async_trait]
pub trait Runner: Send + Sync {
    /// Tool name, as recorded in the store.
    fn name(&self) -> &str;

    /// Matches of `query` in `file`. A failure covers only this file; the
    /// store logs it and leaves the triple unrecorded.
    async fn try_run(&self, query: &Query, file: &Path) -> Result<Vec<Match>, ToolError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Batched runner
// ═══════════════════════════════════════════════════════════════════════

/// What one batched invocation produced.
#[derive(Debug, Default)]
pub struct BatchOutput {
    /// Matches tagged with the index of the query they answer.
    pub matches: Vec<(usize, Match)>,
    /// Expected files the engine reported errors for.
    pub error_paths: BTreeSet<PathBuf>,
    /// Expected files the engine did not scan.
    pub skipped: BTreeSet<PathBuf>,
    /// Terminal failure, reported after the recovered output.
    pub failure: Option<ToolError>,
}

impl BatchOutput {
    /// Files whose results cannot be trusted.
    pub fn dropped_paths(&self) -> BTreeSet<PathBuf> {
        self.error_paths.union(&self.skipped).cloned().collect()
    }
}

/// An engine that answers many (query, file) pairs in one invocation.
#[async_trait]
pub trait BatchRunner: Send + Sync {
    /// Tool name, as recorded in the store.
    fn name(&self) -> &str;

    /// Run every query against `files` under `root`.
    async fn run_batch(&self, queries: &[Query], root: &Path, files: &[PathBuf]) -> BatchOutput;

    /// Whether the engine accepts each query, using at most `workers`
    /// processes. Engines without a check accept everything.
    async fn validate(&self, queries: &[Query], _workers: usize) -> anyhow::Result<Vec<bool>> {
        Ok(vec![true; queries.len()])
    }
}
