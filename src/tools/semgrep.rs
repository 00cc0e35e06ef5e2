//! The semgrep batched runner.
//!
//! All queries of a batch are compiled into one temporary rule config, one
//! rule per query with id `search-NNNN` (the query index), and scanned over
//! the project root in a single `semgrep scan --json` call. Each rule turns
//! off the implicit matching semgrep would otherwise add, so its results
//! stay comparable with stsearch's literal matching.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use stbench_core::{Language, Match, Point, Query, Range};

use super::{BatchOutput, BatchRunner, ToolError};
use crate::config::SemgrepConfig;

pub const NAME: &str = "semgrep";

/// Exit code semgrep uses when a pattern does not parse.
const INVALID_PATTERN_EXIT: i32 = 2;

static CHECK_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"search-(\d+)$").expect("check id regex is valid"));

#[derive(Clone)]
pub struct Semgrep {
    binary: PathBuf,
    extra_flags: Vec<String>,
}

impl Semgrep {
    pub fn new(config: &SemgrepConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            extra_flags: config.extra_flags.clone(),
        }
    }

    fn scan(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.arg("scan").args(&self.extra_flags).arg("--json");
        command
    }

    /// Whether semgrep accepts each query, checked by scanning an empty file
    /// of the query's language with at most `workers` processes at once.
    pub async fn check_patterns(&self, queries: &[Query], workers: usize) -> anyhow::Result<Vec<bool>> {
        let empty = tempfile::tempdir()?;
        let languages: BTreeSet<Language> = queries.iter().map(|q| q.language).collect();
        for language in &languages {
            let ext = language.exts().first().copied().unwrap_or_default();
            std::fs::File::create(empty.path().join(format!("empty{}", ext)))?;
        }

        let slots = Arc::new(Semaphore::new(workers.max(1)));
        let mut tasks = JoinSet::new();
        for (i, query) in queries.iter().enumerate() {
            let runner = self.clone();
            let query = query.clone();
            let root = empty.path().to_path_buf();
            let slots = slots.clone();
            tasks.spawn(async move {
                let _slot = slots.acquire_owned().await;
                (i, runner.accepts(&query, &root).await)
            });
        }

        let mut valid = vec![false; queries.len()];
        while let Some(joined) = tasks.join_next().await {
            let (i, ok) = joined?;
            valid[i] = ok;
        }
        Ok(valid)
    }

    async fn accepts(&self, query: &Query, root: &Path) -> bool {
        let mut command = self.scan();
        command
            .arg(format!("--lang={}", query.language))
            .arg(format!("--pattern={}", query.syntax))
            .arg(root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        match command.status().await {
            Ok(status) if status.success() => true,
            Ok(status) if status.code() == Some(INVALID_PATTERN_EXIT) => {
                tracing::warn!("{}: invalid pattern {:?}", NAME, query.syntax);
                false
            }
            Ok(status) => {
                tracing::warn!("{}: validation of {:?} exited with {}", NAME, query.syntax, status);
                false
            }
            Err(e) => {
                tracing::warn!("{}: failed to start {}: {}", NAME, self.binary.display(), e);
                false
            }
        }
    }
}

/// The rule checked for query number `id`.
pub fn rule(id: usize, query: &Query) -> Value {
    json!({
        "id": format!("search-{:04}", id),
        "message": "result",
        "severity": "INFO",
        "languages": [query.language.name()],
        "pattern": query.syntax,
        "options": {
            "ac_matching": false,
            "constant_propagation": false,
            "vardef_assign": false,
            "attr_expr": false,
            "arrow_is_function": false,
            "let_is_var": false,
            "go_deeper_expr": false,
            "go_deeper_stmt": false,
            "implicit_deep_exprstmt": false,
            "implicit_ellipsis": false,
        },
    })
}

#[derive(Debug, Default, Deserialize)]
struct ScanOutput {
    #[serde(default)]
    results: Vec<ScanResult>,
    #[serde(default)]
    errors: Vec<ScanError>,
    #[serde(default)]
    paths: ScanPaths,
}

#[derive(Debug, Deserialize)]
struct ScanResult {
    check_id: String,
    path: PathBuf,
    start: Position,
    end: Position,
}

#[derive(Debug, Deserialize)]
struct Position {
    line: u32,
    col: u32,
}

impl From<&Position> for Point {
    fn from(p: &Position) -> Self {
        Point::new(p.line, p.col)
    }
}

#[derive(Debug, Deserialize)]
struct ScanError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ScanPaths {
    #[serde(default)]
    scanned: Vec<PathBuf>,
}

/// Turn raw `--json` output into a batch result against the expected files.
fn interpret(program: &Path, stdout: &[u8], files: &[PathBuf]) -> BatchOutput {
    let mut out = BatchOutput::default();

    let scan: ScanOutput = match serde_json::from_slice(stdout) {
        Ok(scan) => scan,
        Err(e) => {
            out.failure = Some(ToolError::Output {
                program: program.to_path_buf(),
                message: e.to_string(),
            });
            out.skipped = files.iter().cloned().collect();
            return out;
        }
    };

    let expected: BTreeSet<&PathBuf> = files.iter().collect();

    for error in &scan.errors {
        tracing::warn!(
            "{} error: {}",
            NAME,
            error.message.as_deref().unwrap_or("(no message)")
        );
        if let Some(path) = error.path.as_ref().filter(|p| expected.contains(p)) {
            out.error_paths.insert(path.clone());
        }
    }

    let scanned: BTreeSet<&PathBuf> = scan.paths.scanned.iter().collect();
    for path in scanned.difference(&expected) {
        tracing::warn!("{} unexpectedly scanned {}", NAME, path.display());
    }
    for path in expected.difference(&scanned) {
        tracing::warn!("{} unexpectedly skipped {}", NAME, path.display());
        out.skipped.insert((*path).clone());
    }

    for result in scan.results {
        let Some(id) = CHECK_ID
            .captures(&result.check_id)
            .and_then(|c| c[1].parse::<usize>().ok())
        else {
            tracing::warn!("unexpected {} result {:?}", NAME, result.check_id);
            continue;
        };
        if !expected.contains(&result.path) {
            continue;
        }
        let range = Range::new((&result.start).into(), (&result.end).into());
        out.matches.push((id, Match::new(result.path, range)));
    }

    out
}

#[async_trait]
impl BatchRunner for Semgrep {
    fn name(&self) -> &str {
        NAME
    }

    async fn run_batch(&self, queries: &[Query], root: &Path, files: &[PathBuf]) -> BatchOutput {
        let program = self.binary.clone();
        let rules: Vec<Value> = queries.iter().enumerate().map(|(i, q)| rule(i, q)).collect();

        // JSON is valid YAML; semgrep picks the parser from the suffix.
        let config = match tempfile::Builder::new()
            .prefix("stbench-rules-")
            .suffix(".yaml")
            .tempfile()
            .and_then(|mut file| {
                file.write_all(json!({ "rules": rules }).to_string().as_bytes())?;
                file.flush()?;
                Ok(file)
            }) {
            Ok(config) => config,
            Err(source) => {
                return BatchOutput {
                    skipped: files.iter().cloned().collect(),
                    failure: Some(ToolError::Io { program, source }),
                    ..Default::default()
                };
            }
        };

        let languages: BTreeSet<Language> = queries.iter().map(|q| q.language).collect();
        let mut command = self.scan();
        command.arg(format!("--config={}", config.path().display()));
        for language in &languages {
            for ext in language.exts() {
                command.arg(format!("--include=*{}", ext));
            }
        }
        command
            .arg(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        tracing::info!(
            "running {} with {} patterns on {}",
            NAME,
            queries.len(),
            root.display()
        );

        let output = match command.output().await {
            Ok(output) => output,
            Err(source) => {
                return BatchOutput {
                    skipped: files.iter().cloned().collect(),
                    failure: Some(ToolError::Spawn { program, source }),
                    ..Default::default()
                };
            }
        };

        let mut out = interpret(&program, &output.stdout, files);
        if !output.status.success() {
            tracing::error!(
                "{}: exit {} (config kept at {})",
                NAME,
                output.status,
                config.path().display()
            );
            // Keep the config for reproducing the failure.
            if let Err(e) = config.keep() {
                tracing::warn!("could not keep {} config: {}", NAME, e);
            }
            out.failure.get_or_insert(ToolError::Exit {
                program,
                status: output.status,
            });
        }
        out
    }

    async fn validate(&self, queries: &[Query], workers: usize) -> anyhow::Result<Vec<bool>> {
        self.check_patterns(queries, workers).await
    }
}
