//! The experiment store: memoized `(tool, spec, file)` executions.
//!
//! Every engine execution is recorded as a Run, unique on its triple, with
//! the matches it produced stored as Results. Re-running the pipeline only
//! invokes engines for triples that have no Run yet.
//!
//! # Write discipline
//!
//! SQLite allows one writer at a time, so every mutating transaction holds
//! the store's single write permit. Reads go straight to the pool. The
//! ensure-or-get helpers (`INSERT … ON CONFLICT DO NOTHING RETURNING`, then
//! `SELECT`) are only race-free under that discipline.
//!
//! # Execution shapes
//!
//! - [`Store::collect`]: one query on one file. A read decides hit or miss;
//!   on a miss the runner executes without the permit, then the Run and its
//!   Results are written in one transaction.
//! - [`Store::batch`]: `collect` over every spec × file, spread over a
//!   bounded set of tasks.
//! - [`Store::batch_x`]: one batched invocation for every spec × file. The
//!   whole register → invoke → persist sequence is one transaction, so a
//!   reader never sees a half-populated batch as cached.

use anyhow::{bail, Context, Result};
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool};
use sqlx::{QueryBuilder, Row};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use stbench_core::{Match, Point, Range, SpecData};

use crate::tools::{BatchRunner, Runner, ToolError};
use crate::{db, migrate};

/// Result rows per INSERT; 5 bound values each stays far below SQLite's
/// variable limit.
const INSERT_CHUNK: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spec {
    pub id: i64,
    pub data: SpecData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub id: i64,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Run {
    pub id: i64,
    pub tool_id: i64,
    pub spec_id: i64,
    pub file_id: i64,
}

/// Outcome of [`Store::batch_x`].
#[derive(Debug, Default)]
pub struct BatchXOutcome {
    /// Whether the runner was invoked; `false` on a full cache hit.
    pub invoked: bool,
    /// Runs whose stale Results were discarded before re-running.
    pub invalidated: usize,
    /// Files whose results should be excluded from comparison.
    pub dropped_paths: BTreeSet<PathBuf>,
    /// The runner's terminal failure, if any.
    pub failure: Option<ToolError>,
}

/// What [`Store::collect`] did with one triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collected {
    /// A Run already existed.
    Cached,
    /// The runner executed and its Run was recorded.
    Executed,
    /// The runner failed; nothing was recorded.
    Failed,
}

/// Counters of [`Store::batch`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchStats {
    pub cached: usize,
    pub executed: usize,
    /// Files the runner failed on for at least one spec.
    pub failed: BTreeSet<PathBuf>,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    write: Arc<Semaphore>,
}

impl Store {
    /// Open (creating if needed) and migrate the database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Delete every row.
    pub async fn truncate(&self) -> Result<()> {
        let _permit = self.write.acquire().await?;
        migrate::truncate(&self.pool).await
    }

    // ── ensure-or-get ───────────────────────────────────────────────────

    pub async fn tool(&self, name: &str) -> Result<Tool> {
        let _permit = self.write.acquire().await?;
        let mut conn = self.pool.acquire().await?;
        let id = ensure(
            &mut conn,
            sqlx::query_scalar("INSERT INTO tool (name) VALUES (?) ON CONFLICT DO NOTHING RETURNING id")
                .bind(name),
            sqlx::query_scalar("SELECT id FROM tool WHERE name = ?").bind(name),
        )
        .await
        .with_context(|| format!("Failed to register tool '{}'", name))?
        .0;
        Ok(Tool {
            id,
            name: name.to_string(),
        })
    }

    pub async fn spec(&self, data: &SpecData) -> Result<Spec> {
        let _permit = self.write.acquire().await?;
        let mut conn = self.pool.acquire().await?;
        let id = ensure_spec(&mut conn, data).await?;
        Ok(Spec {
            id,
            data: data.clone(),
        })
    }

    /// Ensure every bundle in one transaction, in order.
    pub async fn specs(&self, bundles: &[SpecData]) -> Result<Vec<Spec>> {
        let _permit = self.write.acquire().await?;
        let mut tx = self.pool.begin().await?;
        let mut specs = Vec::with_capacity(bundles.len());
        for data in bundles {
            let id = ensure_spec(&mut tx, data).await?;
            specs.push(Spec {
                id,
                data: data.clone(),
            });
        }
        tx.commit().await?;
        Ok(specs)
    }

    /// Ensure every path in one transaction, in order.
    pub async fn files(&self, paths: &[PathBuf]) -> Result<Vec<File>> {
        let _permit = self.write.acquire().await?;
        let mut tx = self.pool.begin().await?;
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let key = path_key(path)?;
            let (id, _) = ensure(
                &mut tx,
                sqlx::query_scalar("INSERT INTO file (path) VALUES (?) ON CONFLICT DO NOTHING RETURNING id")
                    .bind(key),
                sqlx::query_scalar("SELECT id FROM file WHERE path = ?").bind(key),
            )
            .await
            .with_context(|| format!("Failed to register file {}", path.display()))?;
            files.push(File {
                id,
                path: path.clone(),
            });
        }
        tx.commit().await?;
        Ok(files)
    }

    /// Existing-or-created Run for the triple, and whether it was created.
    pub async fn register(&self, tool: &Tool, spec: &Spec, file: &File) -> Result<(Run, bool)> {
        let _permit = self.write.acquire().await?;
        let mut conn = self.pool.acquire().await?;
        register_in(&mut conn, tool, spec, file).await
    }

    /// The Run for the triple, if it has been executed.
    pub async fn find_run(&self, tool: &Tool, spec: &Spec, file: &File) -> Result<Option<Run>> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM run WHERE tool_id = ? AND spec_id = ? AND file_id = ?")
                .bind(tool.id)
                .bind(spec.id)
                .bind(file.id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id.map(|id| Run {
            id,
            tool_id: tool.id,
            spec_id: spec.id,
            file_id: file.id,
        }))
    }

    // ── execution ───────────────────────────────────────────────────────

    /// Run `runner` on the triple unless it is cached. A failed execution
    /// registers nothing, so the next pass retries it.
    pub async fn collect(&self, tool: &Tool, spec: &Spec, file: &File, runner: &dyn Runner) -> Result<Collected> {
        if self.find_run(tool, spec, file).await?.is_some() {
            return Ok(Collected::Cached);
        }

        let Some(query) = spec.data.query(&tool.name) else {
            bail!("spec {} has no {} query", spec.id, tool.name);
        };
        let matches = match runner.try_run(&query, &file.path).await {
            Ok(matches) => matches,
            Err(e) => {
                tracing::warn!(file = %file.path.display(), query = %query, "{}: {}", tool.name, e);
                return Ok(Collected::Failed);
            }
        };

        let _permit = self.write.acquire().await?;
        let mut tx = self.pool.begin().await?;
        let (run, created) = register_in(&mut tx, tool, spec, file).await?;
        if created {
            insert_results(&mut tx, matches.iter().map(|m| (run.id, m.range))).await?;
        }
        tx.commit().await?;
        Ok(Collected::Executed)
    }

    /// `collect` over every spec × file, at most `workers` at a time.
    ///
    /// The first error stops new work and cancels what is in flight.
    pub async fn batch(
        &self,
        tool: &Tool,
        specs: &[Spec],
        files: &[File],
        runner: Arc<dyn Runner>,
        workers: usize,
    ) -> Result<BatchStats> {
        let workers = workers.max(1);
        let mut tasks = JoinSet::new();
        let mut tally = Tally::default();

        'spawn: for spec in specs {
            for file in files {
                while tasks.len() >= workers {
                    if let Some(joined) = tasks.join_next().await {
                        tally.add(joined);
                    }
                }
                if tally.error.is_some() {
                    break 'spawn;
                }

                let store = self.clone();
                let (tool, spec, file) = (tool.clone(), spec.clone(), file.clone());
                let runner = runner.clone();
                tasks.spawn(async move {
                    let collected = store.collect(&tool, &spec, &file, runner.as_ref()).await?;
                    Ok::<_, anyhow::Error>((collected, file.path))
                });
            }
        }

        if tally.error.is_some() {
            tasks.abort_all();
        }
        while let Some(joined) = tasks.join_next().await {
            tally.add(joined);
        }

        match tally.error {
            Some(e) => Err(e),
            None => Ok(tally.stats),
        }
    }

    /// One batched invocation covering every spec × file under `root`.
    ///
    /// Runs are registered for the full cross-product first. If all of them
    /// already existed the runner is not invoked. If only some existed, their
    /// Results are discarded and the whole batch re-runs.
    pub async fn batch_x(
        &self,
        tool: &Tool,
        specs: &[Spec],
        root: &Path,
        files: &[File],
        runner: &dyn BatchRunner,
    ) -> Result<BatchXOutcome> {
        let queries = specs
            .iter()
            .map(|s| {
                s.data
                    .query(&tool.name)
                    .with_context(|| format!("spec {} has no {} query", s.id, tool.name))
            })
            .collect::<Result<Vec<_>>>()?;

        let _permit = self.write.acquire().await?;
        let mut tx = self.pool.begin().await?;

        let mut runs: HashMap<(usize, &Path), Run> = HashMap::new();
        let mut cached = Vec::new();
        for (i, spec) in specs.iter().enumerate() {
            for file in files {
                let (run, created) = register_in(&mut tx, tool, spec, file).await?;
                if !created {
                    cached.push(run.id);
                }
                runs.insert((i, file.path.as_path()), run);
            }
        }

        if cached.len() == runs.len() {
            tx.commit().await?;
            return Ok(BatchXOutcome::default());
        }

        let mut outcome = BatchXOutcome {
            invoked: true,
            ..Default::default()
        };

        if !cached.is_empty() {
            tracing::warn!(
                "{}: {} of {} runs under {} were cached; re-running the batch",
                tool.name,
                cached.len(),
                runs.len(),
                root.display()
            );
            for chunk in cached.chunks(INSERT_CHUNK) {
                let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM result WHERE run_id IN (");
                let mut ids = qb.separated(", ");
                for id in chunk {
                    ids.push_bind(*id);
                }
                qb.push(")");
                qb.build().execute(&mut *tx).await?;
            }
            outcome.invalidated = cached.len();
        }

        let paths: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();
        let output = runner.run_batch(&queries, root, &paths).await;
        outcome.dropped_paths = output.dropped_paths();
        outcome.failure = output.failure;

        let mut rows = Vec::with_capacity(output.matches.len());
        for (i, m) in &output.matches {
            match runs.get(&(*i, m.path.as_path())) {
                Some(run) => rows.push((run.id, m.range)),
                None => tracing::warn!("{}: result outside the batch: {} (query {})", tool.name, m, i),
            }
        }
        insert_results(&mut tx, rows).await?;
        tx.commit().await?;

        Ok(outcome)
    }

    // ── results ─────────────────────────────────────────────────────────

    /// Results of `tool` for `spec`, grouped by file, with their row ids.
    pub async fn results(&self, tool: &Tool, spec: &Spec) -> Result<HashMap<i64, Vec<(i64, Match)>>> {
        let rows = sqlx::query(
            r#"
            SELECT result.id, run.file_id, file.path, result.sr, result.sc, result.er, result.ec
            FROM result
            JOIN run ON run.id = result.run_id
            JOIN file ON file.id = run.file_id
            WHERE run.tool_id = ? AND run.spec_id = ?
            ORDER BY result.id
            "#,
        )
        .bind(tool.id)
        .bind(spec.id)
        .fetch_all(&self.pool)
        .await?;

        let mut out: HashMap<i64, Vec<(i64, Match)>> = HashMap::new();
        for row in rows {
            let path: String = row.get("path");
            let range = Range::new(
                Point::new(coordinate(row.get("sr"))?, coordinate(row.get("sc"))?),
                Point::new(coordinate(row.get("er"))?, coordinate(row.get("ec"))?),
            );
            out.entry(row.get("file_id"))
                .or_default()
                .push((row.get("id"), Match::new(path, range)));
        }
        Ok(out)
    }

    /// Overwrite the coordinates of existing Results in one transaction.
    pub async fn update_results(&self, updates: &[(i64, Range)]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let _permit = self.write.acquire().await?;
        let mut tx = self.pool.begin().await?;
        for (id, range) in updates {
            sqlx::query("UPDATE result SET sr = ?, sc = ?, er = ?, ec = ? WHERE id = ?")
                .bind(range.start.row)
                .bind(range.start.column)
                .bind(range.end.row)
                .bind(range.end.column)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Remove every Run (of any tool) for `paths`; their Results cascade.
    pub async fn drop_runs(&self, paths: &BTreeSet<PathBuf>) -> Result<u64> {
        let _permit = self.write.acquire().await?;
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for path in paths {
            removed += sqlx::query("DELETE FROM run WHERE file_id IN (SELECT id FROM file WHERE path = ?)")
                .bind(path_key(path)?)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    /// Delete File rows by path; Runs and Results cascade.
    pub async fn clear_files(&self, paths: &[PathBuf]) -> Result<u64> {
        let _permit = self.write.acquire().await?;
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for path in paths {
            removed += sqlx::query("DELETE FROM file WHERE path = ?")
                .bind(path_key(path)?)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    /// Number of Runs, optionally for one tool.
    pub async fn run_count(&self, tool: Option<&Tool>) -> Result<i64> {
        let count = match tool {
            Some(tool) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM run WHERE tool_id = ?")
                    .bind(tool.id)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM run")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }
}

type Scalar<'q> = sqlx::query::QueryScalar<'q, Sqlite, i64, sqlx::sqlite::SqliteArguments<'q>>;

/// Try `insert`; when it hits the unique constraint, `select` the existing
/// row. Returns the id and whether it was created.
async fn ensure(conn: &mut SqliteConnection, insert: Scalar<'_>, select: Scalar<'_>) -> Result<(i64, bool)> {
    if let Some(id) = insert.fetch_optional(&mut *conn).await? {
        return Ok((id, true));
    }
    let id = select.fetch_one(&mut *conn).await?;
    Ok((id, false))
}

async fn ensure_spec(conn: &mut SqliteConnection, data: &SpecData) -> Result<i64> {
    let key = data.key();
    let json = data.to_json();
    let (id, _) = ensure(
        conn,
        sqlx::query_scalar("INSERT INTO spec (key, data) VALUES (?, ?) ON CONFLICT DO NOTHING RETURNING id")
            .bind(&key)
            .bind(&json),
        sqlx::query_scalar("SELECT id FROM spec WHERE key = ?").bind(&key),
    )
    .await
    .with_context(|| format!("Failed to register spec {}", json))?;
    Ok(id)
}

async fn register_in(conn: &mut SqliteConnection, tool: &Tool, spec: &Spec, file: &File) -> Result<(Run, bool)> {
    let created_at = chrono::Utc::now().to_rfc3339();
    let (id, created) = ensure(
        conn,
        sqlx::query_scalar(
            "INSERT INTO run (tool_id, spec_id, file_id, created_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT DO NOTHING RETURNING id",
        )
        .bind(tool.id)
        .bind(spec.id)
        .bind(file.id)
        .bind(&created_at),
        sqlx::query_scalar("SELECT id FROM run WHERE tool_id = ? AND spec_id = ? AND file_id = ?")
            .bind(tool.id)
            .bind(spec.id)
            .bind(file.id),
    )
    .await?;

    Ok((
        Run {
            id,
            tool_id: tool.id,
            spec_id: spec.id,
            file_id: file.id,
        },
        created,
    ))
}

async fn insert_results(
    conn: &mut SqliteConnection,
    rows: impl IntoIterator<Item = (i64, Range)>,
) -> Result<()> {
    let rows: Vec<(i64, Range)> = rows.into_iter().collect();
    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO result (run_id, sr, sc, er, ec) ");
        qb.push_values(chunk, |mut b, (run_id, range)| {
            b.push_bind(*run_id)
                .push_bind(range.start.row)
                .push_bind(range.start.column)
                .push_bind(range.end.row)
                .push_bind(range.end.column);
        });
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

fn path_key(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("Path is not valid UTF-8: {}", path.display()))
}

/// Running totals of a [`Store::batch`], keeping the first error.
#[derive(Default)]
struct Tally {
    stats: BatchStats,
    error: Option<anyhow::Error>,
}

impl Tally {
    fn add(&mut self, joined: Result<Result<(Collected, PathBuf)>, tokio::task::JoinError>) {
        match joined.map_err(anyhow::Error::from).and_then(|r| r) {
            Ok((Collected::Cached, _)) => self.stats.cached += 1,
            Ok((Collected::Executed, _)) => self.stats.executed += 1,
            Ok((Collected::Failed, path)) => {
                self.stats.failed.insert(path);
            }
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
        }
    }
}

fn coordinate(value: i64) -> Result<u32> {
    u32::try_from(value).with_context(|| format!("Stored coordinate out of range: {}", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stbench_core::{Language, Query};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    use crate::tools::BatchOutput;

    async fn open() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("matches.db")).await.unwrap();
        (dir, store)
    }

    fn bundle(syntax: &str) -> SpecData {
        let q = Query::new(Language::JavaScript, syntax);
        SpecData::new(Language::JavaScript).with("fake", &q)
    }

    /// Reports one match per call at a fixed range of the given file.
    struct Counting(AtomicUsize);

    #[async_trait]
    impl Runner for Counting {
        fn name(&self) -> &str {
            "fake"
        }

        async fn try_run(&self, _query: &Query, file: &Path) -> Result<Vec<Match>, ToolError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Match::new(file, Range::new(Point::new(1, 1), Point::new(1, 4)))])
        }
    }

    /// Fails on `bad.js` and tracks how many calls overlap.
    #[derive(Default)]
    struct Flaky {
        calls: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Runner for Flaky {
        fn name(&self) -> &str {
            "fake"
        }

        async fn try_run(&self, _query: &Query, file: &Path) -> Result<Vec<Match>, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if file.ends_with("bad.js") {
                return Err(ToolError::Output {
                    program: PathBuf::from("fake"),
                    message: "crashed".to_string(),
                });
            }
            Ok(Vec::new())
        }
    }

    struct CountingBatch(AtomicUsize);

    #[async_trait]
    impl BatchRunner for CountingBatch {
        fn name(&self) -> &str {
            "fake"
        }

        async fn run_batch(&self, queries: &[Query], _root: &Path, files: &[PathBuf]) -> BatchOutput {
            self.0.fetch_add(1, Ordering::SeqCst);
            let mut out = BatchOutput::default();
            for i in 0..queries.len() {
                for f in files {
                    out.matches
                        .push((i, Match::new(f, Range::new(Point::new(2, 1), Point::new(2, 3)))));
                }
            }
            out
        }
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let (_dir, store) = open().await;
        let a = store.tool("fake").await.unwrap();
        let b = store.tool("fake").await.unwrap();
        assert_eq!(a, b);

        let s1 = store.spec(&bundle("f()")).await.unwrap();
        let s2 = store.spec(&bundle("f()")).await.unwrap();
        assert_eq!(s1.id, s2.id);
        let s3 = store.spec(&bundle("g()")).await.unwrap();
        assert_ne!(s1.id, s3.id);

        let f1 = store.files(&[PathBuf::from("a.js")]).await.unwrap();
        let f2 = store.files(&[PathBuf::from("a.js")]).await.unwrap();
        assert_eq!(f1, f2);
    }

    #[tokio::test]
    async fn test_register_twice() {
        let (_dir, store) = open().await;
        let tool = store.tool("fake").await.unwrap();
        let spec = store.spec(&bundle("f()")).await.unwrap();
        let file = store.files(&[PathBuf::from("a.js")]).await.unwrap().remove(0);

        let (first, created) = store.register(&tool, &spec, &file).await.unwrap();
        assert!(created);
        let (second, created) = store.register(&tool, &spec, &file).await.unwrap();
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(store.run_count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_collect_skips_cached() {
        let (_dir, store) = open().await;
        let tool = store.tool("fake").await.unwrap();
        let spec = store.spec(&bundle("f()")).await.unwrap();
        let file = store.files(&[PathBuf::from("a.js")]).await.unwrap().remove(0);
        let runner = Counting(AtomicUsize::new(0));

        assert_eq!(
            store.collect(&tool, &spec, &file, &runner).await.unwrap(),
            Collected::Executed
        );
        assert_eq!(
            store.collect(&tool, &spec, &file, &runner).await.unwrap(),
            Collected::Cached
        );
        assert_eq!(runner.0.load(Ordering::SeqCst), 1);

        let results = store.results(&tool, &spec).await.unwrap();
        assert_eq!(results[&file.id].len(), 1);
    }

    #[tokio::test]
    async fn test_batch_cross_product() {
        let (_dir, store) = open().await;
        let tool = store.tool("fake").await.unwrap();
        let specs = store
            .specs(&[bundle("a()"), bundle("b()"), bundle("c()")])
            .await
            .unwrap();
        let files = store
            .files(&[PathBuf::from("x.js"), PathBuf::from("y.js")])
            .await
            .unwrap();
        let runner = Arc::new(Counting(AtomicUsize::new(0)));

        let stats = store
            .batch(&tool, &specs, &files, runner.clone(), 4)
            .await
            .unwrap();
        assert_eq!((stats.cached, stats.executed), (0, 6));

        let stats = store.batch(&tool, &specs, &files, runner.clone(), 4).await.unwrap();
        assert_eq!((stats.cached, stats.executed), (6, 0));
        assert!(stats.failed.is_empty());
        assert_eq!(runner.0.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_batch_stays_within_workers() {
        let (_dir, store) = open().await;
        let tool = store.tool("fake").await.unwrap();
        let specs = store
            .specs(&[bundle("a()"), bundle("b()"), bundle("c()"), bundle("d()")])
            .await
            .unwrap();
        let paths: Vec<PathBuf> = (0..8).map(|i| PathBuf::from(format!("f{}.js", i))).collect();
        let files = store.files(&paths).await.unwrap();
        let runner = Arc::new(Flaky::default());

        let stats = store.batch(&tool, &specs, &files, runner.clone(), 3).await.unwrap();
        assert_eq!(stats.executed, 32);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 32);
        let peak = runner.peak.load(Ordering::SeqCst);
        assert!((1..=3).contains(&peak), "peak concurrency {}", peak);
    }

    #[tokio::test]
    async fn test_batch_failed_file_is_not_cached() {
        let (_dir, store) = open().await;
        let tool = store.tool("fake").await.unwrap();
        let specs = store.specs(&[bundle("a()"), bundle("b()")]).await.unwrap();
        let files = store
            .files(&[PathBuf::from("ok.js"), PathBuf::from("bad.js")])
            .await
            .unwrap();
        let runner = Arc::new(Flaky::default());

        let stats = store.batch(&tool, &specs, &files, runner.clone(), 2).await.unwrap();
        assert_eq!(stats.executed, 2);
        assert_eq!(stats.failed, BTreeSet::from([PathBuf::from("bad.js")]));
        assert_eq!(store.run_count(Some(&tool)).await.unwrap(), 2);

        // Only the failed file runs again.
        let stats = store.batch(&tool, &specs, &files, runner.clone(), 2).await.unwrap();
        assert_eq!((stats.cached, stats.executed), (2, 0));
        assert_eq!(stats.failed.len(), 1);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_batch_stops_on_store_error() {
        let (_dir, store) = open().await;
        let tool = store.tool("fake").await.unwrap();
        // No query for "fake": collect fails before invoking the runner.
        let q = Query::new(Language::JavaScript, "f()");
        let other = store
            .spec(&SpecData::new(Language::JavaScript).with("other", &q))
            .await
            .unwrap();
        let paths: Vec<PathBuf> = (0..50).map(|i| PathBuf::from(format!("f{}.js", i))).collect();
        let files = store.files(&paths).await.unwrap();
        let runner = Arc::new(Flaky::default());

        let err = store
            .batch(&tool, &[other], &files, runner.clone(), 2)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no fake query"));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.run_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_x_full_hit_and_partial_invalidation() {
        let (_dir, store) = open().await;
        let tool = store.tool("fake").await.unwrap();
        let specs = store.specs(&[bundle("a()"), bundle("b()")]).await.unwrap();
        let files = store
            .files(&[PathBuf::from("x.js"), PathBuf::from("y.js")])
            .await
            .unwrap();
        let runner = CountingBatch(AtomicUsize::new(0));

        let outcome = store
            .batch_x(&tool, &specs, Path::new("."), &files, &runner)
            .await
            .unwrap();
        assert!(outcome.invoked);
        assert_eq!(runner.0.load(Ordering::SeqCst), 1);

        let outcome = store
            .batch_x(&tool, &specs, Path::new("."), &files, &runner)
            .await
            .unwrap();
        assert!(!outcome.invoked);
        assert_eq!(runner.0.load(Ordering::SeqCst), 1);

        // Losing one file's runs makes the batch partial.
        let removed = store
            .drop_runs(&BTreeSet::from([PathBuf::from("y.js")]))
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let outcome = store
            .batch_x(&tool, &specs, Path::new("."), &files, &runner)
            .await
            .unwrap();
        assert!(outcome.invoked);
        assert_eq!(outcome.invalidated, 2);
        assert_eq!(runner.0.load(Ordering::SeqCst), 2);

        // Stale results were replaced, not duplicated.
        for spec in &specs {
            let results = store.results(&tool, spec).await.unwrap();
            for file in &files {
                assert_eq!(results[&file.id].len(), 1);
            }
        }
    }

    #[tokio::test]
    async fn test_update_and_clear() {
        let (_dir, store) = open().await;
        let tool = store.tool("fake").await.unwrap();
        let spec = store.spec(&bundle("f()")).await.unwrap();
        let file = store.files(&[PathBuf::from("a.js")]).await.unwrap().remove(0);
        store
            .collect(&tool, &spec, &file, &Counting(AtomicUsize::new(0)))
            .await
            .unwrap();

        let (id, _) = store.results(&tool, &spec).await.unwrap()[&file.id][0].clone();
        let wider = Range::new(Point::new(1, 1), Point::new(1, 9));
        store.update_results(&[(id, wider)]).await.unwrap();
        let results = store.results(&tool, &spec).await.unwrap();
        assert_eq!(results[&file.id][0].1.range, wider);

        assert_eq!(store.clear_files(&[PathBuf::from("a.js")]).await.unwrap(), 1);
        assert_eq!(store.run_count(Some(&tool)).await.unwrap(), 0);
        assert!(store.results(&tool, &spec).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncate() {
        let (_dir, store) = open().await;
        store.tool("fake").await.unwrap();
        store.truncate().await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tool")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
