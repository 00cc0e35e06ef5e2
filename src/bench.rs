//! Benchmark pipeline orchestration.
//!
//! rules → canonical queries → partial queries → corpus → collection
//! (stsearch per file, semgrep batched per project) → reconciliation →
//! diff reports. Every phase writes its table to the results directory and
//! its headline numbers through the [`Reporter`].

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stbench_core::rules::{self, Rule};
use stbench_core::{
    canonical, prefix, reconcile, to_stsearch, Language, Match, MatchingMatrix, Query, Range,
    SpecData, Summary,
};

use crate::config::Config;
use crate::corpus::{self, Project};
use crate::report::{Reporter, Results};
use crate::select;
use crate::store::{Spec, Store, Tool};
use crate::tools::{BatchRunner, Runner};

/// Where a benchmark run reads from.
#[derive(Debug, Clone)]
pub struct Inputs {
    /// Rule file or directory of rule files.
    pub queries: PathBuf,
    /// Corpus manifest.
    pub corpus: PathBuf,
}

/// The engines under comparison: the per-file engine on the left, the
/// batched one on the right.
#[derive(Clone)]
pub struct Engines {
    pub stsearch: Arc<dyn Runner>,
    pub semgrep: Arc<dyn BatchRunner>,
}

/// Headline numbers of a finished run.
#[derive(Debug, Default)]
pub struct Outcome {
    pub rules: usize,
    pub complete: usize,
    pub partials: usize,
    pub projects: usize,
    pub files: usize,
    pub reconciled: usize,
    pub with_results: usize,
    pub matrix: Option<MatchingMatrix>,
    pub dropped_paths: BTreeSet<PathBuf>,
}

pub async fn run(
    config: &Config,
    inputs: &Inputs,
    results: &Results,
    engines: Engines,
    reporter: &mut Reporter,
) -> Result<Outcome> {
    let mut outcome = Outcome::default();
    let workers = config.run.effective_workers();

    tracing::info!("queries: {}", inputs.queries.display());
    let rules = load_rules(&inputs.queries)?;
    results.save_csv(
        "rules",
        rules
            .iter()
            .map(|r| [r.source.display().to_string(), r.id.clone()]),
    )?;
    reporter.line(format_args!("{} semgrep rules", rules.len()));
    outcome.rules = rules.len();

    let mut queries = extract(&rules);
    if config.tools.semgrep.validate {
        let candidates: Vec<Query> = queries.keys().cloned().collect();
        let valid = engines.semgrep.validate(&candidates, workers).await?;
        let mut invalid = 0;
        for (query, ok) in candidates.iter().zip(valid) {
            if !ok {
                tracing::warn!("dropping invalid query {}", query);
                queries.remove(query);
                invalid += 1;
            }
        }
        if invalid > 0 {
            reporter.line(format_args!("{} invalid queries dropped", invalid));
        }
    }
    results.save_csv(
        "complete",
        queries
            .iter()
            .map(|(sg, st)| [sg.language.to_string(), sg.syntax.clone(), st.syntax.clone()]),
    )?;
    reporter.line(format_args!("{} unique queries", queries.len()));
    outcome.complete = queries.len();

    let prefixes: BTreeMap<&Query, Vec<Query>> =
        queries.keys().map(|q| (q, prefix::prefixes(q))).collect();
    results.save_csv(
        "partials",
        prefixes.iter().map(|(q, ps)| {
            [q.language.to_string(), q.syntax.clone()]
                .into_iter()
                .chain(ps.iter().map(|p| p.syntax.clone()))
                .collect::<Vec<_>>()
        }),
    )?;
    let partials: BTreeSet<Query> = prefixes
        .values()
        .flatten()
        .filter(|p| !queries.contains_key(*p))
        .cloned()
        .collect();
    reporter.line(format_args!("{} partial queries", partials.len()));
    outcome.partials = partials.len();

    let languages: BTreeSet<Language> = queries.keys().map(|q| q.language).collect();
    reporter.line(format_args!(
        "languages: {}",
        languages
            .iter()
            .map(Language::to_string)
            .collect::<Vec<_>>()
            .join(",")
    ));

    tracing::info!("corpus: {}", inputs.corpus.display());
    let projects = corpus::discover(&inputs.corpus, &languages, &config.corpus.exclude_globs)?;
    results.save_csv(
        "projects",
        projects.iter().map(|p| [p.root.display().to_string()]),
    )?;
    let files: Vec<&PathBuf> = projects.iter().flat_map(|p| &p.files).collect();
    reporter.line(format_args!("{} projects included", projects.len()));
    reporter.line(format_args!("{} files included", files.len()));
    outcome.projects = projects.len();
    outcome.files = files.len();

    let sizes = files
        .iter()
        .map(|f| std::fs::metadata(f).map(|m| m.len() as f64))
        .collect::<std::io::Result<Vec<_>>>()
        .context("Failed to stat corpus files")?;
    if let Some(summary) = Summary::new("file size", sizes, "B") {
        reporter.line(summary);
    }

    tracing::info!("collecting matches");
    let store = Store::open(&config.db_path(results.dir())).await?;
    if config.run.fresh {
        store.truncate().await?;
    }
    let st = store.tool(engines.stsearch.name()).await?;
    let sg = store.tool(engines.semgrep.name()).await?;

    let complete = store
        .specs(
            &queries
                .iter()
                .map(|(sq, tq)| {
                    SpecData::new(sq.language)
                        .with(&sg.name, sq)
                        .with(&st.name, tq)
                })
                .collect::<Vec<_>>(),
        )
        .await?;

    // Each semgrep-form query, complete or partial, and the Spec its
    // stsearch translation ran under.
    let mut progress_specs: BTreeMap<Query, i64> = queries
        .keys()
        .cloned()
        .zip(complete.iter().map(|s| s.id))
        .collect();

    let mut partial_bundles: BTreeMap<String, SpecData> = BTreeMap::new();
    let mut partial_keys = Vec::with_capacity(partials.len());
    for q in &partials {
        let data = SpecData::new(q.language).with(&st.name, &to_stsearch(q));
        partial_keys.push((q.clone(), data.key()));
        partial_bundles.entry(data.key()).or_insert(data);
    }
    let partial_specs = store
        .specs(&partial_bundles.into_values().collect::<Vec<_>>())
        .await?;
    let partial_ids: HashMap<String, i64> = partial_specs
        .iter()
        .map(|s| (s.data.key(), s.id))
        .collect();
    for (q, key) in partial_keys {
        if let Some(id) = partial_ids.get(&key) {
            progress_specs.insert(q, *id);
        }
    }

    for project in &projects {
        let dropped = collect_project(
            &store,
            &engines,
            (&st, &sg),
            (complete.as_slice(), partial_specs.as_slice()),
            project,
            workers,
        )
        .await?;
        outcome.dropped_paths.extend(dropped);
    }

    if config.run.reconcile {
        tracing::info!("reconciling matches");
        let n = reconcile_matches(&store, &st, &sg, &complete).await?;
        reporter.line(format_args!("{} {} matches reconciled", n, sg.name));
        outcome.reconciled = n;
    }

    tracing::info!("analyzing matches");
    let diffs = select::qdiff(store.pool(), &st, &sg).await?;
    results.save_csv(
        "matches",
        diffs.iter().map(|d| {
            [
                d.spec.data.language().map(|l| l.to_string()).unwrap_or_default(),
                d.spec.data.syntax(&sg.name).unwrap_or_default().to_string(),
                d.spec.data.syntax(&st.name).unwrap_or_default().to_string(),
                d.left_only.to_string(),
                d.both.to_string(),
                d.right_only.to_string(),
            ]
        }),
    )?;

    let selected: Vec<&select::QDiff> = diffs.iter().filter(|d| !d.is_empty()).collect();
    reporter.line(format_args!("selected {} queries w/ results", selected.len()));
    outcome.with_results = selected.len();

    if !selected.is_empty() {
        let sum = |f: fn(&select::QDiff) -> i64| selected.iter().map(|d| f(d).max(0) as u64).sum::<u64>();
        let matrix = MatchingMatrix::new(
            &st.name,
            sum(|d| d.left_only),
            sum(|d| d.both),
            sum(|d| d.right_only),
            &sg.name,
        );
        reporter.line(&matrix);
        let no_excluded = selected.iter().filter(|d| d.right_only == 0).count();
        reporter.line(format_args!(
            "{:.2}% queries w/o excluded",
            100.0 * no_excluded as f64 / selected.len() as f64
        ));
        outcome.matrix = Some(matrix);
    }

    let totals: HashMap<i64, i64> = select::qtotals(store.pool(), &st)
        .await?
        .into_iter()
        .map(|(spec, total)| (spec.id, total))
        .collect();
    results.save_csv(
        "progress",
        queries.keys().map(|q| {
            let series = progress_specs
                .iter()
                .filter(|(sm, _)| sm.language == q.language && q.syntax.starts_with(&sm.syntax))
                .map(|(_, id)| totals.get(id).copied().unwrap_or_default().to_string());
            [q.language.to_string(), q.syntax.clone()]
                .into_iter()
                .chain(series)
                .collect::<Vec<_>>()
        }),
    )?;

    reporter.line(format_args!(
        "{} paths dropped due to errors",
        outcome.dropped_paths.len()
    ));
    reporter.save(results)?;
    store.close().await;

    Ok(outcome)
}

/// Every rule under `source` that is not deprecated.
fn load_rules(source: &Path) -> Result<Vec<Rule>> {
    let rules = rules::load_rules(source)
        .with_context(|| format!("Failed to load rules from {}", source.display()))?;
    Ok(rules
        .into_iter()
        .filter(|rule| {
            if rule.deprecated() {
                tracing::warn!("skipping deprecated rule {} ({})", rule.id, rule.source.display());
                false
            } else {
                true
            }
        })
        .collect())
}

/// Canonical semgrep queries of `rules`, each with its stsearch
/// translation. Rules with operators that cannot be read are skipped.
pub fn extract(rules: &[Rule]) -> BTreeMap<Query, Query> {
    let supported: BTreeSet<Language> = Language::ALL.iter().copied().collect();
    let mut queries = BTreeMap::new();
    for rule in rules {
        let patterns = match rules::patterns(&rule.tree, &supported) {
            Ok(patterns) => patterns,
            Err(e) => {
                tracing::warn!("skipping rule {}: {}", rule.id, e);
                continue;
            }
        };
        for pattern in patterns {
            let sg = canonical(&pattern);
            let st = to_stsearch(&sg);
            tracing::debug!("{} => {} => {}", pattern, sg.syntax, st.syntax);
            queries.insert(sg, st);
        }
    }
    queries
}

/// Collect one project. Returns the paths whose runs were discarded.
async fn collect_project(
    store: &Store,
    engines: &Engines,
    (st, sg): (&Tool, &Tool),
    (complete, partials): (&[Spec], &[Spec]),
    project: &Project,
    workers: usize,
) -> Result<BTreeSet<PathBuf>> {
    tracing::info!(" > project: {}", project.root.display());
    let files = store.files(&project.files).await?;

    tracing::info!("    * complete - {}", st.name);
    let complete_stats = store
        .batch(st, complete, &files, engines.stsearch.clone(), workers)
        .await?;
    tracing::debug!(
        "{} cached, {} executed",
        complete_stats.cached,
        complete_stats.executed
    );

    tracing::info!("    * complete - {}", sg.name);
    let batch = store
        .batch_x(sg, complete, &project.root, &files, engines.semgrep.as_ref())
        .await?;
    if let Some(failure) = &batch.failure {
        tracing::warn!("{} on {}: {}", sg.name, project.root.display(), failure);
    }

    tracing::info!("    * partials - {}", st.name);
    let partial_stats = store
        .batch(st, partials, &files, engines.stsearch.clone(), workers)
        .await?;

    let mut dropped = batch.dropped_paths;
    dropped.extend(complete_stats.failed);
    dropped.extend(partial_stats.failed);
    if !dropped.is_empty() {
        for path in &dropped {
            tracing::warn!("dropping runs of {}", path.display());
        }
        store.drop_runs(&dropped).await?;
    }
    Ok(dropped)
}

/// Snap semgrep Results of every complete Spec onto the stsearch Results of
/// the same Spec and file. Returns the number of rewritten Results.
pub async fn reconcile_matches(store: &Store, st: &Tool, sg: &Tool, specs: &[Spec]) -> Result<usize> {
    let mut updates = Vec::new();
    for spec in specs {
        let reference = store.results(st, spec).await?;
        let narrow = store.results(sg, spec).await?;
        let found = tokio::task::spawn_blocking(move || snap(&reference, narrow)).await?;
        updates.extend(found);
    }
    store.update_results(&updates).await?;
    Ok(updates.len())
}

fn snap(
    reference: &HashMap<i64, Vec<(i64, Match)>>,
    narrow: HashMap<i64, Vec<(i64, Match)>>,
) -> Vec<(i64, Range)> {
    let mut updates = Vec::new();
    for (file_id, results) in narrow {
        let Some(wide) = reference.get(&file_id) else {
            continue;
        };
        let wide: HashSet<Match> = wide.iter().map(|(_, m)| m.clone()).collect();
        for (id, m) in results {
            let snapped = reconcile(&m, &wide);
            if snapped.range != m.range {
                tracing::debug!("reconciled {} => {}", m, snapped);
                updates.push((id, snapped.range));
            }
        }
    }
    updates
}
