//! # stbench CLI
//!
//! Compares stsearch against semgrep on a corpus of projects.
//!
//! ## Usage
//!
//! ```bash
//! stbench --config ./stbench.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `stbench run` | Extract queries, collect matches, write reports |
//! | `stbench canonical <pattern>` | Print a pattern's canonical and stsearch forms |
//! | `stbench clear <paths>` | Forget stored runs of the given files |
//!
//! ## Examples
//!
//! ```bash
//! # Full benchmark; results (and matches.db) land in ./out
//! stbench run --queries rules/ --corpus corpus/projects.txt --results out
//!
//! # Start over from an empty store
//! stbench run --queries rules/ --corpus corpus/projects.txt --results out --fresh
//!
//! # Re-run two files on the next `run`
//! stbench clear --results out corpus/app/src/a.js corpus/app/src/b.js
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use stbench::bench::{self, Engines, Inputs};
use stbench::config;
use stbench::report::{Reporter, Results, TRACE_FILE};
use stbench::store::Store;
use stbench::tools::{Semgrep, Stsearch};
use stbench_core::{canonical, to_stsearch, Language, Query};

/// stbench — a structural search benchmark.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; built-in defaults apply when the file does not exist.
#[derive(Parser)]
#[command(name = "stbench", about = "Benchmark stsearch against semgrep", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./stbench.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the benchmark.
    ///
    /// Previously collected (tool, query, file) runs are reused from the
    /// store unless `--fresh` is given.
    Run {
        /// Rule file, or directory of rule files.
        #[arg(long)]
        queries: PathBuf,

        /// Corpus manifest: one project directory per line.
        #[arg(long)]
        corpus: PathBuf,

        /// Output directory for reports, logs and the default store.
        #[arg(long)]
        results: PathBuf,

        /// Empty the store first.
        #[arg(long)]
        fresh: bool,

        /// Concurrent per-file invocations (overrides `run.workers`).
        #[arg(long)]
        workers: Option<usize>,

        /// Compare raw spans without reconciliation.
        #[arg(long)]
        no_reconcile: bool,
    },

    /// Print the canonical semgrep form of a pattern and its stsearch
    /// translation.
    Canonical {
        pattern: String,

        #[arg(long, default_value = "javascript")]
        lang: String,
    },

    /// Delete files from the store; their runs and results go with them.
    Clear {
        /// Results directory holding the store.
        #[arg(long)]
        results: PathBuf,

        /// File paths exactly as stored.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Canonical { pattern, lang } => {
            init_tracing(None)?;
            let query = canonical(&Query::new(Language::new(&lang)?, pattern));
            println!("semgrep:  {}", query.syntax);
            println!("stsearch: {}", to_stsearch(&query).syntax);
        }
        Commands::Clear { results, paths } => {
            init_tracing(None)?;
            let cfg = config::load_config(&cli.config)?;
            let store = Store::open(&cfg.db_path(&results)).await?;
            let removed = store.clear_files(&paths).await?;
            println!("cleared {} of {} files", removed, paths.len());
            store.close().await;
        }
        Commands::Run {
            queries,
            corpus,
            results,
            fresh,
            workers,
            no_reconcile,
        } => {
            let mut cfg = config::load_config(&cli.config)?;
            cfg.run.fresh |= fresh;
            cfg.run.reconcile &= !no_reconcile;
            if let Some(workers) = workers {
                cfg.run.workers = workers;
            }
            config::validate(&cfg)?;

            let results = Results::create(&results)?;
            init_tracing(Some(&results.path(TRACE_FILE)))?;

            let engines = Engines {
                stsearch: Arc::new(Stsearch::new(&cfg.tools.stsearch.binary)),
                semgrep: Arc::new(Semgrep::new(&cfg.tools.semgrep)),
            };
            let mut reporter = Reporter::new();
            bench::run(
                &cfg,
                &Inputs { queries, corpus },
                &results,
                engines,
                &mut reporter,
            )
            .await?;
        }
    }

    Ok(())
}

/// Log to stderr, and to `trace` when given. `RUST_LOG` overrides the
/// default `info` level.
fn init_tracing(trace: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr));
    let file = match trace {
        Some(path) => Some(
            fmt::layer()
                .with_writer(Mutex::new(File::create(path)?))
                .with_ansi(false),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .init();
    Ok(())
}
