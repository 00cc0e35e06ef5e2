//! Results directory output.
//!
//! Tables are written as headerless CSV files; human-facing summary lines go
//! through a [`Reporter`], which echoes them to stdout and keeps them for
//! `results.log`.

use anyhow::{Context, Result};
use std::fmt::Display;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const LOG_FILE: &str = "results.log";
pub const TRACE_FILE: &str = "trace.log";

/// The results directory of one benchmark run.
#[derive(Debug, Clone)]
pub struct Results {
    dir: PathBuf,
}

impl Results {
    /// Create (if needed) the directory at `dir`.
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create results directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Write `rows` to `<name>.csv`, replacing any previous file.
    pub fn save_csv<R, F>(&self, name: &str, rows: R) -> Result<PathBuf>
    where
        R: IntoIterator,
        R::Item: IntoIterator<Item = F>,
        F: AsRef<[u8]>,
    {
        let path = self.dir.join(format!("{}.csv", name));
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for row in rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        tracing::debug!("wrote {}", path.display());
        Ok(path)
    }
}

/// Collects the summary lines of a run.
#[derive(Debug, Default)]
pub struct Reporter {
    lines: Vec<String>,
    quiet: bool,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reporter that does not echo to stdout.
    pub fn quiet() -> Self {
        Self {
            lines: Vec::new(),
            quiet: true,
        }
    }

    pub fn line(&mut self, line: impl Display) {
        let line = line.to_string();
        if !self.quiet {
            println!("{}", line);
        }
        self.lines.push(line);
    }

    /// Write every line reported so far to `results.log` under `results`.
    pub fn save(&self, results: &Results) -> Result<PathBuf> {
        let path = results.path(LOG_FILE);
        let mut file =
            File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
        for line in &self.lines {
            writeln!(file, "{}", line)?;
        }
        Ok(path)
    }
}
