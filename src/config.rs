use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Largest accepted `run.workers`.
pub const MAX_WORKERS: usize = 1024;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// Relative paths resolve under the results directory.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("matches.db")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub stsearch: StsearchConfig,
    #[serde(default)]
    pub semgrep: SemgrepConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StsearchConfig {
    #[serde(default = "default_stsearch_binary")]
    pub binary: PathBuf,
}

impl Default for StsearchConfig {
    fn default() -> Self {
        Self {
            binary: default_stsearch_binary(),
        }
    }
}

fn default_stsearch_binary() -> PathBuf {
    PathBuf::from("stsearch")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SemgrepConfig {
    #[serde(default = "default_semgrep_binary")]
    pub binary: PathBuf,
    #[serde(default = "default_semgrep_flags")]
    pub extra_flags: Vec<String>,
    /// Drop patterns semgrep cannot parse before the batched scan.
    #[serde(default = "default_true")]
    pub validate: bool,
}

impl Default for SemgrepConfig {
    fn default() -> Self {
        Self {
            binary: default_semgrep_binary(),
            extra_flags: default_semgrep_flags(),
            validate: true,
        }
    }
}

fn default_semgrep_binary() -> PathBuf {
    PathBuf::from("semgrep")
}

fn default_semgrep_flags() -> Vec<String> {
    [
        "--metrics=off",
        "--no-git-ignore",
        "--disable-version-check",
        "--no-rewrite-rule-ids",
        "--disable-nosem",
        "--verbose",
        "--oss-only",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    /// Concurrent per-file invocations; 0 means available parallelism.
    #[serde(default)]
    pub workers: usize,
    /// Snap semgrep matches onto padded stsearch matches before diffing.
    #[serde(default = "default_true")]
    pub reconcile: bool,
    /// Empty the store before collecting.
    #[serde(default)]
    pub fresh: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            reconcile: true,
            fresh: false,
        }
    }
}

impl RunConfig {
    pub fn effective_workers(&self) -> usize {
        match self.workers {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            exclude_globs: default_exclude_globs(),
        }
    }
}

fn default_exclude_globs() -> Vec<String> {
    [
        "node_modules",
        "build",
        "dist",
        "vendor",
        ".env",
        ".venv",
        ".tox",
        ".npm",
        "test",
        "tests",
        ".semgrep",
        ".semgrep_logs",
    ]
    .iter()
    .map(|d| format!("**/{}/**", d))
    .chain(std::iter::once("**/*.min.js".to_string()))
    .collect()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Database path, resolved against the results directory.
    pub fn db_path(&self, results: &Path) -> PathBuf {
        if self.db.path.is_absolute() {
            self.db.path.clone()
        } else {
            results.join(&self.db.path)
        }
    }
}

/// Load `path`, or the defaults when `path` does not exist.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Reject settings no run could use.
pub fn validate(config: &Config) -> Result<()> {
    if config.run.workers > MAX_WORKERS {
        anyhow::bail!("run.workers must be <= {}", MAX_WORKERS);
    }

    if config.db.path.as_os_str().is_empty() {
        anyhow::bail!("db.path must not be empty");
    }

    for (name, binary) in [
        ("tools.stsearch.binary", &config.tools.stsearch.binary),
        ("tools.semgrep.binary", &config.tools.semgrep.binary),
    ] {
        if binary.as_os_str().is_empty() {
            anyhow::bail!("{} must not be empty", name);
        }
    }

    for pattern in &config.corpus.exclude_globs {
        globset::Glob::new(pattern)
            .with_context(|| format!("Invalid corpus.exclude_globs pattern: '{}'", pattern))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("stbench.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.db.path, PathBuf::from("matches.db"));
        assert!(cfg.run.reconcile);
        assert!(!cfg.run.fresh);
        assert!(cfg.tools.semgrep.validate);
        assert!(cfg.tools.semgrep.extra_flags.contains(&"--metrics=off".to_string()));
        assert!(cfg.corpus.exclude_globs.contains(&"**/node_modules/**".to_string()));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"
[run]
workers = 4
fresh = true

[tools.semgrep]
binary = "/opt/semgrep/bin/semgrep"
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.run.workers, 4);
        assert_eq!(cfg.run.effective_workers(), 4);
        assert!(cfg.run.fresh);
        assert!(cfg.run.reconcile);
        assert_eq!(cfg.tools.semgrep.binary, PathBuf::from("/opt/semgrep/bin/semgrep"));
        assert_eq!(cfg.tools.stsearch.binary, PathBuf::from("stsearch"));
    }

    #[test]
    fn test_rejects_too_many_workers() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "[run]\nworkers = 5000\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("run.workers"));
    }

    #[test]
    fn test_rejects_bad_glob() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "[corpus]\nexclude_globs = [\"a[\"]\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_db_path_resolution() {
        let cfg = Config::default();
        assert_eq!(
            cfg.db_path(Path::new("/tmp/results")),
            PathBuf::from("/tmp/results/matches.db")
        );
    }

    #[test]
    fn test_auto_workers_positive() {
        assert!(RunConfig::default().effective_workers() >= 1);
    }
}
