//! The stsearch per-file runner.
//!
//! `stsearch <language> <pattern> <file>` prints one `path:sr:sc-er:ec`
//! line per match.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use stbench_core::{Match, Query};

use super::{MatchStream, Runner, ToolError};

pub const NAME: &str = "stsearch";

pub struct Stsearch {
    binary: PathBuf,
}

impl Stsearch {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Runner for Stsearch {
    fn name(&self) -> &str {
        NAME
    }

    async fn try_run(&self, query: &Query, file: &Path) -> Result<Vec<Match>, ToolError> {
        let mut command = Command::new(&self.binary);
        command
            .arg(query.language.name())
            .arg(&query.syntax)
            .arg(file);
        tracing::debug!(
            "$ {} {} {:?} {}",
            self.binary.display(),
            query.language,
            query.syntax,
            file.display()
        );

        let mut stream = MatchStream::spawn(self.binary.clone(), command)?;
        let mut matches = Vec::new();
        while let Some(line) = stream.next().await {
            match line? {
                Ok(m) => matches.push(m),
                Err(e) => tracing::warn!(file = %file.display(), "{}: {}", NAME, e),
            }
        }
        stream.finish().await?;
        Ok(matches)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use stbench_core::Language;
    use tempfile::TempDir;

    /// A stand-in binary that echoes its arguments as a match.
    fn fake(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("fake-stsearch");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_parses_output_lines() {
        let dir = TempDir::new().unwrap();
        let bin = fake(&dir, r#"[ "$1" = javascript ] && echo "$3:1:1-1:5" && echo "$3:2:1-2:3""#);
        let runner = Stsearch::new(bin);
        let query = Query::new(Language::JavaScript, "f($_)");
        let got = runner.try_run(&query, Path::new("a.js")).await.unwrap();
        let got: Vec<String> = got.iter().map(|m| m.to_string()).collect();
        assert_eq!(got, vec!["a.js:1:1-1:5", "a.js:2:1-2:3"]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        let dir = TempDir::new().unwrap();
        let bin = fake(&dir, r#"echo "$3:1:1-1:5"; exit 1"#);
        let runner = Stsearch::new(bin);
        let query = Query::new(Language::JavaScript, "f(");
        assert!(matches!(
            runner.try_run(&query, Path::new("a.js")).await,
            Err(ToolError::Exit { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_spawn_error() {
        let runner = Stsearch::new("/nonexistent/stsearch");
        let query = Query::new(Language::JavaScript, "x");
        assert!(matches!(
            runner.try_run(&query, Path::new("a.js")).await,
            Err(ToolError::Spawn { .. })
        ));
    }
}
