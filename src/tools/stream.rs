//! Line-oriented match output of a child process.
//!
//! A [`MatchStream`] yields one parsed [`Match`] per stdout line as the
//! engine produces them. The exit status is only inspected by
//! [`MatchStream::finish`], once the output has been drained, so a failure
//! never interleaves with data.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

use stbench_core::{Match, ParseMatchError};

/// A failed engine invocation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to start {program}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed reading output of {program}")]
    Io {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Exit { program: PathBuf, status: ExitStatus },

    #[error("unreadable output from {program}: {message}")]
    Output { program: PathBuf, message: String },
}

impl ToolError {
    /// Exit code of a failed process, if it exited normally.
    pub fn code(&self) -> Option<i32> {
        match self {
            ToolError::Exit { status, .. } => status.code(),
            _ => None,
        }
    }
}

/// Streaming stdout of a running engine.
pub struct MatchStream {
    program: PathBuf,
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl MatchStream {
    /// Spawn `command` with stdout captured.
    pub fn spawn(program: PathBuf, mut command: Command) -> Result<Self, ToolError> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| ToolError::Output {
            program: program.clone(),
            message: "stdout not captured".to_string(),
        })?;

        Ok(Self {
            program,
            child,
            lines: BufReader::new(stdout).lines(),
        })
    }

    /// Next match line, `None` once stdout is exhausted.
    pub async fn next(&mut self) -> Option<Result<Result<Match, ParseMatchError>, ToolError>> {
        match self.lines.next_line().await {
            Ok(Some(line)) => Some(Ok(Match::parse(&line))),
            Ok(None) => None,
            Err(source) => Some(Err(ToolError::Io {
                program: self.program.clone(),
                source,
            })),
        }
    }

    /// Wait for the process; a non-zero exit is the terminal error.
    pub async fn finish(mut self) -> Result<(), ToolError> {
        let status = self.child.wait().await.map_err(|source| ToolError::Io {
            program: self.program.clone(),
            source,
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(ToolError::Exit {
                program: self.program,
                status,
            })
        }
    }
}
