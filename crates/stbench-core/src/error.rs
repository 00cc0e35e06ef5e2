//! Error types for the core crate.
//!
//! Each error is small and specific so the application layer can decide
//! whether a failure drops a query, skips a file, or aborts the run.

use std::path::PathBuf;

/// Failure to decode a `path:sr:sc-er:ec` match line.
#[derive(Debug, thiserror::Error)]
pub enum ParseMatchError {
    #[error("not a match line: {0:?}")]
    Format(String),

    #[error("coordinate out of range in {line:?}")]
    Coordinate { line: String },
}

/// Geometry precondition violations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SpanError {
    /// A point was expressed relative to an origin that comes after it.
    #[error("point {row}:{column} precedes origin {origin_row}:{origin_column}")]
    PrecedesOrigin {
        row: u32,
        column: u32,
        origin_row: u32,
        origin_column: u32,
    },

    /// The range names a row the text does not have.
    #[error("row {row} is outside the text ({lines} lines)")]
    RowOutOfBounds { row: u32, lines: usize },

    /// The computed interval does not fit the text.
    #[error("span {start}..{end} is outside the text ({len} bytes)")]
    OffsetOutOfBounds { start: usize, end: usize, len: usize },
}

/// An unsupported language name.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unsupported language: '{language}' (supported: {supported})")]
pub struct LanguageError {
    pub language: String,
    pub supported: String,
}

/// Failures while loading rule files or walking a rule tree.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rule file {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse rule file {path}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{path}: expected a top-level \"rules\" array")]
    NotARuleFile { path: PathBuf },

    #[error("rule operator not identified: {0}")]
    UnknownOperator(String),

    #[error("expected a pattern string, got: {0}")]
    NotAPattern(String),
}
