//! # stbench core
//!
//! Pure logic shared by the benchmark: span geometry, query
//! canonicalization and translation, match reconciliation, rule pattern
//! extraction, partial-query prefixes, spec bundles, and summary
//! statistics.
//!
//! This crate has no async runtime, database, or process handling. The
//! only I/O is reading rule files and the source text of a match.

pub mod canonical;
pub mod error;
pub mod lang;
pub mod models;
pub mod prefix;
pub mod query;
pub mod reconcile;
pub mod rules;
pub mod span;
pub mod stats;

pub use canonical::{canonical, is_canonical, to_stsearch};
pub use error::{LanguageError, ParseMatchError, RuleError, SpanError};
pub use lang::Language;
pub use models::SpecData;
pub use query::Query;
pub use reconcile::{reconcile, reconcile_in};
pub use span::{Match, Point, Range};
pub use stats::{MatchingMatrix, Summary};
