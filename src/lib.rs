//! # stbench
//!
//! A benchmark harness comparing two structural code search engines,
//! stsearch and semgrep, on the same queries over the same corpus.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌───────────────┐   ┌──────────┐
//! │ Rule files │──▶│ Canonical    │──▶│ Runners       │──▶│  SQLite  │
//! │ (semgrep)  │   │ queries+pfx  │   │ stsearch/sg   │   │  store   │
//! └────────────┘   └──────────────┘   └───────────────┘   └────┬─────┘
//!                                                              │
//!                                     ┌────────────────────────┤
//!                                     ▼                        ▼
//!                               ┌───────────┐           ┌────────────┐
//!                               │ Reconcile │──────────▶│ qdiff/CSV  │
//!                               └───────────┘           └────────────┘
//! ```
//!
//! Query, span, reconciliation and statistics logic lives in
//! `stbench-core`; this crate adds persistence, engine processes and the
//! pipeline.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Memoized runs and their results |
//! | [`select`] | Per-query agreement between two tools |
//! | [`tools`] | stsearch and semgrep runners |
//! | [`corpus`] | Project and file discovery |
//! | [`report`] | CSV tables and summary lines |
//! | [`bench`] | The benchmark pipeline |

pub mod bench;
pub mod config;
pub mod corpus;
pub mod db;
pub mod migrate;
pub mod report;
pub mod select;
pub mod store;
pub mod tools;
