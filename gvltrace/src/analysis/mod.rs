//! Analysis of recorded traces
//!
//! Pure post-processing over [`crate::trace_data::TraceData`], shared by the
//! `summary` subcommand and the tests.

pub mod lock_analyzer;

pub use lock_analyzer::{analyze_lock, LockSummary, WorkerSummary};
