//! Per-run state: result records, the session log, and the summary

pub mod context;
pub mod report;

pub use context::{ResultKind, ResultRecord, RunContext};
