//! Board test suites for embedded Linux kernels
//!
//! Drives build-flash-boot-verify cycles on target boards through the `ttc`
//! board-control tool and records every outcome in a per-run log.

pub mod board;
pub mod cli;
pub mod commands;
pub mod common;
pub mod exec;
pub mod run;
pub mod scrape;
pub mod suite;

pub use common::{Error, Result};
