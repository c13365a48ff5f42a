//! Common utilities shared by every suite

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use config::Config;
pub use error::{Error, Result};

/// Timestamp used in "Starting at" markers, with 1/10000 second resolution
pub fn timestamp() -> String {
    let now = chrono::Local::now();
    format!(
        "{}.{:04}",
        now.format("%Y-%m-%d_%H:%M:%S"),
        now.timestamp_subsec_micros() / 100
    )
}
