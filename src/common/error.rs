//! Error types for the board test suites
//!
//! Most board trouble is not an error at all: a failed transport call is
//! returned to the caller as a status code and a verification miss becomes
//! a FAILURE record. The variants here are the cases that end a test case
//! (or, for the fatal ones, the whole run).

use std::io;
use thiserror::Error;

use crate::scrape::ParseFailure;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the test suites
#[derive(Error, Debug)]
pub enum Error {
    // === Command Errors ===
    #[error("Error running cmd \"{command}\" (status {status})")]
    CommandFailed {
        command: String,
        status: i32,
        output: String,
    },

    #[error("Board control tool '{0}' not found in PATH")]
    ToolNotFound(String),

    // === Run Errors ===
    #[error("Cannot continue: {0}")]
    Aborted(String),

    #[error("Build environment not set up. The kernel source tree must be fetched before '{0}'")]
    BuildEnvUnset(String),

    // === Output Errors ===
    #[error(transparent)]
    Parse(#[from] ParseFailure),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a command failed error
    pub fn command_failed(command: &str, status: i32, output: &str) -> Self {
        Self::CommandFailed {
            command: command.to_string(),
            status,
            output: output.to_string(),
        }
    }

    /// Create an abort error
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted(reason.into())
    }

    /// Raw text attached to the error, recorded as a result's extra data
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Error::CommandFailed { output, .. } => Some(output),
            Error::Parse(failure) => Some(&failure.raw),
            _ => None,
        }
    }

    /// Whether the error ends the whole run rather than the current case
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Aborted(_) | Error::ToolNotFound(_) | Error::BuildEnvUnset(_)
        )
    }
}
