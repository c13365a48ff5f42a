//! Kernel identity stamping and post-boot verification
//!
//! Each kernel built for installation gets a random token appended to its
//! release string through the source tree's `localversion` file. After the
//! board is reset, `uname -r` must report that token; anything else means
//! the old kernel is still running (failed install, missed reset).

use std::fmt;
use std::path::Path;

use rand::Rng;

use super::Board;
use crate::common::{Error, Result};
use crate::exec::ExecOptions;
use crate::scrape;

/// File at the root of the kernel source tree appended to the release string
pub const LOCALVERSION_FILE: &str = "localversion";

/// Unique build identifier, `ID` plus a zero-padded random number
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelId(String);

impl KernelId {
    /// A fresh random identifier
    pub fn generate() -> Self {
        let n: u32 = rand::thread_rng().gen_range(1..=10000);
        Self(format!("ID{n:04}"))
    }

    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Write `id` into the tree's `localversion` so the next build carries it
pub fn stamp(source_dir: &Path, id: &KernelId) -> Result<()> {
    let path = source_dir.join(LOCALVERSION_FILE);
    tracing::info!("Setting localversion to '{}'", id);
    std::fs::write(&path, format!("-{id}\n"))?;
    Ok(())
}

/// Remove `localversion`; a missing file is fine
pub fn clear(source_dir: &Path) -> Result<()> {
    match std::fs::remove_file(source_dir.join(LOCALVERSION_FILE)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Whether the built kernel image contains the identifier
pub fn built_into(image: &Path, id: &KernelId) -> Result<bool> {
    let bytes = std::fs::read(image).map_err(|e| Error::FileRead {
        path: image.display().to_string(),
        error: e.to_string(),
    })?;
    let needle = id.as_str().as_bytes();
    if needle.is_empty() {
        return Ok(true);
    }
    Ok(bytes.windows(needle.len()).any(|w| w == needle))
}

/// Outcome of checking what kernel the board is running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityCheck {
    /// The expected kernel is running
    Running { release: String },
    /// The board answered with a different kernel
    Mismatch { release: String },
    /// The board could not be queried
    Unreachable { output: String },
}

impl IdentityCheck {
    pub fn is_running(&self) -> bool {
        matches!(self, IdentityCheck::Running { .. })
    }

    /// Text describing what was seen, for a failure's extra data
    pub fn detail(&self) -> String {
        match self {
            IdentityCheck::Running { release } => release.clone(),
            IdentityCheck::Mismatch { release } => format!("running kernel release is '{release}'"),
            IdentityCheck::Unreachable { output } => output.clone(),
        }
    }
}

/// Classify `uname -r` output against the expected identifier
pub fn check_release(output: &str, id: &KernelId) -> IdentityCheck {
    let release = scrape::reported_line(output).to_string();
    if !release.is_empty() && release.contains(id.as_str()) {
        IdentityCheck::Running { release }
    } else {
        IdentityCheck::Mismatch { release }
    }
}

/// Ask the board which kernel it runs; never fails, the answer says what happened
pub async fn verify(board: &Board, id: &KernelId) -> IdentityCheck {
    match board.run_with("uname -r", ExecOptions::DEFAULT).await {
        Ok(result) if result.success() => {
            let check = check_release(&result.output, id);
            tracing::info!(expected = %id, "Version of running kernel is: '{}'", scrape::reported_line(&result.output));
            check
        }
        Ok(result) => IdentityCheck::Unreachable {
            output: result.output,
        },
        Err(e) => IdentityCheck::Unreachable {
            output: e.to_string(),
        },
    }
}
