//! Test suites and the case sequencer
//!
//! A suite is an ordered list of independent cases plus a setup step. The
//! sequencer runs setup, then every case in order; a case that errors or
//! panics is recorded as one failure and the run moves on to the next case.
//! Only fatal errors (and setup failure) end the run early.

pub mod preset;
pub mod sizes;
pub mod target;

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::FutureExt;

use crate::board::identity::{self, IdentityCheck, KernelId};
use crate::board::reset::ResetController;
use crate::board::{Board, Workspace};
use crate::common::{Config, Error, Result};
use crate::exec::{CommandOutput, CommandSpec, ExecOptions, Executor};
use crate::run::RunContext;

/// Marker left in the source tree after a successful kernel fetch
pub const FETCH_MARKER: &str = "gk_marker";

/// A case as declared by a suite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseInfo {
    pub id: String,
    pub description: String,
}

impl CaseInfo {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }
}

/// One test program
#[async_trait]
pub trait Suite: Send {
    /// Prefix of every test id, e.g. `TARG`
    fn name(&self) -> &'static str;

    /// Cases in execution order
    fn cases(&self) -> Vec<CaseInfo>;

    /// Where the session log goes
    fn results_dir(&self, config: &Config, _target: &str) -> PathBuf {
        config.paths.results_dir.clone()
    }

    /// Preparation before the first case; an error here ends the run
    async fn setup(&mut self, _session: &mut Session) -> Result<()> {
        Ok(())
    }

    async fn run_case(&mut self, case: &CaseInfo, session: &mut Session) -> Result<()>;
}

/// Everything a case works with: the run record, the board, and policy
#[derive(Debug)]
pub struct Session {
    pub ctx: RunContext,
    pub board: Board,
    pub config: Config,
}

impl Session {
    pub fn new(ctx: RunContext, board: Board, config: Config) -> Self {
        Self { ctx, board, config }
    }

    pub fn executor(&self) -> &Executor {
        self.board.executor()
    }

    /// Run a host command with the default error policy
    pub async fn host(&self, spec: CommandSpec) -> Result<CommandOutput> {
        self.board.executor().run(&spec).await
    }

    pub fn resets(&self) -> ResetController<'_> {
        ResetController::new(&self.board, &self.config.timeouts)
    }

    /// Source tree and per-target build directory from the configured layout
    pub fn planned_workspace(&self) -> Result<Workspace> {
        Ok(Workspace::new(
            absolute(&self.config.paths.source_dir)?,
            absolute(&self.config.paths.build_root.join(self.board.target()))?,
        ))
    }

    /// Fetch the kernel source unless a previous fetch left its marker
    ///
    /// Returns `false` when the fetch was skipped.
    pub async fn fetch_kernel_source(&self, source_dir: &Path) -> Result<bool> {
        let marker = source_dir.join(FETCH_MARKER);
        if marker.exists() {
            println!("*** Skipping get_kernel (get_kernel marker found)");
            return Ok(false);
        }
        self.board
            .get_kernel(source_dir, ExecOptions::CHECKED)
            .await?;
        std::fs::create_dir_all(source_dir)?;
        std::fs::write(&marker, "get_kernel completed\n")?;
        Ok(true)
    }

    /// Stamp a fresh identity into the source tree and expect it on the board
    pub fn stamp_identity(&mut self) -> Result<KernelId> {
        let workspace = self.board.require_workspace("localversion")?;
        let id = KernelId::generate();
        identity::stamp(&workspace.source_dir, &id)?;
        self.ctx.set_expected_identity(id.clone());
        Ok(id)
    }

    pub fn clear_identity(&self) -> Result<()> {
        let workspace = self.board.require_workspace("localversion")?;
        identity::clear(&workspace.source_dir)
    }

    /// Check the board against the last stamped identity
    pub async fn verify_identity(&self) -> Result<IdentityCheck> {
        let id = self
            .ctx
            .expected_identity()
            .ok_or_else(|| Error::Internal("no kernel identity has been stamped".into()))?;
        Ok(identity::verify(&self.board, id).await)
    }

    /// Stamp, build, confirm the identity made it into the image, and install
    ///
    /// Build trouble is recorded as a failure and yields `None`; an install
    /// failure ends the case.
    pub async fn build_and_install(&mut self) -> Result<Option<KernelId>> {
        let id = self.stamp_identity()?;

        let build = self.board.kbuild(ExecOptions::DEFAULT).await?;
        let image = self.board.require_workspace("kbuild")?.kernel_image();
        let stamped = image.is_file() && identity::built_into(&image, &id)?;
        if !stamped {
            self.ctx.failure_with(
                format!("Could not build kernel with unique identifier '{id}'"),
                build.output,
            );
            return Ok(None);
        }

        self.board.kinstall(ExecOptions::CHECKED).await?;
        Ok(Some(id))
    }
}

/// Make a configured path absolute against the current directory
pub(crate) fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// How a suite run ended
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOutcome {
    /// Reason the run stopped before its last case
    pub aborted: Option<String>,
    pub cases_run: usize,
}

/// Runs a suite's cases in order against a session
pub struct Sequencer;

impl Sequencer {
    pub async fn run<S: Suite + ?Sized>(suite: &mut S, session: &mut Session) -> RunOutcome {
        let mut outcome = RunOutcome::default();

        println!("Doing test preparation for {} tests...", suite.name());
        if let Err(e) = suite.setup(session).await {
            session.ctx.set_id("setup", "test preparation");
            record_error(session, "Test preparation failed", &e);
            outcome.aborted = Some(e.to_string());
            return outcome;
        }

        for case in suite.cases() {
            session.ctx.set_id(&case.id, &case.description);
            tracing::debug!(case = %case.id, "Running case");

            let run = AssertUnwindSafe(suite.run_case(&case, session))
                .catch_unwind()
                .await;
            outcome.cases_run += 1;

            match run {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    record_error(session, &format!("{} aborted", case.description), &e);
                    if e.is_fatal() {
                        outcome.aborted = Some(e.to_string());
                        break;
                    }
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    session
                        .ctx
                        .failure(format!("{} panicked: {}", case.description, message));
                }
            }
        }

        outcome
    }
}

fn record_error(session: &mut Session, what: &str, error: &Error) {
    let message = format!("{what}: {error}");
    match error.diagnostic() {
        Some(raw) => {
            let raw = raw.to_string();
            session.ctx.failure_with(message, raw);
        }
        None => session.ctx.failure(message),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("index out of bounds");
        assert_eq!(panic_message(payload.as_ref()), "index out of bounds");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("boom"));
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_absolute_keeps_absolute_paths() {
        assert_eq!(absolute(Path::new("/srv/test-linux")).unwrap(), PathBuf::from("/srv/test-linux"));
        assert!(absolute(Path::new("test-build")).unwrap().is_absolute());
    }
}
