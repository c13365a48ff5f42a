//! Command executor
//!
//! Every external operation (board-control calls, `make`, `size`, `quilt`)
//! goes through [`Executor::execute`]. The exit status of a remote operation
//! is not a reliable indicator of what happened on the board, so by default
//! a nonzero status is logged and handed back to the caller, who usually
//! confirms the outcome with a later verification step.

mod runner;

pub use runner::{CommandRunner, ProcessRunner};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::common::{Error, Result};

/// Status used when a command cannot be started at all
pub const SPAWN_FAILURE_STATUS: i32 = 127;

/// A command line: program, arguments, and per-command environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
        }
    }

    /// A shell pipeline run through `sh -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn get_program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    pub fn get_envs(&self) -> &[(String, String)] {
        &self.envs
    }
}

impl fmt::Display for CommandSpec {
    /// Renders the command the way it would be typed at a shell prompt
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

fn quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,@%".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("\"{}\"", word.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

/// Exit status and combined stdout/stderr of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Error policy for a single execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Turn a nonzero status into [`Error::CommandFailed`]
    pub fail_on_error: bool,
    /// Do not report a nonzero status at all
    pub ignore_error: bool,
}

impl ExecOptions {
    /// Log a nonzero status and return it to the caller
    pub const DEFAULT: Self = Self {
        fail_on_error: false,
        ignore_error: false,
    };

    /// Abort the current test case on a nonzero status
    pub const CHECKED: Self = Self {
        fail_on_error: true,
        ignore_error: false,
    };

    /// Stay silent on a nonzero status
    pub const QUIET: Self = Self {
        fail_on_error: false,
        ignore_error: true,
    };
}

/// Runs commands with logging and the configured error policy
#[derive(Clone)]
pub struct Executor {
    runner: Arc<dyn CommandRunner>,
}

impl Executor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Executor backed by real host processes
    pub fn host() -> Self {
        Self::new(Arc::new(ProcessRunner))
    }

    pub async fn execute(&self, command: &CommandSpec, options: ExecOptions) -> Result<CommandOutput> {
        tracing::info!("Executing '{}'", command);

        let result = match self.runner.run(command).await {
            Ok(result) => result,
            Err(e) => CommandOutput {
                status: SPAWN_FAILURE_STATUS,
                output: format!("{}: {}", command.get_program(), e),
            },
        };

        if !result.success() && !options.ignore_error {
            tracing::warn!(status = result.status, "Error running cmd \"{}\"", command);
            tracing::warn!("command output={}", result.output);
            if options.fail_on_error {
                return Err(Error::command_failed(
                    &command.to_string(),
                    result.status,
                    &result.output,
                ));
            }
        }

        Ok(result)
    }

    /// Execute with the default policy
    pub async fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        self.execute(command, ExecOptions::DEFAULT).await
    }

    /// Execute, aborting the current case on failure
    pub async fn run_checked(&self, command: &CommandSpec) -> Result<CommandOutput> {
        self.execute(command, ExecOptions::CHECKED).await
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor").finish_non_exhaustive()
    }
}
