//! Process runners
//!
//! The executor never spawns processes itself; it goes through a
//! [`CommandRunner`] so a scripted board can stand in for real hardware.

use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::{CommandOutput, CommandSpec};

/// Runs one command to completion and reports its status and output
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command. `Err` means the process could not be started.
    async fn run(&self, command: &CommandSpec) -> io::Result<CommandOutput>;
}

/// Runs commands as host processes
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &CommandSpec) -> io::Result<CommandOutput> {
        let mut cmd = Command::new(command.get_program());
        cmd.args(command.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = command.get_current_dir() {
            cmd.current_dir(dir);
        }
        for (key, value) in command.get_envs() {
            cmd.env(key, value);
        }

        let output = cmd.output().await?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }

        Ok(CommandOutput {
            // Killed by a signal: no exit code, still a failure
            status: output.status.code().unwrap_or(-1),
            output: text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_and_combined_output() {
        let spec = CommandSpec::shell("echo out; echo err >&2; exit 3");
        let result = ProcessRunner.run(&spec).await.unwrap();
        assert_eq!(result.status, 3);
        assert_eq!(result.output, "out\nerr");
    }

    #[tokio::test]
    async fn test_env_and_working_dir_are_per_command() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::shell("echo $KBUILD_OUTPUT; pwd")
            .env("KBUILD_OUTPUT", "/tmp/build-beagle")
            .current_dir(dir.path());
        let result = ProcessRunner.run(&spec).await.unwrap();
        assert!(result.success());
        let mut lines = result.output.lines();
        assert_eq!(lines.next(), Some("/tmp/build-beagle"));
        let cwd = std::fs::canonicalize(lines.next().unwrap()).unwrap();
        assert_eq!(cwd, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let spec = CommandSpec::new("/nonexistent/ttc-binary");
        assert!(ProcessRunner.run(&spec).await.is_err());
    }
}
