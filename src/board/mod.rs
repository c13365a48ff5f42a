//! Board-control command wrapper
//!
//! Every board operation is `<tool> <target> <subcommand> [args]`. The
//! board also carries the build environment (kernel source tree and build
//! output directory) once a suite has set it up; build, install, and config
//! operations refuse to run before that.

pub mod identity;
pub mod kconfig;
pub mod reset;

use std::path::{Path, PathBuf};

use crate::common::{Error, Result};
use crate::exec::{CommandOutput, CommandSpec, ExecOptions, Executor};

/// Environment variable the kernel build reads its output directory from
pub const BUILD_OUTPUT_VAR: &str = "KBUILD_OUTPUT";

/// Kernel source tree and build output directory for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
}

impl Workspace {
    pub fn new(source_dir: impl Into<PathBuf>, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            build_dir: build_dir.into(),
        }
    }

    /// The active kernel configuration
    pub fn config_file(&self) -> PathBuf {
        self.build_dir.join(".config")
    }

    /// The uncompressed kernel image left by the last build
    pub fn kernel_image(&self) -> PathBuf {
        self.build_dir.join("vmlinux")
    }

    pub fn system_map(&self) -> PathBuf {
        self.build_dir.join("System.map")
    }
}

/// Ask the board-control tool which targets it knows about
pub async fn list_targets(exec: &Executor, tool: &str) -> Result<Vec<String>> {
    let result = exec
        .run_checked(&CommandSpec::new(tool).args(["list", "-q"]))
        .await?;
    Ok(result
        .output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// One target board reached through the board-control tool
#[derive(Debug, Clone)]
pub struct Board {
    tool: String,
    target: String,
    exec: Executor,
    workspace: Option<Workspace>,
}

impl Board {
    pub fn new(tool: impl Into<String>, target: impl Into<String>, exec: Executor) -> Self {
        Self {
            tool: tool.into(),
            target: target.into(),
            exec,
            workspace: None,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn executor(&self) -> &Executor {
        &self.exec
    }

    /// Switch every later operation into the given source tree and build dir
    pub fn enter_workspace(&mut self, workspace: Workspace) {
        tracing::info!(
            source = %workspace.source_dir.display(),
            build = %workspace.build_dir.display(),
            "Using kernel source tree"
        );
        self.workspace = Some(workspace);
    }

    pub fn workspace(&self) -> Option<&Workspace> {
        self.workspace.as_ref()
    }

    /// The workspace, or a precondition error naming the operation
    pub fn require_workspace(&self, operation: &str) -> Result<&Workspace> {
        self.workspace
            .as_ref()
            .ok_or_else(|| Error::BuildEnvUnset(operation.to_string()))
    }

    /// Apply the workspace's working directory and build variable to a command
    pub fn in_workspace(&self, spec: CommandSpec) -> CommandSpec {
        match &self.workspace {
            Some(ws) => spec
                .current_dir(&ws.source_dir)
                .env(BUILD_OUTPUT_VAR, ws.build_dir.to_string_lossy()),
            None => spec,
        }
    }

    /// A board-control invocation for this target
    pub fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.in_workspace(
            CommandSpec::new(self.tool.as_str())
                .arg(self.target.as_str())
                .args(args),
        )
    }

    /// Run a board-control subcommand with the given error policy
    pub async fn ttc(&self, args: &[&str], options: ExecOptions) -> Result<CommandOutput> {
        self.exec.execute(&self.command(args.iter().copied()), options).await
    }

    pub async fn info(&self) -> Result<CommandOutput> {
        self.ttc(&["info"], ExecOptions::DEFAULT).await
    }

    pub async fn info_verbose(&self) -> Result<CommandOutput> {
        self.ttc(&["info", "-v"], ExecOptions::DEFAULT).await
    }

    /// A single target attribute, or `default` when the board does not define it
    pub async fn target_value(&self, name: &str, default: &str) -> String {
        match self.ttc(&["info", "-n", name], ExecOptions::QUIET).await {
            Ok(result) if result.success() && !result.output.trim().is_empty() => {
                result.output.trim().to_string()
            }
            _ => default.to_string(),
        }
    }

    pub async fn get_kernel(&self, dest: &Path, options: ExecOptions) -> Result<CommandOutput> {
        let dest = dest.to_string_lossy();
        self.ttc(&["get_kernel", "-o", &dest], options).await
    }

    pub async fn get_config(&self, options: ExecOptions) -> Result<CommandOutput> {
        self.require_workspace("get_config")?;
        self.ttc(&["get_config"], options).await
    }

    /// `set_config NAME=VALUE`; `assignment` may use `+=` to append
    pub async fn set_config(&self, assignment: &str, options: ExecOptions) -> Result<CommandOutput> {
        self.require_workspace("set_config")?;
        self.ttc(&["set_config", assignment], options).await
    }

    pub async fn kbuild(&self, options: ExecOptions) -> Result<CommandOutput> {
        self.require_workspace("kbuild")?;
        self.ttc(&["kbuild"], options).await
    }

    pub async fn kinstall(&self, options: ExecOptions) -> Result<CommandOutput> {
        self.require_workspace("kinstall")?;
        self.ttc(&["kinstall"], options).await
    }

    /// Hardware reset; the tool waits for the board when `wait` is set
    pub async fn reset(&self, wait: bool) -> Result<CommandOutput> {
        let args: &[&str] = if wait { &["reset", "-w"] } else { &["reset"] };
        self.ttc(args, ExecOptions::DEFAULT).await
    }

    pub async fn reboot(&self, wait: bool) -> Result<CommandOutput> {
        let args: &[&str] = if wait { &["reboot", "-w"] } else { &["reboot"] };
        self.ttc(args, ExecOptions::DEFAULT).await
    }

    /// Run a shell command on the target
    pub async fn run(&self, shell: &str) -> Result<CommandOutput> {
        self.run_with(shell, ExecOptions::DEFAULT).await
    }

    pub async fn run_with(&self, shell: &str, options: ExecOptions) -> Result<CommandOutput> {
        self.ttc(&["run", shell], options).await
    }

    /// Copy a local file to the target
    pub async fn copy_to(&self, local: &Path, remote: &str) -> Result<CommandOutput> {
        let src = local.to_string_lossy();
        let dst = format!("target:{remote}");
        self.ttc(&["cp", &src, &dst], ExecOptions::DEFAULT).await
    }

    /// Copy a file from the target to a local path
    pub async fn copy_from(&self, remote: &str, local: &Path) -> Result<CommandOutput> {
        let src = format!("target:{remote}");
        let dst = local.to_string_lossy();
        self.ttc(&["cp", &src, &dst], ExecOptions::DEFAULT).await
    }

    /// Bring `.config` up to date with `make oldconfig`, accepting defaults
    ///
    /// The tool's `setenv -o` output supplies the cross-compile environment;
    /// ARCH and CROSS_COMPILE are also passed explicitly because some
    /// architectures' Makefiles ignore them in the environment.
    pub async fn oldconfig(&self) -> Result<CommandOutput> {
        self.require_workspace("oldconfig")?;

        let arch = self.target_value("ARCH", "").await;
        let cross_compile = self.target_value("CROSS_COMPILE", "").await;

        let mut make = String::from("make");
        if !arch.is_empty() {
            make.push_str(&format!(" ARCH={}", shell_word(&arch)));
        }
        if !cross_compile.is_empty() {
            make.push_str(&format!(" CROSS_COMPILE={}", shell_word(&cross_compile)));
        }

        let script = format!(
            "{} {} setenv -o > .ttc-env && . ./.ttc-env; rm -f .ttc-env; yes \"\" | {} oldconfig",
            shell_word(&self.tool),
            shell_word(&self.target),
            make
        );
        self.exec
            .run(&self.in_workspace(CommandSpec::shell(script)))
            .await
    }
}

/// Quote a word for `sh`
fn shell_word(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,@".contains(c))
    {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> Board {
        Board::new("ttc", "beagle", Executor::host())
    }

    #[test]
    fn test_command_shape_without_workspace() {
        let spec = board().command(["run", "uname -r"]);
        assert_eq!(spec.to_string(), "ttc beagle run \"uname -r\"");
        assert!(spec.get_current_dir().is_none());
        assert!(spec.get_envs().is_empty());
    }

    #[test]
    fn test_command_carries_build_env() {
        let mut board = board();
        board.enter_workspace(Workspace::new("/work/test-linux", "/work/test-build/beagle"));
        let spec = board.command(["kbuild"]);
        assert_eq!(spec.get_current_dir(), Some(Path::new("/work/test-linux")));
        assert_eq!(
            spec.get_envs(),
            &[(BUILD_OUTPUT_VAR.to_string(), "/work/test-build/beagle".to_string())]
        );
    }

    #[tokio::test]
    async fn test_build_operations_need_workspace() {
        let err = board().kbuild(ExecOptions::DEFAULT).await.unwrap_err();
        assert!(matches!(err, Error::BuildEnvUnset(ref op) if op == "kbuild"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_workspace_paths() {
        let ws = Workspace::new("src", "build");
        assert_eq!(ws.config_file(), PathBuf::from("build/.config"));
        assert_eq!(ws.kernel_image(), PathBuf::from("build/vmlinux"));
        assert_eq!(ws.system_map(), PathBuf::from("build/System.map"));
    }

    #[test]
    fn test_shell_word() {
        assert_eq!(shell_word("arm-linux-"), "arm-linux-");
        assert_eq!(shell_word("my board"), "'my board'");
        assert_eq!(shell_word("it's"), r"'it'\''s'");
        assert_eq!(shell_word(""), "''");
    }
}
