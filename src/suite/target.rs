//! Target validation suite
//!
//! Exercises every board-control primitive the other suites rely on:
//! target listing and info, kernel fetch, config, build, install, reset,
//! reboot, file copy in both directions, remote execution, and the kernel
//! command line. Problems found here should be fixed before any other
//! automated run against the target.

use std::path::Path;

use async_trait::async_trait;
use rand::Rng;

use super::{CaseInfo, Session, Suite};
use crate::board::kconfig::{ConfigCheck, ConfigSnapshot};
use crate::board::reset::{BootWait, ResetStrategy};
use crate::board::list_targets;
use crate::common::{Error, Result};
use crate::exec::ExecOptions;
use crate::scrape::{self, ConfigValue};

pub const SUITE_NAME: &str = "TARG";

/// Kernel image names the board-control tool normally reports
const KNOWN_IMAGE_NAMES: &[&str] = &["vmlinux", "vmlinuz", "bzImage", "uImage", "cuImage.sequoia"];

/// dmesg lines sampled for printk timestamps
const PRINTK_SAMPLE_LINES: [usize; 3] = [4, 7, 11];

#[derive(Debug, Default)]
pub struct TargetSuite;

impl TargetSuite {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Suite for TargetSuite {
    fn name(&self) -> &'static str {
        SUITE_NAME
    }

    fn cases(&self) -> Vec<CaseInfo> {
        vec![
            CaseInfo::new("001", "verify target is in 'ttc list'"),
            CaseInfo::new("002", "get target info"),
            CaseInfo::new("003", "get kernel source"),
            CaseInfo::new("004", "get default kernel configuration"),
            CaseInfo::new("005", "build kernel"),
            CaseInfo::new("006", "install kernel, reboot and run command"),
            CaseInfo::new("007", "change kernel configuration"),
            CaseInfo::new("008", "reset and reboot target"),
            CaseInfo::new("010", "copy file to target"),
            CaseInfo::new("011", "copy file from target"),
            CaseInfo::new("012", "execute command on target"),
            CaseInfo::new("016", "change kernel command line"),
        ]
    }

    async fn setup(&mut self, session: &mut Session) -> Result<()> {
        let workspace = session.planned_workspace()?;
        std::fs::create_dir_all(&workspace.build_dir)?;
        session.board.enter_workspace(workspace);
        Ok(())
    }

    async fn run_case(&mut self, case: &CaseInfo, session: &mut Session) -> Result<()> {
        match case.id.as_str() {
            "001" => target_listed(session).await,
            "002" => target_info(session).await,
            "003" => kernel_source(session).await,
            "004" => default_config(session).await,
            "005" => build_kernel(session).await,
            "006" => install_and_boot(session).await,
            "007" => change_config(session).await,
            "008" => reset_and_reboot(session).await,
            "010" => copy_to_target(session).await,
            "011" => copy_from_target(session).await,
            "012" => remote_command(session).await,
            "016" => kernel_command_line(session).await,
            other => Err(Error::Internal(format!("unknown case {other}"))),
        }
    }
}

async fn target_listed(session: &mut Session) -> Result<()> {
    let target = session.board.target().to_string();
    let targets = list_targets(session.executor(), session.board.tool()).await?;
    if targets.contains(&target) {
        session.ctx.success(format!("target '{target}' is in 'ttc list'"));
        Ok(())
    } else {
        Err(Error::aborted(format!(
            "target '{target}' not found in ttc configuration"
        )))
    }
}

async fn target_info(session: &mut Session) -> Result<()> {
    let target = session.board.target().to_string();

    let info = session.board.info().await?;
    if info.success() {
        session
            .ctx
            .success_with(format!("Retrieved info for target '{target}'"), info.output);
    } else {
        session
            .ctx
            .failure_with(format!("Could not get info for target '{target}'"), info.output);
    }

    let verbose = session.board.info_verbose().await?;
    if verbose.success() {
        session
            .ctx
            .success_with("Retrieved verbose info for target", verbose.output);
    } else {
        session.ctx.failure_with(
            format!("Could not get verbose info for target '{target}'"),
            verbose.output,
        );
    }

    let kimage = session
        .board
        .ttc(&["info", "-n", "kimage"], ExecOptions::DEFAULT)
        .await?;
    if !kimage.success() {
        session.ctx.failure_with(
            format!("Could not get kernel image name for target '{target}'"),
            kimage.output,
        );
        return Ok(());
    }

    let name = scrape::reported_line(&kimage.output).to_string();
    session.ctx.result(format!("kernel image name is '{name}'"));
    if KNOWN_IMAGE_NAMES.contains(&name.as_str()) {
        session.ctx.success("Kernel image name is OK");
    } else {
        session.ctx.failure("Kernel image name is unexpected");
    }
    Ok(())
}

async fn kernel_source(session: &mut Session) -> Result<()> {
    let source_dir = session.board.require_workspace("get_kernel")?.source_dir.clone();

    let fetched = session.fetch_kernel_source(&source_dir).await?;

    for key_file in ["MAINTAINERS", "Kbuild", "Makefile"] {
        if !source_dir.join(key_file).is_file() {
            return Err(Error::aborted(format!(
                "Missing key file '{key_file}' in kernel source directory after 'get_kernel'"
            )));
        }
    }

    let makefile = std::fs::read_to_string(source_dir.join("Makefile"))?;
    let version = scrape::makefile_version(&makefile)?;
    session.ctx.result(format!("Kernel version is {version}"));

    if fetched {
        session.ctx.success("Retrieved kernel source OK");
    } else {
        session.ctx.success_with(
            "Retrieved kernel source OK",
            "*** Skipping get_kernel (get_kernel marker found)",
        );
    }
    Ok(())
}

fn remove_stale(path: &Path, what: &str) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::aborted(format!(
            "Could not remove pre-existing {what} from build dir: {e}"
        ))),
    }
}

async fn default_config(session: &mut Session) -> Result<()> {
    let config_file = session.board.require_workspace("get_config")?.config_file();
    remove_stale(&config_file, "kernel config file")?;

    session.board.get_config(ExecOptions::CHECKED).await?;

    if config_file.is_file() {
        session.ctx.success("Got default kernel configuration for target");
        Ok(())
    } else {
        Err(Error::aborted(
            "Could not get default kernel configuration for target",
        ))
    }
}

async fn build_kernel(session: &mut Session) -> Result<()> {
    let image = session.board.require_workspace("kbuild")?.kernel_image();
    remove_stale(&image, "kernel image file")?;

    let build = session.board.kbuild(ExecOptions::DEFAULT).await?;
    if !build.success() {
        session.ctx.failure_with("Could not build kernel", build.output);
    }

    if image.is_file() {
        session.ctx.success("Found 'vmlinux' after build");
    } else {
        session.ctx.failure("No 'vmlinux' found after build");
    }
    Ok(())
}

/// Restart into the kernel just installed with the configured reset
/// strategy and record whether it is running
async fn boot_installed(session: &mut Session) -> Result<bool> {
    let Some(id) = session.ctx.expected_identity().cloned() else {
        return Err(Error::Internal("no kernel identity has been stamped".into()));
    };
    let strategy = session.config.board.reset;
    let check = session.resets().reset_and_verify(strategy, &id).await?;
    if check.is_running() {
        session
            .ctx
            .success(format!("Kernel {id} installed and booted on board"));
        Ok(true)
    } else {
        session.ctx.failure_with(
            "Could not verify kernel running on target board",
            check.detail(),
        );
        Ok(false)
    }
}

async fn install_and_boot(session: &mut Session) -> Result<()> {
    if session.build_and_install().await?.is_none() {
        return Ok(());
    }
    boot_installed(session).await?;
    session.board.run("dmesg >/tmp/dmesg.boot.006").await?;
    Ok(())
}

async fn change_config(session: &mut Session) -> Result<()> {
    session
        .board
        .set_config("CONFIG_PRINTK_TIME=y", ExecOptions::CHECKED)
        .await?;
    session
        .board
        .set_config("CONFIG_LOG_BUF_SHIFT=17", ExecOptions::CHECKED)
        .await?;
    session.board.oldconfig().await?;

    let config_file = session.board.require_workspace("oldconfig")?.config_file();
    let check = ConfigSnapshot::load(&config_file)?.verify("PRINTK_TIME", "y");
    if let ConfigCheck::Mismatch { found } = check {
        session
            .ctx
            .failure_with("CONFIG_PRINTK_TIME=y was not accepted", found);
    }

    if session.build_and_install().await?.is_none() {
        return Ok(());
    }
    boot_installed(session).await?;

    let dmesg = session.board.run("dmesg").await?;
    if !dmesg.success() {
        session
            .ctx
            .failure_with("Error collecting results from 'dmesg'", dmesg.output);
        return Ok(());
    }

    let lines: Vec<&str> = dmesg.output.lines().collect();
    let mut printk_format_ok = true;
    for index in PRINTK_SAMPLE_LINES {
        let line = lines.get(index).copied().unwrap_or("");
        if scrape::printk_time(line).is_err() {
            printk_format_ok = false;
            session
                .ctx
                .failure(format!("Didn't find printk time format on dmesg line '{line}'"));
        }
    }
    if printk_format_ok {
        session
            .ctx
            .success("Successfully modified kernel configuration (with PRINTK_TIMES=y)");
    }

    session.board.run("dmesg >/tmp/dmesg.boot.007").await?;

    // Put the default configuration back for the cases that follow
    session.board.get_config(ExecOptions::CHECKED).await?;
    session.stamp_identity()?;
    session.board.kbuild(ExecOptions::DEFAULT).await?;
    session.board.kinstall(ExecOptions::CHECKED).await?;
    Ok(())
}

/// Uptime in seconds, or a recorded failure
async fn uptime(session: &mut Session) -> Result<Option<f64>> {
    let result = session.board.run("cat /proc/uptime").await?;
    match scrape::uptime(&result.output) {
        Ok(secs) => Ok(Some(secs)),
        Err(e) => {
            session
                .ctx
                .failure_with("Could not read uptime from target", e.raw);
            Ok(None)
        }
    }
}

/// Restart with `strategy` and report whether uptime went backwards
async fn restart_and_compare(session: &mut Session, strategy: ResetStrategy, verb: &str) -> Result<()> {
    let settle = session.config.timeouts.uptime_settle();
    println!("Waiting a bit for target to accumulate uptime...");
    tokio::time::sleep(settle).await;

    let Some(before) = uptime(session).await? else {
        return Ok(());
    };

    if !session.resets().reset(strategy).await? {
        session
            .ctx
            .result(format!("Target does not support {strategy}, not tested"));
        return Ok(());
    }

    let boot_wait = session.config.timeouts.boot_wait();
    if let BootWait::TimedOut { last_output, .. } = session.resets().wait_for_boot(boot_wait).await {
        session
            .ctx
            .failure_with(format!("Target board did not {verb} properly"), last_output);
        return Ok(());
    }

    let Some(after) = uptime(session).await? else {
        return Ok(());
    };
    session.ctx.result(format!(
        "uptime before {verb} was {before}, and after {verb} it is {after}"
    ));
    if after < before {
        session.ctx.success(format!("Target board {verb} properly"));
    } else {
        session
            .ctx
            .failure(format!("Target board did not {verb} properly"));
    }
    Ok(())
}

/// Both restart paths are exercised here regardless of the configured strategy
async fn reset_and_reboot(session: &mut Session) -> Result<()> {
    restart_and_compare(session, ResetStrategy::HardwareReset, "reset").await?;
    restart_and_compare(session, ResetStrategy::Reboot, "reboot").await
}

fn remove_scratch(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::debug!(path = %path.display(), "Could not remove scratch file: {}", e);
    }
}

fn unique_token() -> String {
    format!("unique_id={}", rand::thread_rng().gen_range(1..=10000))
}

async fn copy_to_target(session: &mut Session) -> Result<()> {
    let remote = "/tmp/test_010_file";
    let local = std::env::temp_dir().join(format!("test_010_file-{}", session.ctx.run_id()));
    let token = unique_token();
    std::fs::write(&local, format!("{token}\n"))?;

    session.board.copy_to(&local, remote).await?;
    let result = session.board.run(&format!("cat {remote}")).await;
    remove_scratch(&local);
    let result = result?;

    if !result.success() {
        session
            .ctx
            .failure_with(format!("Could not 'cat {remote}' on target"), result.output);
        return Ok(());
    }

    let copied = scrape::reported_line(&result.output);
    if copied == token {
        session.ctx.success("File was successfully copied to target");
    } else {
        session.ctx.failure_with(
            "Content of file copied to target was incorrect",
            result.output.clone(),
        );
    }

    session
        .board
        .run_with(&format!("rm {remote}"), ExecOptions::QUIET)
        .await?;
    Ok(())
}

async fn copy_from_target(session: &mut Session) -> Result<()> {
    let remote = "/tmp/test_011_file";
    let local = std::env::temp_dir().join(format!("test_011_file-{}", session.ctx.run_id()));
    let token = unique_token();

    session
        .board
        .run(&format!("echo \"{token}\" >{remote}"))
        .await?;

    let copy = session.board.copy_from(remote, &local).await?;
    if !copy.success() {
        session.ctx.failure_with(
            "File was not copied correctly from target. 'ttc cp...' failed.",
            copy.output,
        );
    }

    match std::fs::read_to_string(&local) {
        Ok(content) if content.trim() == token => {
            session.ctx.success("File was successfully copied from target");
        }
        Ok(content) => {
            session
                .ctx
                .failure_with("Content of file copied from target was incorrect", content);
        }
        Err(e) => {
            session.ctx.failure_with(
                "Could not read content of file read from target",
                e.to_string(),
            );
            return Ok(());
        }
    }

    remove_scratch(&local);
    session
        .board
        .run_with(&format!("rm {remote}"), ExecOptions::QUIET)
        .await?;
    Ok(())
}

async fn remote_command(session: &mut Session) -> Result<()> {
    let token = unique_token();
    let result = session.board.run(&format!("echo {token}")).await?;
    if result.success() && scrape::reported_line(&result.output) == token {
        session.ctx.success("Executed command on target");
    } else {
        session
            .ctx
            .failure_with("Command output from target was incorrect", result.output);
    }
    Ok(())
}

async fn kernel_command_line(session: &mut Session) -> Result<()> {
    let config = session.board.get_config(ExecOptions::DEFAULT).await?;
    if !config.success() {
        session
            .ctx
            .failure_with("Could not get default config", config.output);
        return Ok(());
    }

    // Needed on x86 before CONFIG_CMDLINE can be set; absent elsewhere
    session
        .board
        .set_config("CONFIG_CMDLINE_BOOL=y", ExecOptions::QUIET)
        .await?;

    let cmdline = session
        .board
        .set_config("CONFIG_CMDLINE+=\" quiet\"", ExecOptions::DEFAULT)
        .await?;
    if !cmdline.success() {
        session
            .ctx
            .failure_with("Could not set 'quiet' on kernel command line", cmdline.output);
        return Ok(());
    }

    session.board.oldconfig().await?;

    let config_file = session.board.require_workspace("oldconfig")?.config_file();
    match ConfigSnapshot::load(&config_file)?.value("CMDLINE") {
        Some(ConfigValue::Set(value)) if value.contains("quiet") => {}
        Some(ConfigValue::Set(value)) => {
            session.ctx.failure_with(
                "Couldn't find 'quiet' in CMDLINE in .config file",
                value.clone(),
            );
            return Ok(());
        }
        _ => {
            session.ctx.failure("Couldn't find CMDLINE in .config file");
            return Ok(());
        }
    }

    if session.build_and_install().await?.is_none() {
        return Ok(());
    }
    if !boot_installed(session).await? {
        return Ok(());
    }

    let dmesg = session.board.run("dmesg | grep \"command line:\"").await?;
    if !dmesg.success() {
        session
            .ctx
            .failure_with("Could not verify command line on target", dmesg.output);
        return Ok(());
    }
    if dmesg.output.contains("quiet") {
        session.ctx.success("Found 'quiet' on command line on target");
    } else {
        session.ctx.failure_with(
            "Could not find 'quiet' in command line on target",
            dmesg.output,
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_ids_are_ordered_and_unique() {
        let cases = TargetSuite::new().cases();
        let ids: Vec<&str> = cases.iter().map(|c| c.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(ids, sorted);
        assert_eq!(ids.first(), Some(&"001"));
    }

    #[test]
    fn test_unique_token_shape() {
        let token = unique_token();
        let n: u32 = token.strip_prefix("unique_id=").unwrap().parse().unwrap();
        assert!((1..=10000).contains(&n));
    }
}
