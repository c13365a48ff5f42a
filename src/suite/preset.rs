//! Preset loops-per-jiffy boot timing suite
//!
//! Measures how long the kernel's delay-loop calibration takes with the
//! loops-per-jiffy value measured at boot, supplied on the command line,
//! and compiled in. A preset value should skip calibration entirely, keep
//! the same BogoMIPS, and cost less than the configured threshold.

use async_trait::async_trait;

use super::{CaseInfo, Session, Suite};
use crate::common::{Error, Result};
use crate::exec::ExecOptions;
use crate::scrape::{self, Calibration};

pub const SUITE_NAME: &str = "PRESET_LPJ";

/// Calibration line followed by the first line printed after calibration
const CALIBRATION_DMESG: &str = "dmesg -s 64000 | grep Calib ; dmesg -s 64000 | grep Mount-cache";

/// Timing of one boot's calibration
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTiming {
    pub calibration: Calibration,
    /// Seconds between the calibration line and the next boot message
    pub elapsed: f64,
}

/// Parse the two-line calibration dmesg excerpt
pub fn calibration_timing(output: &str) -> scrape::Scrape<CalibrationTiming> {
    let mut lines = output.lines().filter(|l| !l.trim_start().starts_with("cmd="));
    let first = lines.next().unwrap_or("");
    let second = lines.next().unwrap_or("");

    let calibration = scrape::calibration(first)?;
    let start = scrape::printk_time(first)?;
    let end = scrape::printk_time(second)?;
    Ok(CalibrationTiming {
        calibration,
        elapsed: end - start,
    })
}

#[derive(Debug, Default)]
pub struct PresetSuite {
    lpj: Option<u64>,
    bogomips: Option<String>,
}

impl PresetSuite {
    pub fn new() -> Self {
        Self::default()
    }

    /// lpj and BogoMIPS measured without a preset, needed by the later cases
    fn baseline(&self) -> Option<(u64, String)> {
        Some((self.lpj?, self.bogomips.clone()?))
    }
}

#[async_trait]
impl Suite for PresetSuite {
    fn name(&self) -> &'static str {
        SUITE_NAME
    }

    fn cases(&self) -> Vec<CaseInfo> {
        vec![
            CaseInfo::new("001", "calibration with preset LPJ off"),
            CaseInfo::new("002", "calibration with preset LPJ on kernel command line"),
            CaseInfo::new("003", "calibration with preset LPJ compiled into kernel"),
        ]
    }

    async fn setup(&mut self, session: &mut Session) -> Result<()> {
        let workspace = session.planned_workspace()?;
        session.fetch_kernel_source(&workspace.source_dir).await?;
        std::fs::create_dir_all(&workspace.build_dir)?;
        session.board.enter_workspace(workspace);
        session.board.get_config(ExecOptions::CHECKED).await?;
        Ok(())
    }

    async fn run_case(&mut self, case: &CaseInfo, session: &mut Session) -> Result<()> {
        match case.id.as_str() {
            "001" => self.measured(session).await,
            "002" => self.command_line(session).await,
            "003" => self.compiled_in(session).await,
            other => Err(Error::Internal(format!("unknown case {other}"))),
        }
    }
}

/// Options shared by every boot in this suite
async fn apply_boot_options(session: &Session) -> Result<()> {
    for assignment in [
        "CONFIG_PRINTK_TIME=y",
        "CONFIG_FASTBOOT=y",
        "CONFIG_LOG_BUF_SHIFT=17",
        "CONFIG_CMDLINE+=\" quiet\"",
    ] {
        session
            .board
            .set_config(assignment, ExecOptions::CHECKED)
            .await?;
    }
    Ok(())
}

/// Build, install, boot with the configured reset strategy, and time calibration
///
/// Every problem along the way is recorded; `None` means there is nothing
/// to evaluate.
async fn boot_and_measure(session: &mut Session) -> Result<Option<CalibrationTiming>> {
    let Some(id) = session.build_and_install().await? else {
        return Ok(None);
    };

    let strategy = session.config.board.reset;
    let check = session.resets().reset_and_verify(strategy, &id).await?;
    if !check.is_running() {
        session
            .ctx
            .failure_with("Kernel just built is not running on board", check.detail());
        return Ok(None);
    }

    let dmesg = session.board.run(CALIBRATION_DMESG).await?;
    if !dmesg.success() {
        session
            .ctx
            .failure_with("Error collecting results from dmesg", dmesg.output);
        return Ok(None);
    }

    match calibration_timing(&dmesg.output) {
        Ok(timing) => Ok(Some(timing)),
        Err(e) => {
            session
                .ctx
                .failure_with(format!("Could not parse dmesg output: {e}"), dmesg.output);
            Ok(None)
        }
    }
}

impl PresetSuite {
    async fn measured(&mut self, session: &mut Session) -> Result<()> {
        apply_boot_options(session).await?;
        session
            .board
            .set_config("CONFIG_PRESET_LPJ=0", ExecOptions::CHECKED)
            .await?;

        let Some(timing) = boot_and_measure(session).await? else {
            return Ok(());
        };

        session.ctx.result(format!(
            "Calibration took {:.6} seconds with preset LPJ off",
            timing.elapsed
        ));
        match timing.calibration.lpj {
            Some(lpj) => {
                session.ctx.result(format!(
                    "Measured lpj={} BogoMIPS={}",
                    lpj, timing.calibration.bogomips
                ));
                self.lpj = Some(lpj);
                self.bogomips = Some(timing.calibration.bogomips);
            }
            None => session
                .ctx
                .failure("Couldn't read lpj value from calibration line"),
        }
        Ok(())
    }

    async fn command_line(&mut self, session: &mut Session) -> Result<()> {
        let Some((lpj, bogomips)) = self.baseline() else {
            session
                .ctx
                .failure("No lpj value was measured without preset, skipping");
            return Ok(());
        };

        session
            .board
            .set_config(&format!("CONFIG_CMDLINE+=\" lpj={lpj}\""), ExecOptions::CHECKED)
            .await?;

        if let Some(timing) = boot_and_measure(session).await? {
            evaluate(session, &timing, &bogomips, "preset lpj", "on kernel command line");
        }
        Ok(())
    }

    async fn compiled_in(&mut self, session: &mut Session) -> Result<()> {
        let Some((lpj, bogomips)) = self.baseline() else {
            session
                .ctx
                .failure("No lpj value was measured without preset, skipping");
            return Ok(());
        };

        session.board.get_config(ExecOptions::CHECKED).await?;
        apply_boot_options(session).await?;
        session
            .board
            .set_config(&format!("CONFIG_PRESET_LPJ={lpj}"), ExecOptions::CHECKED)
            .await?;

        if let Some(timing) = boot_and_measure(session).await? {
            evaluate(
                session,
                &timing,
                &bogomips,
                "static preset lpj",
                "compiled into kernel",
            );
        }
        Ok(())
    }
}

/// Judge a preset boot against the measured baseline
fn evaluate(
    session: &mut Session,
    timing: &CalibrationTiming,
    baseline_bogomips: &str,
    variant: &str,
    placement: &str,
) {
    if timing.calibration.bogomips == baseline_bogomips {
        session
            .ctx
            .success(format!("BogoMIPS value is the same with {variant}"));
    } else {
        session.ctx.failure(format!(
            "BogoMIPS value was changed with {variant} ({} instead of {})",
            timing.calibration.bogomips, baseline_bogomips
        ));
    }

    if timing.calibration.preset {
        session.ctx.success("lpj value was preset.");
    } else {
        session.ctx.failure("lpj value was not preset");
    }

    session.ctx.result(format!(
        "Calibration took {:.6} seconds with preset LPJ {placement}",
        timing.elapsed
    ));

    let threshold = session.config.policy.calibration_threshold_secs();
    let threshold_ms = session.config.policy.calibration_threshold_ms;
    if timing.elapsed < threshold {
        session
            .ctx
            .success(format!("calibration took less than {threshold_ms} milliseconds"));
    } else {
        session
            .ctx
            .failure(format!("calibration took longer than {threshold_ms} milliseconds."));
    }
}
