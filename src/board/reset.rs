//! Board reset strategies, settle policy, and wait-for-boot
//!
//! A reset is fire-and-forget as far as the board-control tool is concerned;
//! whether it worked is only known after the board comes back and reports
//! the expected kernel. Verification that fails once is retried with a
//! stronger strategy, once.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;

use super::identity::{self, IdentityCheck, KernelId};
use super::Board;
use crate::common::config::Timeouts;
use crate::common::Result;
use crate::exec::ExecOptions;

/// How the board is restarted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum ResetStrategy {
    /// Power or reset line through the board-control tool (`reset -w`)
    #[default]
    HardwareReset,
    /// `reboot` typed on the board's console (`run "reboot"`)
    ConsoleReboot,
    /// Board-control reboot (`reboot -w`)
    Reboot,
    /// An operator resets the board by hand
    Manual,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported board reset type '{0}'")]
pub struct UnknownStrategy(pub String);

impl ResetStrategy {
    pub const ALL: [ResetStrategy; 4] = [
        ResetStrategy::HardwareReset,
        ResetStrategy::ConsoleReboot,
        ResetStrategy::Reboot,
        ResetStrategy::Manual,
    ];

    /// The stronger strategy to try when this one did not take
    pub fn escalation(self) -> Option<ResetStrategy> {
        match self {
            ResetStrategy::HardwareReset | ResetStrategy::ConsoleReboot => {
                Some(ResetStrategy::Reboot)
            }
            ResetStrategy::Reboot | ResetStrategy::Manual => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResetStrategy::HardwareReset => "hardware-reset",
            ResetStrategy::ConsoleReboot => "console-reboot",
            ResetStrategy::Reboot => "reboot",
            ResetStrategy::Manual => "manual",
        }
    }
}

impl fmt::Display for ResetStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResetStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hardware-reset" | "hardware" | "reset" => Ok(ResetStrategy::HardwareReset),
            "console-reboot" | "console reboot" | "soft-reboot" => Ok(ResetStrategy::ConsoleReboot),
            "reboot" => Ok(ResetStrategy::Reboot),
            "manual" => Ok(ResetStrategy::Manual),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

impl TryFrom<String> for ResetStrategy {
    type Error = UnknownStrategy;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// Strategies named in a board's `reset_type` attribute
///
/// Returns `None` when the attribute is empty, meaning the board makes no
/// claim. Names that are not a known strategy are warned about and
/// dropped, so a board listing only unknown names supports nothing.
pub fn parse_supported(list: &str) -> Option<Vec<ResetStrategy>> {
    let names: Vec<&str> = list
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();
    if names.is_empty() {
        return None;
    }
    Some(
        names
            .into_iter()
            .filter_map(|name| match name.parse() {
                Ok(strategy) => Some(strategy),
                Err(e) => {
                    tracing::warn!("{}, ignoring it", e);
                    None
                }
            })
            .collect(),
    )
}

/// Result of waiting for a board to answer after a reset
#[derive(Debug, Clone, PartialEq)]
pub enum BootWait {
    Booted { elapsed: Duration },
    TimedOut { waited: Duration, last_output: String },
}

impl BootWait {
    pub fn is_booted(&self) -> bool {
        matches!(self, BootWait::Booted { .. })
    }
}

/// Issues resets for one board under the configured timing policy
pub struct ResetController<'a> {
    board: &'a Board,
    timeouts: &'a Timeouts,
}

impl<'a> ResetController<'a> {
    pub fn new(board: &'a Board, timeouts: &'a Timeouts) -> Self {
        Self { board, timeouts }
    }

    /// Strategies the board declares through `info -n reset_type`
    pub async fn supported(&self) -> Option<Vec<ResetStrategy>> {
        let declared = self.board.target_value("reset_type", "").await;
        parse_supported(&declared)
    }

    async fn is_supported(&self, strategy: ResetStrategy) -> bool {
        if strategy == ResetStrategy::Manual {
            return true;
        }
        match self.supported().await {
            Some(list) => list.contains(&strategy),
            None => true,
        }
    }

    /// Seconds to let the board settle: its own `reset_timeout`, else policy
    pub async fn settle_time(&self) -> Duration {
        let declared = self.board.target_value("reset_timeout", "").await;
        declared
            .parse::<u64>()
            .map(Duration::from_secs)
            .unwrap_or_else(|_| self.timeouts.reset_settle())
    }

    /// Restart the board and wait out the settle time
    ///
    /// Returns `false` without touching the board when the strategy is not
    /// supported by this target.
    pub async fn reset(&self, strategy: ResetStrategy) -> Result<bool> {
        if !self.is_supported(strategy).await {
            tracing::warn!(
                target_name = self.board.target(),
                "Board does not support reset type '{}', not resetting",
                strategy
            );
            return Ok(false);
        }

        match strategy {
            ResetStrategy::HardwareReset => {
                self.board.reset(true).await?;
            }
            ResetStrategy::ConsoleReboot => {
                self.board.run_with("reboot", ExecOptions::DEFAULT).await?;
            }
            ResetStrategy::Reboot => {
                self.board.reboot(true).await?;
            }
            ResetStrategy::Manual => {
                println!("*** Manual reset required - please reset the board and hit <enter>");
                let mut line = String::new();
                BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
            }
        }

        let settle = self.settle_time().await;
        tracing::info!("Sleeping {} seconds to wait for board to reset", settle.as_secs());
        tokio::time::sleep(settle).await;
        Ok(true)
    }

    /// Poll the board with a trivial command until it answers or `max` passes
    pub async fn wait_for_boot(&self, max: Duration) -> BootWait {
        let start = Instant::now();
        let deadline = start + max;
        let interval = self.timeouts.poll_interval();
        let mut last_output = String::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let poll = self.board.run_with("echo hello", ExecOptions::QUIET);
            match tokio::time::timeout(remaining, poll).await {
                Ok(Ok(result)) if result.success() => {
                    return BootWait::Booted {
                        elapsed: start.elapsed(),
                    };
                }
                Ok(Ok(result)) => last_output = result.output,
                Ok(Err(e)) => last_output = e.to_string(),
                Err(_) => break,
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tracing::debug!(remaining_secs = remaining.as_secs_f64(), "Board not answering yet");
            tokio::time::sleep(interval.min(remaining)).await;
        }

        BootWait::TimedOut {
            waited: start.elapsed(),
            last_output,
        }
    }

    /// Reset and confirm the expected kernel
    ///
    /// Escalates once if the kernel is not running. The board is only asked
    /// for its kernel after a reset was actually performed.
    pub async fn reset_and_verify(
        &self,
        strategy: ResetStrategy,
        id: &KernelId,
    ) -> Result<IdentityCheck> {
        let check = self.reset_then_verify(strategy, id).await?;
        if check.is_running() {
            return Ok(check);
        }

        match strategy.escalation() {
            Some(stronger) => {
                tracing::warn!(
                    "Kernel {} not running after {}, trying {}",
                    id,
                    strategy,
                    stronger
                );
                self.reset_then_verify(stronger, id).await
            }
            None => Ok(check),
        }
    }

    async fn reset_then_verify(
        &self,
        strategy: ResetStrategy,
        id: &KernelId,
    ) -> Result<IdentityCheck> {
        if self.reset(strategy).await? {
            Ok(identity::verify(self.board, id).await)
        } else {
            Ok(IdentityCheck::Unreachable {
                output: format!("board was not restarted: reset type '{strategy}' is not supported"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_legacy_names() {
        assert_eq!("reset".parse(), Ok(ResetStrategy::HardwareReset));
        assert_eq!("hardware".parse(), Ok(ResetStrategy::HardwareReset));
        assert_eq!("console reboot".parse(), Ok(ResetStrategy::ConsoleReboot));
        assert_eq!("Reboot".parse(), Ok(ResetStrategy::Reboot));
        assert_eq!("manual".parse(), Ok(ResetStrategy::Manual));
        assert!("kick-it".parse::<ResetStrategy>().is_err());
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        for strategy in ResetStrategy::ALL {
            assert_eq!(strategy.to_string().parse(), Ok(strategy));
        }
    }

    #[test]
    fn test_escalation() {
        assert_eq!(
            ResetStrategy::HardwareReset.escalation(),
            Some(ResetStrategy::Reboot)
        );
        assert_eq!(
            ResetStrategy::ConsoleReboot.escalation(),
            Some(ResetStrategy::Reboot)
        );
        assert_eq!(ResetStrategy::Reboot.escalation(), None);
        assert_eq!(ResetStrategy::Manual.escalation(), None);
    }

    #[test]
    fn test_parse_supported() {
        assert_eq!(
            parse_supported("reset, console reboot"),
            Some(vec![ResetStrategy::HardwareReset, ResetStrategy::ConsoleReboot])
        );
        assert_eq!(parse_supported(""), None);
        assert_eq!(parse_supported(" , "), None);
        assert_eq!(parse_supported("teleport"), Some(vec![]));
        assert_eq!(
            parse_supported("teleport,reboot"),
            Some(vec![ResetStrategy::Reboot])
        );
    }
}
