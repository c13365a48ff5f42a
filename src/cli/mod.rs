//! Program launch
//!
//! Shared by the three suite programs: load configuration, validate the
//! target against the board-control tool, open the run, sequence the
//! suite, and close the run with a summary.

use crate::board::{self, Board};
use crate::commands::{CommonArgs, ConfigSizesArgs, VERSION};
use crate::common::{Config, Error, Result};
use crate::exec::{CommandSpec, ExecOptions, Executor};
use crate::run::{report, RunContext};
use crate::suite::sizes::SizesOptions;
use crate::suite::{Sequencer, Session, Suite};

/// Set by the board-control tool inside a target environment shell
pub const TARGET_ENV_VAR: &str = "TTC_TARGET";

const UNKNOWN_HOST: &str = "unknown_host";

/// Run `suite` as program `program`
///
/// Returns whether the run passed: it completed and recorded no failures.
pub async fn launch<S: Suite + ?Sized>(program: &str, args: &CommonArgs, suite: &mut S) -> Result<bool> {
    if args.version {
        println!("{program} Version {VERSION}");
        return Ok(false);
    }

    let config = Config::load(args.config.as_deref())?;
    let tool = config.board.tool.clone();
    which::which(&tool).map_err(|_| Error::ToolNotFound(tool.clone()))?;

    let exec = Executor::host();
    let targets = board::list_targets(&exec, &tool).await?;
    let target = match args.target.as_deref() {
        None => {
            eprintln!("Error: Missing target");
            print_targets(&targets);
            return Ok(false);
        }
        Some(t) if !targets.iter().any(|known| known == t) => {
            eprintln!("Error: Unknown target '{t}'");
            print_targets(&targets);
            return Ok(false);
        }
        Some(t) => t.to_string(),
    };

    let host = host_name(&exec).await;
    tracing::debug!(%target, %host, suite = suite.name(), "Starting run");

    let ctx = RunContext::new(suite.name(), &target, host);
    let board = Board::new(&tool, &target, exec);
    let results_dir = suite.results_dir(&config, &target);
    let mut session = Session::new(ctx, board, config);
    session.ctx.start_log(&results_dir)?;

    let outcome = Sequencer::run(suite, &mut session).await;

    session.ctx.close_log()?;
    report::print_summary(session.ctx.results());
    if let Some(path) = session.ctx.log_path() {
        println!("Results are in {}", path.display());
    }
    if let Some(reason) = &outcome.aborted {
        eprintln!("Run stopped early: {reason}");
    }

    Ok(outcome.aborted.is_none() && session.ctx.failures() == 0)
}

/// Refuse to start inside a shell the board-control tool opened for a target
pub fn refuse_target_environment() -> Result<()> {
    match std::env::var(TARGET_ENV_VAR) {
        Ok(target) if !target.is_empty() => Err(Error::aborted(format!(
            "already inside the environment for target '{target}'; exit it first"
        ))),
        _ => Ok(()),
    }
}

fn print_targets(targets: &[String]) {
    eprintln!("Available targets:");
    for target in targets {
        eprintln!("  {target}");
    }
}

async fn host_name(exec: &Executor) -> String {
    match exec
        .execute(&CommandSpec::new("hostname"), ExecOptions::QUIET)
        .await
    {
        Ok(out) if out.success() && !out.output.trim().is_empty() => out.output.trim().to_string(),
        _ => UNKNOWN_HOST.to_string(),
    }
}

impl From<&ConfigSizesArgs> for SizesOptions {
    fn from(args: &ConfigSizesArgs) -> Self {
        Self {
            skip_built: args.skip_built,
            runtime: args.runtime,
            popped: args.popped,
            test_options: args.test_options,
            one_shot: args.one_shot.clone(),
            baseline: !args.no_baseline,
            alternatives: !args.no_alternatives,
            smallest: !args.no_smallest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_sizes_options_from_args() {
        let args =
            ConfigSizesArgs::try_parse_from(["config-sizes-test", "-p", "--no-baseline", "beagle"])
                .unwrap();
        let options = SizesOptions::from(&args);
        assert!(options.popped);
        assert!(!options.baseline);
        assert!(options.alternatives && options.smallest);
        assert_eq!(options.one_shot, None);
    }

    #[tokio::test]
    async fn test_version_ends_run_without_passing() {
        let args = CommonArgs {
            version: true,
            ..CommonArgs::default()
        };
        let mut suite = crate::suite::target::TargetSuite::new();
        assert!(!launch("target-test", &args, &mut suite).await.unwrap());
    }
}
