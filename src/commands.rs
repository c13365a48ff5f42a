//! CLI argument definitions
//!
//! One clap struct per program. Help and version both end the program with
//! a nonzero status, so clap's own version flag is disabled and `-V` is
//! handled by the launcher.

use std::path::PathBuf;

use clap::{Args, Parser};

/// Version printed by `-V`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Arguments every suite program accepts
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Show program version and exit
    #[arg(short = 'V', long = "version")]
    pub version: bool,

    /// Configuration file to use instead of the default one
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Target board, as listed by 'ttc list'
    pub target: Option<String>,
}

#[derive(Parser, Debug)]
#[command(
    name = "target-test",
    about = "Test the ttc board-control operations against a target",
    disable_version_flag = true
)]
pub struct TargetTestArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Parser, Debug)]
#[command(
    name = "preset-test",
    about = "Measure boot calibration time with and without a preset loops-per-jiffy",
    disable_version_flag = true
)]
pub struct PresetTestArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Parser, Debug)]
#[command(
    name = "config-sizes-test",
    about = "Measure kernel size for individual configuration options",
    disable_version_flag = true
)]
pub struct ConfigSizesArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Skip option settings whose image is already in the data directory
    #[arg(short = 'c')]
    pub skip_built: bool,

    /// Boot each kernel and record free memory
    #[arg(short = 'r')]
    pub runtime: bool,

    /// Also build the baseline with quilt patches popped
    #[arg(short = 'p')]
    pub popped: bool,

    /// Use the short test option list
    #[arg(short = 't')]
    pub test_options: bool,

    /// Build only one option, e.g. 'AIO' or 'LOG_BUF_SHIFT=12|17'; ignored with -t
    #[arg(short = 'o', value_name = "EXPR")]
    pub one_shot: Option<String>,

    /// Do not build the baseline kernel
    #[arg(long)]
    pub no_baseline: bool,

    /// Do not build the per-option kernels
    #[arg(long)]
    pub no_alternatives: bool,

    /// Do not build the smallest-configuration kernel
    #[arg(long)]
    pub no_smallest: bool,
}

/// Parse the command line, exiting nonzero after help, usage errors, or bad input
pub fn parse_or_exit<P: Parser>() -> P {
    match P::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    }
}
