//! target-test: exercise every board-control operation against one target
//!
//! Fetches and configures a kernel, builds and installs it, resets the
//! board several ways, copies files both directions, and checks that the
//! board is running what was built.

use ttc_test::cli;
use ttc_test::commands::{self, TargetTestArgs};
use ttc_test::common::logging;
use ttc_test::suite::target::TargetSuite;

#[tokio::main]
async fn main() {
    logging::init_cli();

    let args: TargetTestArgs = commands::parse_or_exit();

    let result = match cli::refuse_target_environment() {
        Ok(()) => cli::launch("target-test", &args.common, &mut TargetSuite::new()).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
