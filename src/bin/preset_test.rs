//! preset-test: boot calibration time with and without a preset lpj

use ttc_test::cli;
use ttc_test::commands::{self, PresetTestArgs};
use ttc_test::common::logging;
use ttc_test::suite::preset::PresetSuite;

#[tokio::main]
async fn main() {
    logging::init_cli();

    let args: PresetTestArgs = commands::parse_or_exit();

    match cli::launch("preset-test", &args.common, &mut PresetSuite::new()).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
