//! Kernel size measurement across configuration options
//!
//! Builds a baseline kernel, one kernel per option setting in the option
//! tables, and a smallest-configuration kernel, recording the `size` of each
//! image. Configurations, images, and System.map files are kept per label
//! in the data directory (`<results>-<target>`) so later runs can skip them
//! with `-c` and diffs can be redone by hand.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{CaseInfo, Session, Suite};
use crate::board::kconfig::{
    self, Assignment, ConfigCheck, ConfigSnapshot, OptionExperiment, OptionSetting, OptionTables,
};
use crate::board::reset::ResetStrategy;
use crate::common::{Config, Error, Result};
use crate::exec::{CommandSpec, ExecOptions};
use crate::scrape;

pub const SUITE_NAME: &str = "Size-test";

const BASELINE: &str = "baseline";
const BASELINE_POPPED: &str = "baseline-popped";
const SMALLEST: &str = "smallest";

/// What to build, from the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizesOptions {
    /// Skip option settings whose image is already in the data directory
    pub skip_built: bool,
    /// Boot each kernel and record free memory
    pub runtime: bool,
    /// Also build the baseline with quilt patches popped
    pub popped: bool,
    /// Use the short test option list
    pub test_options: bool,
    /// Build only this option expression (`AIO`, `LOG_BUF_SHIFT=12|17`)
    pub one_shot: Option<String>,
    pub baseline: bool,
    pub alternatives: bool,
    pub smallest: bool,
}

impl Default for SizesOptions {
    fn default() -> Self {
        Self {
            skip_built: false,
            runtime: false,
            popped: false,
            test_options: false,
            one_shot: None,
            baseline: true,
            alternatives: true,
            smallest: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Build {
    /// A whole-configuration kernel: baseline, baseline-popped, smallest
    Kernel(&'static str),
    /// The baseline with one option changed
    Variant { option: String, setting: OptionSetting },
}

/// Data directory for a target: the results directory suffixed with the target name
pub fn data_dir(config: &Config, target: &str) -> PathBuf {
    let mut name = config.paths.results_dir.clone().into_os_string();
    name.push(format!("-{target}"));
    PathBuf::from(name)
}

/// Label used in file names and ids: `AIO-y`, `LOG_BUF_SHIFT-12`
fn option_label(option: &str, value: &str) -> String {
    format!("{}-{}", kconfig::short_name(option), value)
}

#[derive(Debug)]
pub struct SizesSuite {
    options: SizesOptions,
    smallest: Vec<Assignment>,
    plan: Vec<(CaseInfo, Build)>,
    data_dir: Option<PathBuf>,
}

impl SizesSuite {
    pub fn new(options: SizesOptions, tables: OptionTables) -> Result<Self> {
        // The short test list wins over a one-shot expression
        let experiments: Vec<OptionExperiment> = match &options.one_shot {
            _ if options.test_options => tables.test.clone(),
            Some(expr) => vec![kconfig::parse_one_shot(expr)?],
            None => tables.default_experiments(),
        };
        // A one-shot expression means the alternatives are wanted
        let build_alternatives = options.alternatives || options.one_shot.is_some();

        let mut plan = Vec::new();
        if options.baseline {
            plan.push((
                CaseInfo::new(BASELINE, "baseline kernel"),
                Build::Kernel(BASELINE),
            ));
        }
        if options.popped {
            plan.push((
                CaseInfo::new(BASELINE_POPPED, "baseline kernel without patches"),
                Build::Kernel(BASELINE_POPPED),
            ));
        }
        if build_alternatives {
            let total = experiments.len();
            for (index, experiment) in experiments.into_iter().enumerate() {
                for setting in experiment.settings {
                    let short = kconfig::short_name(&experiment.option).to_string();
                    plan.push((
                        CaseInfo::new(
                            format!("{}={}", short, setting.value),
                            format!("option {} of {}", index + 1, total),
                        ),
                        Build::Variant {
                            option: kconfig::option_name(&short),
                            setting,
                        },
                    ));
                }
            }
        }
        if options.smallest {
            plan.push((
                CaseInfo::new(SMALLEST, "smallest configuration kernel"),
                Build::Kernel(SMALLEST),
            ));
        }

        Ok(Self {
            options,
            smallest: tables.smallest,
            plan,
            data_dir: None,
        })
    }

    fn data_dir(&self) -> Result<&Path> {
        self.data_dir
            .as_deref()
            .ok_or_else(|| Error::BuildEnvUnset("size data directory".into()))
    }

    fn baseline_config(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("config.baseline"))
    }
}

#[async_trait]
impl Suite for SizesSuite {
    fn name(&self) -> &'static str {
        SUITE_NAME
    }

    fn cases(&self) -> Vec<CaseInfo> {
        self.plan.iter().map(|(case, _)| case.clone()).collect()
    }

    fn results_dir(&self, config: &Config, target: &str) -> PathBuf {
        data_dir(config, target)
    }

    async fn setup(&mut self, session: &mut Session) -> Result<()> {
        let workspace = session.planned_workspace()?;
        let data = super::absolute(&data_dir(&session.config, session.board.target()))?;

        session.fetch_kernel_source(&workspace.source_dir).await?;
        std::fs::create_dir_all(&workspace.build_dir)?;
        std::fs::create_dir_all(&data)?;
        let config_file = workspace.config_file();
        session.board.enter_workspace(workspace);

        session.board.get_config(ExecOptions::CHECKED).await?;
        session
            .board
            .set_config("CONFIG_EMBEDDED=y", ExecOptions::DEFAULT)
            .await?;
        session.board.oldconfig().await?;
        std::fs::copy(&config_file, data.join("config.baseline"))?;

        self.data_dir = Some(data);
        Ok(())
    }

    async fn run_case(&mut self, case: &CaseInfo, session: &mut Session) -> Result<()> {
        let build = self
            .plan
            .iter()
            .find(|(planned, _)| planned.id == case.id)
            .map(|(_, build)| build.clone())
            .ok_or_else(|| Error::Internal(format!("unknown case {}", case.id)))?;

        println!("Running test {}...", session.ctx.current_id());
        match build {
            Build::Kernel(label) => self.whole_kernel(session, label).await,
            Build::Variant { option, setting } => self.one_option(session, &option, &setting).await,
        }
    }
}

impl SizesSuite {
    async fn whole_kernel(&self, session: &mut Session, label: &str) -> Result<()> {
        let source_dir = session.board.require_workspace("kbuild")?.source_dir.clone();
        let pop = label == BASELINE_POPPED && source_dir.join("patches/series").exists();

        if pop {
            let popped = quilt(session, "pop").await?;
            if !popped.success() {
                session
                    .ctx
                    .failure_with("Could not pop patches", popped.output);
                quilt(session, "push").await?;
                return Ok(());
            }
        }

        let built = self.build_whole_kernel(session, label).await;

        if pop {
            quilt(session, "push").await?;
        }
        if !built? {
            return Ok(());
        }

        if self.options.runtime {
            runtime_check(session).await?;
        } else {
            println!("  No runtime test requested.");
        }
        Ok(())
    }

    /// Returns whether a kernel was built and measured
    async fn build_whole_kernel(&self, session: &mut Session, label: &str) -> Result<bool> {
        let config_file = session.board.require_workspace("kbuild")?.config_file();
        std::fs::copy(self.baseline_config()?, &config_file)?;

        if label == SMALLEST {
            for assignment in &self.smallest {
                session
                    .board
                    .set_config(&assignment.to_string(), ExecOptions::DEFAULT)
                    .await?;
            }
        }
        session.board.oldconfig().await?;

        if label != BASELINE {
            std::fs::copy(&config_file, self.data_dir()?.join(format!("config.{label}")))?;
        }

        if !build_kernel(session, &format!("Could not build {label} kernel")).await? {
            return Ok(false);
        }
        measure_size(session).await?;
        save_images(session, self.data_dir()?, label)?;
        Ok(true)
    }

    async fn one_option(&self, session: &mut Session, option: &str, setting: &OptionSetting) -> Result<()> {
        let label = option_label(option, &setting.value);
        let data = self.data_dir()?.to_path_buf();

        if self.options.skip_built && data.join(format!("vmlinux.{label}")).exists() {
            println!("vmlinux.{label} already exists, skipping...");
            return Ok(());
        }

        let config_file = session.board.require_workspace("set_config")?.config_file();
        std::fs::copy(self.baseline_config()?, &config_file)?;

        session
            .board
            .set_config(&format!("{}={}", option, setting.value), ExecOptions::DEFAULT)
            .await?;
        for dependent in &setting.dependents {
            session
                .board
                .set_config(&dependent.to_string(), ExecOptions::DEFAULT)
                .await?;
        }
        session.board.oldconfig().await?;

        let variant_config = data.join(format!("config.{label}"));
        std::fs::copy(&config_file, &variant_config)?;

        let variant = ConfigSnapshot::load(&variant_config)?;
        if let ConfigCheck::Mismatch { found } = variant.verify(option, &setting.value) {
            session.ctx.failure_with(
                format!(
                    "Could not set configure option {} to value {}",
                    option, setting.value
                ),
                found,
            );
            return Ok(());
        }

        let baseline = ConfigSnapshot::load(&self.baseline_config()?)?;
        let changes = baseline.diff(&variant);
        if !changes.iter().any(|c| c.option == option) {
            session.ctx.result("Setting matches baseline - skipping build");
            return Ok(());
        }
        let diff: Vec<String> = changes.iter().map(ToString::to_string).collect();
        session
            .ctx
            .result(format!("diffconfig result: {}", diff.join("\n")));

        if !build_kernel(session, "Could not build kernel").await? {
            return Ok(());
        }
        save_images(session, &data, &label)?;
        measure_size(session).await?;

        if self.options.runtime {
            runtime_check(session).await?;
        } else {
            println!("  No runtime test requested.");
        }
        Ok(())
    }
}

async fn quilt(session: &Session, direction: &str) -> Result<crate::exec::CommandOutput> {
    let spec = session
        .board
        .in_workspace(CommandSpec::new("quilt").args([direction, "-a"]));
    session.host(spec).await
}

/// Build without an identity stamp; records a failure and returns `false`
/// when no image comes out
async fn build_kernel(session: &mut Session, failure: &str) -> Result<bool> {
    let image = session.board.require_workspace("kbuild")?.kernel_image();
    match std::fs::remove_file(&image) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    session.clear_identity()?;

    let build = session.board.kbuild(ExecOptions::DEFAULT).await?;
    if !build.success() || !image.is_file() {
        session.ctx.failure_with(failure, build.output);
        return Ok(false);
    }
    Ok(true)
}

/// Record the section sizes of the image just built
async fn measure_size(session: &mut Session) -> Result<()> {
    let image = session.board.require_workspace("kbuild")?.kernel_image();
    let result = session
        .host(CommandSpec::new("size").arg(image.to_string_lossy()))
        .await?;
    if !result.success() {
        session
            .ctx
            .failure_with("Could not get size for kernel", result.output);
        return Ok(());
    }

    match scrape::size_report(&result.output) {
        Ok(size) => {
            session.ctx.result(format!("kernel text size: {}", size.text));
            session.ctx.result(format!("kernel data size: {}", size.data));
            session.ctx.result(format!("kernel bss size: {}", size.bss));
            session.ctx.result(format!("kernel total size: {}", size.total));
        }
        Err(e) => session
            .ctx
            .failure_with(format!("Could not parse size output: {e}"), result.output),
    }
    Ok(())
}

/// Keep the image and symbol map under the build's label
fn save_images(session: &Session, data: &Path, label: &str) -> Result<()> {
    let workspace = session.board.require_workspace("kbuild")?;
    std::fs::copy(workspace.kernel_image(), data.join(format!("vmlinux.{label}")))?;
    if let Err(e) = std::fs::copy(workspace.system_map(), data.join(format!("System.map.{label}"))) {
        tracing::warn!("Could not save System.map for {}: {}", label, e);
    }
    Ok(())
}

/// Boot the configuration with an identity stamp and record free memory
async fn runtime_check(session: &mut Session) -> Result<()> {
    let Some(id) = session.build_and_install().await? else {
        return Ok(());
    };

    let check = session
        .resets()
        .reset_and_verify(ResetStrategy::HardwareReset, &id)
        .await?;
    if !check.is_running() {
        session
            .ctx
            .failure_with("Kernel just built is not running on board", check.detail());
        return Ok(());
    }

    let free = session.board.run("free -tb").await?;
    if !free.success() {
        session
            .ctx
            .failure_with("Error collecting results from free", free.output);
        return Ok(());
    }
    match scrape::free_total(&free.output) {
        Ok(bytes) => session
            .ctx
            .result_with(format!("free memory: {bytes}"), free.output),
        Err(_) => session
            .ctx
            .failure_with("Error parsing results from free", free.output),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> OptionTables {
        OptionTables::from_toml_str(
            r#"
yes_no = ["AIO"]

[[valued]]
option = "LOG_BUF_SHIFT"
settings = [{ value = "17" }, { value = "12" }]

[[test]]
option = "SWAP"
settings = [{ value = "n" }]

[[smallest]]
option = "AIO"
value = "n"
"#,
        )
        .unwrap()
    }

    fn ids(suite: &SizesSuite) -> Vec<String> {
        suite.cases().into_iter().map(|c| c.id).collect()
    }

    #[test]
    fn test_default_plan() {
        let suite = SizesSuite::new(SizesOptions::default(), tables()).unwrap();
        assert_eq!(
            ids(&suite),
            ["baseline", "AIO=y", "AIO=n", "LOG_BUF_SHIFT=17", "LOG_BUF_SHIFT=12", "smallest"]
        );
    }

    #[test]
    fn test_plan_flags() {
        let options = SizesOptions {
            popped: true,
            test_options: true,
            smallest: false,
            ..SizesOptions::default()
        };
        let suite = SizesSuite::new(options, tables()).unwrap();
        assert_eq!(ids(&suite), ["baseline", "baseline-popped", "SWAP=n"]);
    }

    #[test]
    fn test_one_shot_overrides_option_lists() {
        let options = SizesOptions {
            one_shot: Some("NR_LDISCS=16|1".into()),
            alternatives: false,
            baseline: false,
            smallest: false,
            ..SizesOptions::default()
        };
        let suite = SizesSuite::new(options, tables()).unwrap();
        assert_eq!(ids(&suite), ["NR_LDISCS=16", "NR_LDISCS=1"]);
    }

    #[test]
    fn test_test_list_wins_over_one_shot() {
        let options = SizesOptions {
            one_shot: Some("NR_LDISCS=16|1".into()),
            test_options: true,
            baseline: false,
            smallest: false,
            ..SizesOptions::default()
        };
        let suite = SizesSuite::new(options, tables()).unwrap();
        assert_eq!(ids(&suite), ["SWAP=n"]);
    }

    #[test]
    fn test_bad_one_shot_is_error() {
        let options = SizesOptions {
            one_shot: Some("=y".into()),
            ..SizesOptions::default()
        };
        assert!(SizesSuite::new(options, tables()).is_err());
    }

    #[test]
    fn test_data_dir_and_labels() {
        let config = Config::default();
        assert_eq!(data_dir(&config, "beagle"), PathBuf::from("test-data-beagle"));
        assert_eq!(option_label("CONFIG_AIO", "n"), "AIO-n");
    }
}
