//! Test run context
//!
//! Holds the identity of a run (suite, target, host, run id), the ordered
//! list of result records, and the session log. Every record is printed and
//! written to the log the moment it is made, so a run that dies half way
//! still leaves a readable trail.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use colored::Colorize;
use rand::Rng;
use serde::Serialize;

use super::report;
use crate::board::identity::KernelId;
use crate::common::{timestamp, Result};

const SEPARATOR: &str = "------------------";

/// Kind of a recorded outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultKind {
    /// Informational measurement
    Result,
    Success,
    Failure,
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResultKind::Result => "RESULT",
            ResultKind::Success => "SUCCESS",
            ResultKind::Failure => "FAILURE",
        })
    }
}

/// One recorded outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub test_id: String,
    pub kind: ResultKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
    pub timestamp: String,
}

/// Replay file written next to the session log
#[derive(Serialize)]
struct Replay<'a> {
    suite: &'a str,
    target: &'a str,
    host: &'a str,
    run_id: &'a str,
    started: String,
    records: &'a [ResultRecord],
}

#[derive(Debug)]
struct SessionLog {
    path: PathBuf,
    file: File,
}

/// State of one invocation of a suite against one target
#[derive(Debug)]
pub struct RunContext {
    suite: String,
    target: String,
    host: String,
    run_id: String,
    started: DateTime<Local>,
    current_id: String,
    results: Vec<ResultRecord>,
    log: Option<SessionLog>,
    expected_identity: Option<KernelId>,
}

impl RunContext {
    pub fn new(suite: impl Into<String>, target: impl Into<String>, host: impl Into<String>) -> Self {
        let suite = suite.into();
        let current_id = format!("{suite}-000");
        Self {
            suite,
            target: target.into(),
            host: host.into(),
            run_id: format!("{:04}", rand::thread_rng().gen_range(1..=10000)),
            started: Local::now(),
            current_id,
            results: Vec::new(),
            log: None,
            expected_identity: None,
        }
    }

    pub fn suite(&self) -> &str {
        &self.suite
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn current_id(&self) -> &str {
        &self.current_id
    }

    pub fn results(&self) -> &[ResultRecord] {
        &self.results
    }

    pub fn failures(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.kind == ResultKind::Failure)
            .count()
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log.as_ref().map(|l| l.path.as_path())
    }

    pub fn expected_identity(&self) -> Option<&KernelId> {
        self.expected_identity.as_ref()
    }

    pub fn set_expected_identity(&mut self, id: KernelId) {
        self.expected_identity = Some(id);
    }

    /// Make `case_id` the test id for every record that follows
    pub fn set_id(&mut self, case_id: &str, description: &str) {
        self.current_id = format!("{}-{}", self.suite, case_id);
        let line = format!(
            "[TEST: {} - {}] Starting at {}",
            self.current_id,
            description,
            timestamp()
        );
        println!("{}", line.bold());
        self.write_log(&line, None);
    }

    pub fn result(&mut self, message: impl Into<String>) {
        self.record(ResultKind::Result, message.into(), None);
    }

    pub fn result_with(&mut self, message: impl Into<String>, extra: impl Into<String>) {
        self.record(ResultKind::Result, message.into(), Some(extra.into()));
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.record(ResultKind::Success, message.into(), None);
    }

    pub fn success_with(&mut self, message: impl Into<String>, extra: impl Into<String>) {
        self.record(ResultKind::Success, message.into(), Some(extra.into()));
    }

    pub fn failure(&mut self, message: impl Into<String>) {
        self.record(ResultKind::Failure, message.into(), None);
    }

    pub fn failure_with(&mut self, message: impl Into<String>, extra: impl Into<String>) {
        self.record(ResultKind::Failure, message.into(), Some(extra.into()));
    }

    /// Append a record under the current test id, print it, and log it
    pub fn record(&mut self, kind: ResultKind, message: String, extra: Option<String>) {
        let extra = extra.filter(|e| !e.is_empty());
        let line = format!("[TEST: {}] {} - {}", self.current_id, kind, message);
        match kind {
            ResultKind::Failure => println!("{}", line.red()),
            ResultKind::Success => println!("{}", line.green()),
            ResultKind::Result => println!("{line}"),
        }
        self.write_log(&line, extra.as_deref());

        self.results.push(ResultRecord {
            test_id: self.current_id.clone(),
            kind,
            message,
            extra,
            timestamp: timestamp(),
        });
    }

    fn write_log(&mut self, line: &str, extra: Option<&str>) {
        let Some(log) = self.log.as_mut() else {
            return;
        };
        let written = writeln!(log.file, "{line}")
            .and_then(|_| match extra {
                Some(extra) => writeln!(log.file, "{extra}"),
                None => Ok(()),
            })
            .and_then(|_| log.file.flush());
        if let Err(e) = written {
            tracing::warn!(path = %log.path.display(), "Failed to write session log: {}", e);
        }
    }

    /// File name of the session log for this run
    pub fn log_file_name(&self) -> String {
        format!(
            "{}-{}-{}-{}.log",
            self.suite,
            self.target,
            self.started.format("%Y.%m.%d-%H:%M:%S"),
            self.run_id
        )
    }

    /// Open the session log in `dir` and write its header
    ///
    /// Does nothing when a log is already open. Reopening after
    /// [`close_log`](Self::close_log) appends to the same file.
    pub fn start_log(&mut self, dir: &Path) -> Result<PathBuf> {
        if let Some(log) = &self.log {
            return Ok(log.path.clone());
        }

        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.log_file_name());
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        writeln!(file, "Details:")?;
        writeln!(file, "{SEPARATOR}\n")?;
        writeln!(file, "{} test results", self.suite)?;
        writeln!(file, "time = {}", self.started.format("%a %b %e %H:%M:%S %Y"))?;
        writeln!(file, "target = {}", self.target)?;
        writeln!(file, "host = {}", self.host)?;
        writeln!(file, "{SEPARATOR}\n")?;
        file.flush()?;

        tracing::info!(path = %path.display(), "Logging results");
        self.log = Some(SessionLog {
            path: path.clone(),
            file,
        });
        Ok(path)
    }

    /// Write the summary block and the replay file, then release the log
    ///
    /// Safe to call more than once; only the first call writes anything.
    pub fn close_log(&mut self) -> Result<()> {
        let Some(mut log) = self.log.take() else {
            return Ok(());
        };

        writeln!(log.file, "Summary:")?;
        report::write_summary(&mut log.file, &self.results)?;
        writeln!(log.file, "{SEPARATOR}\n")?;
        log.file.flush()?;

        let replay = Replay {
            suite: &self.suite,
            target: &self.target,
            host: &self.host,
            run_id: &self.run_id,
            started: self.started.to_rfc3339(),
            records: &self.results,
        };
        let mut json_path = log.path.clone().into_os_string();
        json_path.push(".json");
        std::fs::write(&json_path, serde_json::to_string_pretty(&replay)?)?;
        Ok(())
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        if let Err(e) = self.close_log() {
            tracing::warn!("Failed to close session log: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_belong_to_last_set_id() {
        let mut ctx = RunContext::new("TARG", "beagle", "buildhost");
        ctx.set_id("001", "verify target is in 'ttc list'");
        ctx.success("target 'beagle' is in 'ttc list'");
        ctx.set_id("002", "get target info");
        ctx.failure_with("Could not get info for target 'beagle'", "no route to host");
        ctx.result("kernel image name is 'uImage'");

        let ids: Vec<&str> = ctx.results().iter().map(|r| r.test_id.as_str()).collect();
        assert_eq!(ids, ["TARG-001", "TARG-002", "TARG-002"]);
        assert_eq!(ctx.results()[1].extra.as_deref(), Some("no route to host"));
        assert_eq!(ctx.failures(), 1);
    }

    #[test]
    fn test_empty_extra_is_dropped() {
        let mut ctx = RunContext::new("TARG", "beagle", "buildhost");
        ctx.success_with("Retrieved kernel source OK", "");
        assert_eq!(ctx.results()[0].extra, None);
    }

    #[test]
    fn test_run_id_shape() {
        let ctx = RunContext::new("PRESET_LPJ", "beagle", "buildhost");
        let n: u32 = ctx.run_id().parse().unwrap();
        assert!((1..=10000).contains(&n));
        assert!(ctx.run_id().len() >= 4);
        assert!(ctx.log_file_name().starts_with("PRESET_LPJ-beagle-"));
        assert!(ctx.log_file_name().ends_with(&format!("-{}.log", ctx.run_id())));
    }

    #[test]
    fn test_close_without_log_is_noop() {
        let mut ctx = RunContext::new("TARG", "beagle", "buildhost");
        ctx.close_log().unwrap();
        assert!(ctx.log_path().is_none());
    }

    #[test]
    fn test_start_log_twice_keeps_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = RunContext::new("TARG", "beagle", "buildhost");
        let first = ctx.start_log(dir.path()).unwrap();
        let second = ctx.start_log(&dir.path().join("elsewhere")).unwrap();
        assert_eq!(first, second);
        assert!(!dir.path().join("elsewhere").exists());
    }

    #[test]
    fn test_reopened_log_keeps_earlier_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = RunContext::new("TARG", "beagle", "buildhost");
        let first = ctx.start_log(dir.path()).unwrap();
        ctx.set_id("001", "verify target is in 'ttc list'");
        ctx.success("first record");
        ctx.close_log().unwrap();

        let second = ctx.start_log(dir.path()).unwrap();
        ctx.set_id("002", "get target info");
        ctx.failure("second record");
        ctx.close_log().unwrap();

        assert_eq!(first, second);
        let log = std::fs::read_to_string(&first).unwrap();
        assert!(log.contains("[TEST: TARG-001] SUCCESS - first record\n"));
        assert!(log.contains("[TEST: TARG-002] FAILURE - second record\n"));
        assert_eq!(log.matches("Details:").count(), 2);
        assert!(log.find("first record").unwrap() < log.find("second record").unwrap());
    }

    #[test]
    fn test_drop_writes_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut ctx = RunContext::new("TARG", "beagle", "buildhost");
            let path = ctx.start_log(dir.path()).unwrap();
            ctx.set_id("006", "install kernel, reboot and run command");
            ctx.failure("Could not install kernel");
            path
        };
        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains("Summary:\n[TARG-006] FAILURE - Could not install kernel\n"));

        let mut json_path = path.into_os_string();
        json_path.push(".json");
        let replay: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
        assert_eq!(replay["records"][0]["kind"], "FAILURE");
        assert_eq!(replay["records"][0]["test_id"], "TARG-006");
    }
}
