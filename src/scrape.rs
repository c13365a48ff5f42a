//! Named parsers for text scraped from the board and host tools
//!
//! Remote console output is heterogeneous and sometimes truncated by a
//! dropped telnet session. Every parser here returns [`Scrape<T>`]: either
//! the value or a [`ParseFailure`] carrying the raw text, so a missing
//! pattern becomes a recorded test failure instead of a crash.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Expected pattern not present in scraped text
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Could not find {what} in output")]
pub struct ParseFailure {
    /// What the parser was looking for
    pub what: &'static str,
    /// The text that was searched
    pub raw: String,
}

impl ParseFailure {
    pub fn new(what: &'static str, raw: impl Into<String>) -> Self {
        Self {
            what,
            raw: raw.into(),
        }
    }
}

pub type Scrape<T> = std::result::Result<T, ParseFailure>;

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern"))
}

/// First meaningful line of remote command output
///
/// Some transports echo the command back as a `cmd=...` line ahead of the
/// real output; that line is skipped.
pub fn reported_line(output: &str) -> &str {
    let mut lines = output.lines();
    let line = match lines.next() {
        Some(first) if first.trim_start().starts_with("cmd=") => lines.next().unwrap_or(""),
        Some(first) => first,
        None => "",
    };
    line.trim()
}

/// Values from the kernel's "Calibrating delay loop" line
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    /// BogoMIPS exactly as printed
    pub bogomips: String,
    /// Loops-per-jiffy, when printed
    pub lpj: Option<u64>,
    /// Whether calibration was skipped in favour of a preset value
    pub preset: bool,
}

/// Parse a calibration line such as
/// `[    0.000000] Calibrating delay loop... 1993.93 BogoMIPS (lpj=9969664)`
pub fn calibration(line: &str) -> Scrape<Calibration> {
    static BOGOMIPS: OnceLock<Regex> = OnceLock::new();
    static LPJ: OnceLock<Regex> = OnceLock::new();
    static PRESET: OnceLock<Regex> = OnceLock::new();

    let bogomips = regex(&BOGOMIPS, r"([0-9][.0-9]*) BogoMIPS")
        .captures(line)
        .map(|c| c[1].to_string())
        .ok_or_else(|| ParseFailure::new("BogoMIPS value", line))?;

    let lpj = regex(&LPJ, r"lpj=([0-9]+)\)")
        .captures(line)
        .and_then(|c| c[1].parse().ok());

    let preset = regex(&PRESET, r"skipped.*preset").is_match(line);

    Ok(Calibration {
        bogomips,
        lpj,
        preset,
    })
}

/// Seconds since boot from a printk-timestamped log line (`[   12.345678] ...`)
///
/// A leading `<N>` log-level tag, left behind by some busybox dmesg
/// builds, is ignored.
pub fn printk_time(line: &str) -> Scrape<f64> {
    static LEVEL: OnceLock<Regex> = OnceLock::new();
    static STAMP: OnceLock<Regex> = OnceLock::new();

    let line = regex(&LEVEL, r"^<[0-9]>").replace(line, "");
    regex(&STAMP, r"^\[\s*([0-9]+\.[0-9]+)\]")
        .captures(&line)
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| ParseFailure::new("printk timestamp", line.to_string()))
}

/// Value of one option in a `.config` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    /// `CONFIG_X=value`, value kept literally (quotes included)
    Set(String),
    /// `# CONFIG_X is not set`
    NotSet,
}

/// Option name and value from one `.config` line; other lines yield `None`
pub fn config_assignment(line: &str) -> Option<(String, ConfigValue)> {
    static SET: OnceLock<Regex> = OnceLock::new();
    static UNSET: OnceLock<Regex> = OnceLock::new();

    let line = line.trim_end();
    if let Some(c) = regex(&UNSET, r"^# (CONFIG_[A-Za-z0-9_]+) is not set$").captures(line) {
        return Some((c[1].to_string(), ConfigValue::NotSet));
    }
    regex(&SET, r"^(CONFIG_[A-Za-z0-9_]+)=(.*)$")
        .captures(line)
        .map(|c| (c[1].to_string(), ConfigValue::Set(c[2].to_string())))
}

/// Seconds of uptime from `cat /proc/uptime`
pub fn uptime(output: &str) -> Scrape<f64> {
    reported_line(output)
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ParseFailure::new("uptime value", output))
}

/// Free bytes from the `Total:` line of `free -tb`
pub fn free_total(output: &str) -> Scrape<u64> {
    output
        .lines()
        .find(|l| l.trim_start().starts_with("Total:"))
        .and_then(|l| l.split_whitespace().nth(3))
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ParseFailure::new("free memory total", output))
}

/// Section sizes reported by `size vmlinux`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeReport {
    pub text: u64,
    pub data: u64,
    pub bss: u64,
    pub total: u64,
}

pub fn size_report(output: &str) -> Scrape<SizeReport> {
    let fields: Option<Vec<u64>> = output.lines().nth(1).and_then(|line| {
        line.split_whitespace()
            .take(4)
            .map(|v| v.parse().ok())
            .collect()
    });
    match fields.as_deref() {
        Some(&[text, data, bss, total]) => Ok(SizeReport {
            text,
            data,
            bss,
            total,
        }),
        _ => Err(ParseFailure::new("size columns", output)),
    }
}

/// Kernel version (`2.6.30-rc1`) from the top-level Makefile
pub fn makefile_version(makefile: &str) -> Scrape<String> {
    let field = |name: &str| {
        makefile.lines().find_map(|line| {
            let (key, value) = line.split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
    };

    match (field("VERSION"), field("PATCHLEVEL"), field("SUBLEVEL")) {
        (Some(version), Some(patchlevel), Some(sublevel)) => Ok(format!(
            "{version}.{patchlevel}.{sublevel}{}",
            field("EXTRAVERSION").unwrap_or_default()
        )),
        _ => Err(ParseFailure::new(
            "VERSION/PATCHLEVEL/SUBLEVEL",
            makefile.lines().take(10).collect::<Vec<_>>().join("\n"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reported_line_skips_echo() {
        assert_eq!(reported_line("cmd=uname -r\n2.6.30-rc1-ID4821\n"), "2.6.30-rc1-ID4821");
        assert_eq!(reported_line("2.6.30-rc1-ID4821"), "2.6.30-rc1-ID4821");
        assert_eq!(reported_line("cmd=uname -r"), "");
        assert_eq!(reported_line(""), "");
    }

    #[test]
    fn test_calibration_measured() {
        let cal = calibration(
            "[    0.000000] Calibrating delay loop... 1993.93 BogoMIPS (lpj=9969664)",
        )
        .unwrap();
        assert_eq!(cal.bogomips, "1993.93");
        assert_eq!(cal.lpj, Some(9969664));
        assert!(!cal.preset);
    }

    #[test]
    fn test_calibration_preset() {
        let cal = calibration(
            "[    0.000012] Calibrating delay loop (skipped) preset value.. 1993.93 BogoMIPS (lpj=9969664)",
        )
        .unwrap();
        assert!(cal.preset);
        assert_eq!(cal.bogomips, "1993.93");
    }

    #[test]
    fn test_calibration_missing_bogomips() {
        let err = calibration("EOFError: telnet connection closed").unwrap_err();
        assert_eq!(err.what, "BogoMIPS value");
        assert_eq!(err.raw, "EOFError: telnet connection closed");
    }

    #[test]
    fn test_printk_time() {
        assert_eq!(printk_time("[    0.004000] Mount-cache hash table entries: 512"), Ok(0.004));
        assert_eq!(printk_time("<6>[   12.5] eth0: link up"), Ok(12.5));
        assert!(printk_time("Linux version 2.6.30").is_err());
        assert!(printk_time("").is_err());
    }

    #[test]
    fn test_config_assignment() {
        assert_eq!(
            config_assignment("CONFIG_PRINTK_TIME=y"),
            Some(("CONFIG_PRINTK_TIME".into(), ConfigValue::Set("y".into())))
        );
        assert_eq!(
            config_assignment("CONFIG_CMDLINE=\"console=ttyS0 quiet\""),
            Some((
                "CONFIG_CMDLINE".into(),
                ConfigValue::Set("\"console=ttyS0 quiet\"".into())
            ))
        );
        assert_eq!(
            config_assignment("# CONFIG_SWAP is not set"),
            Some(("CONFIG_SWAP".into(), ConfigValue::NotSet))
        );
        assert_eq!(config_assignment("# Automatically generated make config"), None);
        assert_eq!(config_assignment(""), None);
    }

    #[test]
    fn test_uptime() {
        assert_eq!(uptime("350.27 331.90"), Ok(350.27));
        assert_eq!(uptime("cmd=cat /proc/uptime\n12.01 10.00"), Ok(12.01));
        assert!(uptime("cat: can't open '/proc/uptime'").is_err());
    }

    #[test]
    fn test_free_total() {
        let out = "             total         used         free\n\
                   Mem:       30121984     12107776     18014208\n\
                   Swap:             0            0            0\n\
                   Total:     30121984     12107776     18014208";
        assert_eq!(free_total(out), Ok(18014208));
        assert!(free_total("free: not found").is_err());
    }

    #[test]
    fn test_size_report() {
        let out = "   text\t   data\t    bss\t    dec\t    hex\tfilename\n\
                   1956281\t 122548\t  95632\t2174461\t 212dfd\tvmlinux";
        assert_eq!(
            size_report(out),
            Ok(SizeReport {
                text: 1956281,
                data: 122548,
                bss: 95632,
                total: 2174461
            })
        );
        assert!(size_report("size: 'vmlinux': No such file").is_err());
    }

    #[test]
    fn test_makefile_version() {
        let makefile = "VERSION = 2\nPATCHLEVEL = 6\nSUBLEVEL = 30\nEXTRAVERSION = -rc1\nNAME = Man-Eating Seals\n";
        assert_eq!(makefile_version(makefile), Ok("2.6.30-rc1".to_string()));
        assert_eq!(
            makefile_version("VERSION = 3\nPATCHLEVEL = 0\nSUBLEVEL = 1\nEXTRAVERSION =\n"),
            Ok("3.0.1".to_string())
        );
        assert!(makefile_version("all:\n\techo hi\n").is_err());
    }
}
