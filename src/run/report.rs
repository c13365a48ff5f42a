//! Result summary rendering

use std::io::{self, Write};

use colored::Colorize;

use super::context::{ResultKind, ResultRecord};

/// One line per record, in the order they were recorded
pub fn summarize(records: &[ResultRecord]) -> Vec<String> {
    records
        .iter()
        .map(|r| format!("[{}] {} - {}", r.test_id, r.kind, r.message))
        .collect()
}

/// Write the summary lines to `out`
pub fn write_summary(out: &mut impl Write, records: &[ResultRecord]) -> io::Result<()> {
    for line in summarize(records) {
        writeln!(out, "{line}")?;
    }
    Ok(())
}

/// Count of (successes, failures)
pub fn tally(records: &[ResultRecord]) -> (usize, usize) {
    records.iter().fold((0, 0), |(ok, bad), r| match r.kind {
        ResultKind::Success => (ok + 1, bad),
        ResultKind::Failure => (ok, bad + 1),
        ResultKind::Result => (ok, bad),
    })
}

/// Print the end-of-run summary to the terminal
pub fn print_summary(records: &[ResultRecord]) {
    println!("\n###########################################");
    println!("Results summary:");
    for (record, line) in records.iter().zip(summarize(records)) {
        match record.kind {
            ResultKind::Failure => println!("{}", line.red()),
            ResultKind::Success => println!("{}", line.green()),
            ResultKind::Result => println!("{line}"),
        }
    }

    let (passed, failed) = tally(records);
    let tally_line = format!("{passed} succeeded, {failed} failed");
    if failed == 0 {
        println!("\n{}", tally_line.green().bold());
    } else {
        println!("\n{}", tally_line.red().bold());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, kind: ResultKind, message: &str) -> ResultRecord {
        ResultRecord {
            test_id: id.to_string(),
            kind,
            message: message.to_string(),
            extra: None,
            timestamp: String::new(),
        }
    }

    #[test]
    fn test_summary_keeps_append_order() {
        let records = vec![
            record("TARG-006", ResultKind::Failure, "Could not install kernel"),
            record("TARG-001", ResultKind::Success, "target 'beagle' is in 'ttc list'"),
            record("TARG-006", ResultKind::Failure, "Could not install kernel"),
            record("TARG-003", ResultKind::Result, "Kernel version is 2.6.30"),
        ];
        assert_eq!(
            summarize(&records),
            vec![
                "[TARG-006] FAILURE - Could not install kernel",
                "[TARG-001] SUCCESS - target 'beagle' is in 'ttc list'",
                "[TARG-006] FAILURE - Could not install kernel",
                "[TARG-003] RESULT - Kernel version is 2.6.30",
            ]
        );
        assert_eq!(tally(&records), (1, 2));
    }

    #[test]
    fn test_write_summary() {
        let records = vec![record("Size-test-baseline", ResultKind::Result, "kernel text size: 1956281")];
        let mut out = Vec::new();
        write_summary(&mut out, &records).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[Size-test-baseline] RESULT - kernel text size: 1956281\n"
        );
    }
}
