use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Line the scanner emits once the run has finished and the summary follows.
pub const SUMMARY_MARKER: &str = "- SCAN SUMMARY -";

const INFECTED_FILES_PREFIX: &str = "Infected files:";
const SCAN_TIME_PREFIX: &str = "Time:";
const START_DATE_PREFIX: &str = "Start Date:";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStatus {
    #[default]
    Waiting,
    Done,
}

/// Status record derived from one run log. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedScanRecord {
    /// Run identifier, i.e. the log file name.
    pub name: String,
    pub status: ScanStatus,
    pub log: String,
    pub infected_files: String,
    pub scan_time: String,
    pub scan_date: String,
}

/// Derive a record from raw scanner output.
///
/// Summary fields are only taken from lines after the summary marker; the
/// scanner may print lines with the same prefixes earlier in the run.
pub fn parse_log(name: &str, raw: &str) -> ParsedScanRecord {
    let mut record = ParsedScanRecord {
        name: name.to_string(),
        log: raw.to_string(),
        ..Default::default()
    };

    for line in raw.split('\n') {
        if line.contains(SUMMARY_MARKER) {
            record.status = ScanStatus::Done;
        }
        if record.status != ScanStatus::Done {
            continue;
        }

        if let Some(rest) = line.strip_prefix(INFECTED_FILES_PREFIX) {
            record.infected_files = rest.to_string();
        } else if let Some(rest) = line.strip_prefix(SCAN_TIME_PREFIX) {
            record.scan_time = if line.contains('(') {
                // "Time: 12.345 sec (0 m 12 s)" keeps only "0 m 12 s"
                line.split('(').nth(1).unwrap_or_default().replace(')', "")
            } else {
                rest.to_string()
            };
        } else if let Some(rest) = line.strip_prefix(START_DATE_PREFIX) {
            record.scan_date = rest.to_string();
        }
    }

    record
}

/// Read and parse the run log at `path`.
///
/// An unreadable file yields a `Waiting` record with empty log text; the
/// caller never sees the read error.
pub fn load_result_from_log(path: &Path) -> ParsedScanRecord {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    match fs::read(path) {
        Ok(bytes) => parse_log(&name, &String::from_utf8_lossy(&bytes)),
        Err(err) => {
            debug!(error = ?err, path = %path.display(), "run log unreadable, reporting as waiting");
            ParsedScanRecord {
                name,
                ..Default::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const COMPLETED_LOG: &str = "\
/srv/www/index.php: OK
/srv/www/upload/shell.php: Php.Webshell-1 FOUND

----------- SCAN SUMMARY -----------
Infected files: 1
Total errors: 0
Time: 12.345 sec (0 m 12 s)
Start Date: 2024:01:03 12:00:00
End Date:   2024:01:03 12:00:12
";

    #[test]
    fn completed_log_populates_summary_fields() {
        let record = parse_log("20240103120000", COMPLETED_LOG);

        assert_eq!(record.name, "20240103120000");
        assert_eq!(record.status, ScanStatus::Done);
        assert_eq!(record.infected_files, " 1");
        assert_eq!(record.scan_time, "0 m 12 s");
        assert_eq!(record.scan_date, " 2024:01:03 12:00:00");
        assert_eq!(record.log, COMPLETED_LOG);
    }

    #[test]
    fn log_without_marker_stays_waiting() {
        let raw = "/srv/www/index.php: OK\nInfected files: 4\nTime: 1.0 sec\n";
        let record = parse_log("20240103120000", raw);

        assert_eq!(record.status, ScanStatus::Waiting);
        assert!(record.infected_files.is_empty());
        assert!(record.scan_time.is_empty());
        assert!(record.scan_date.is_empty());
        assert_eq!(record.log, raw);
    }

    #[test]
    fn prefixes_before_marker_are_ignored() {
        let raw = "Infected files: 3\nStart Date: early\n- SCAN SUMMARY -\nInfected files: 0\n";
        let record = parse_log("20240103120000", raw);

        assert_eq!(record.status, ScanStatus::Done);
        assert_eq!(record.infected_files, " 0");
        assert!(record.scan_date.is_empty());
    }

    #[test]
    fn time_without_parenthetical_keeps_raw_suffix() {
        let raw = "- SCAN SUMMARY -\nTime: 0.005 sec\n";
        let record = parse_log("20240103120000", raw);

        assert_eq!(record.scan_time, " 0.005 sec");
    }

    #[test]
    fn prefixes_are_case_sensitive_and_anchored() {
        let raw = "- SCAN SUMMARY -\ninfected files: 9\n  Infected files: 8\n";
        let record = parse_log("20240103120000", raw);

        assert_eq!(record.status, ScanStatus::Done);
        assert!(record.infected_files.is_empty());
    }

    #[test]
    fn parsing_is_idempotent() {
        assert_eq!(
            parse_log("20240103120000", COMPLETED_LOG),
            parse_log("20240103120000", COMPLETED_LOG)
        );
    }

    #[test]
    fn loads_record_from_file() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("20240103120000");
        std::fs::write(&path, COMPLETED_LOG).unwrap();

        let record = load_result_from_log(&path);
        assert_eq!(record.name, "20240103120000");
        assert_eq!(record.status, ScanStatus::Done);
    }

    #[test]
    fn unreadable_file_degrades_to_waiting() {
        let tmp = TempDir::new().expect("tempdir");
        let record = load_result_from_log(&tmp.path().join("20240103120000"));

        assert_eq!(record.name, "20240103120000");
        assert_eq!(record.status, ScanStatus::Waiting);
        assert!(record.log.is_empty());
    }
}
