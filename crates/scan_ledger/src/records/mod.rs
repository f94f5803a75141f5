//! Run-log backed record index.
//!
//! Every scan run writes one log file to
//! `<data_dir>/scan-result/<target name>/<run id>`, where the run id is the
//! start time rendered as `YYYYMMDDHHMMSS` in the configured zone. The ids are
//! fixed width, so string order is chronological order.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use walkdir::WalkDir;

use crate::config::ScanZone;

mod parser;
pub use parser::{
    ParsedScanRecord, SUMMARY_MARKER, ScanStatus, load_result_from_log, parse_log,
};

pub const SCAN_RESULT_DIR: &str = "scan-result";
pub const RUN_ID_FORMAT: &str = "%Y%m%d%H%M%S";
const RUN_ID_LEN: usize = 14;
const RUN_DATE_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn ensure_data_layout(data_dir: &Path) -> anyhow::Result<()> {
    let path = data_dir.join(SCAN_RESULT_DIR);
    fs::create_dir_all(&path).with_context(|| format!("creating dir {:?}", path))?;
    Ok(())
}

pub fn target_dir(data_dir: &Path, target_name: &str) -> PathBuf {
    data_dir.join(SCAN_RESULT_DIR).join(target_name)
}

pub fn run_log_path(data_dir: &Path, target_name: &str, run_id: &str) -> PathBuf {
    target_dir(data_dir, target_name).join(run_id)
}

/// Render `now` as a run id in the configured zone.
///
/// Resolution is one second: two runs of the same target started within the
/// same second share an id and the later log replaces the earlier one.
pub fn new_run_id(now: DateTime<Utc>, time_zone: ScanZone) -> String {
    time_zone.local(now).format(RUN_ID_FORMAT).to_string()
}

fn parse_run_wall_clock(run_id: &str) -> Option<NaiveDateTime> {
    if run_id.len() != RUN_ID_LEN || !run_id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(run_id, RUN_ID_FORMAT).ok()
}

/// Instant a run started, reading its id as wall-clock time in `time_zone`.
pub fn parse_run_id(run_id: &str, time_zone: ScanZone) -> Option<DateTime<Utc>> {
    time_zone.to_utc(&parse_run_wall_clock(run_id)?)
}

/// Human readable start time of a run, e.g. `2024-01-03 12:00:00`.
pub fn display_run_date(run_id: &str, time_zone: ScanZone) -> Option<String> {
    parse_run_id(run_id, time_zone)?;
    parse_run_wall_clock(run_id).map(|local| local.format(RUN_DATE_DISPLAY_FORMAT).to_string())
}

/// Open time interval; a missing bound is unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Both bounds are exclusive.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| ts > start) && self.end.is_none_or(|end| ts < end)
    }
}

/// List the run ids stored for a target.
///
/// A missing or unreadable directory is a target without runs, not an error.
pub fn list_run_ids(data_dir: &Path, target_name: &str) -> Vec<String> {
    WalkDir::new(target_dir(data_dir, target_name))
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| !entry.file_type().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| name != target_name)
        .collect()
}

/// Keep the ids whose timestamp lies strictly inside `range`. Names that do
/// not parse as run ids are dropped.
pub fn filter_run_ids(
    run_ids: Vec<String>,
    range: &TimeRange,
    time_zone: ScanZone,
) -> Vec<String> {
    run_ids
        .into_iter()
        .filter(|run_id| parse_run_id(run_id, time_zone).is_some_and(|ts| range.contains(ts)))
        .collect()
}

/// Slice out 1-indexed page `page`. Past-the-end pages are empty.
pub fn page_window<T>(items: &[T], page: usize, page_size: usize) -> &[T] {
    let total = items.len();
    let Some(start) = page
        .checked_sub(1)
        .map(|previous| previous.saturating_mul(page_size))
    else {
        return &[];
    };
    if start > total {
        return &[];
    }
    let end = page.saturating_mul(page_size).min(total);
    &items[start..end]
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordPage {
    /// Size of the filtered set, independent of the page window.
    pub total: usize,
    pub items: Vec<ParsedScanRecord>,
}

/// Newest-first page of parsed records for a target.
///
/// Only the logs inside the requested window are read.
pub fn query_records(
    data_dir: &Path,
    target_name: &str,
    time_zone: ScanZone,
    range: &TimeRange,
    page: usize,
    page_size: usize,
) -> RecordPage {
    let run_ids = list_run_ids(data_dir, target_name);
    if run_ids.is_empty() {
        return RecordPage::default();
    }

    let mut filtered = filter_run_ids(run_ids, range, time_zone);
    if filtered.is_empty() {
        return RecordPage::default();
    }
    filtered.sort_by(|a, b| b.cmp(a));

    let items = page_window(&filtered, page, page_size)
        .iter()
        .map(|run_id| load_result_from_log(&run_log_path(data_dir, target_name, run_id)))
        .collect();

    RecordPage {
        total: filtered.len(),
        items,
    }
}

/// Most recent run id of a target, by name order.
pub fn latest_run_id(data_dir: &Path, target_name: &str) -> Option<String> {
    list_run_ids(data_dir, target_name).into_iter().max()
}

/// Create the target's result directory ahead of a new run.
pub fn ensure_target_dir(data_dir: &Path, target_name: &str) -> anyhow::Result<PathBuf> {
    let dir = target_dir(data_dir, target_name);
    fs::create_dir_all(&dir).with_context(|| format!("creating scan result dir {:?}", dir))?;
    Ok(dir)
}

/// Remove every run log of a target. Clearing a target without history is a
/// no-op.
pub fn clear_records(data_dir: &Path, target_name: &str) -> anyhow::Result<()> {
    let dir = target_dir(data_dir, target_name);
    match fs::remove_dir_all(&dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("removing scan result dir {:?}", dir)),
    }
}
