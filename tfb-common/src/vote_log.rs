//! Durable per-day vote log
//!
//! Every vote is appended to `<dir>/<MM>_<DD>_feedback.csv` for the day it
//! was cast, whether or not it matched a talk. The log is the source of
//! truth for tallies: a publish cycle recomputes counts from it.
//!
//! Format: header `Timestamp,EventID,Feedback`; unmatched votes carry the
//! literal `None` as event id.

use crate::time::{format_log_timestamp, parse_log_timestamp};
use crate::vote::{VoteCategory, VoteRecord};
use crate::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Header row written when a day's file is created
pub const LOG_HEADER: [&str; 3] = ["Timestamp", "EventID", "Feedback"];

/// Event id written for votes outside every talk window
pub const UNRESOLVED_EVENT_ID: &str = "None";

/// One line of the vote log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub timestamp: NaiveDateTime,
    pub event_id: Option<String>,
    pub category: VoteCategory,
}

impl LogRow {
    pub fn new(timestamp: NaiveDateTime, event_id: Option<String>, category: VoteCategory) -> Self {
        Self {
            timestamp,
            event_id,
            category,
        }
    }

    /// Row for a captured vote and its resolved talk
    pub fn from_vote(vote: &VoteRecord, event_id: Option<&str>) -> Self {
        Self::new(vote.timestamp, event_id.map(str::to_string), vote.category)
    }

    fn to_record(&self) -> [String; 3] {
        [
            format_log_timestamp(&self.timestamp),
            self.event_id
                .clone()
                .unwrap_or_else(|| UNRESOLVED_EVENT_ID.to_string()),
            self.category.as_str().to_string(),
        ]
    }

    fn from_record(record: &csv::StringRecord) -> Result<Self> {
        if record.len() < 3 {
            return Err(Error::InvalidInput(format!(
                "expected 3 fields, found {}",
                record.len()
            )));
        }
        let timestamp = parse_log_timestamp(&record[0])
            .ok_or_else(|| Error::InvalidInput(format!("bad timestamp '{}'", &record[0])))?;
        let event_id = match record[1].trim() {
            "" | UNRESOLVED_EVENT_ID => None,
            id => Some(id.to_string()),
        };
        let category = record[2].parse()?;
        Ok(Self::new(timestamp, event_id, category))
    }
}

/// Directory of per-day vote log files
#[derive(Debug, Clone)]
pub struct VoteLog {
    dir: PathBuf,
}

impl VoteLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for one calendar day, e.g. `05_20_feedback.csv`
    pub fn file_name(date: NaiveDate) -> String {
        format!("{}_feedback.csv", date.format("%m_%d"))
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(Self::file_name(date))
    }

    /// Append rows, each to the file for its own day. Files are created with
    /// a header on first write. Data is synced before returning.
    pub fn append(&self, rows: &[LogRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        fs::create_dir_all(&self.dir)?;

        let mut by_day: BTreeMap<NaiveDate, Vec<&LogRow>> = BTreeMap::new();
        for row in rows {
            by_day.entry(row.timestamp.date()).or_default().push(row);
        }

        // On failure every touched file is cut back to its old length, so a
        // retry of the same batch never duplicates rows.
        let mut written: Vec<(PathBuf, u64)> = Vec::new();
        for (date, day_rows) in by_day {
            let path = self.path_for(date);
            let result = Self::current_len(&path).and_then(|start| {
                Self::append_day(&path, start == 0, &day_rows)
                    .map_err(|e| {
                        Self::truncate_to(&path, start);
                        e
                    })
                    .map(|()| start)
            });

            match result {
                Ok(start) => written.push((path, start)),
                Err(e) => {
                    for (done, len) in &written {
                        Self::truncate_to(done, *len);
                    }
                    return Err(e);
                }
            }
        }

        Ok(rows.len())
    }

    /// Size of a day file; zero when it does not exist yet
    fn current_len(path: &Path) -> Result<u64> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn append_day(path: &Path, needs_header: bool, rows: &[&LogRow]) -> Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if needs_header {
            debug!("Creating vote log {}", path.display());
            writer.write_record(LOG_HEADER)?;
        }
        for row in rows {
            writer.write_record(row.to_record())?;
        }

        let file = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        file.sync_data()?;
        Ok(())
    }

    /// Undo a partial append
    fn truncate_to(path: &Path, len: u64) {
        let result = OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|file| {
                file.set_len(len)?;
                file.sync_data()
            });
        match result {
            Ok(()) => debug!("Rolled back {} to {} bytes", path.display(), len),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not roll back {}: {}", path.display(), e),
        }
    }

    /// All rows for one day; a day with no file has no rows. Malformed lines
    /// are skipped with a warning so one bad line cannot block publishing.
    pub fn read_day(&self, date: NaiveDate) -> Result<Vec<LogRow>> {
        let path = self.path_for(date);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&path)?;

        let mut rows = Vec::new();
        for (idx, record) in reader.byte_records().enumerate() {
            let parsed = csv::StringRecord::from_byte_record(record?)
                .map_err(|e| Error::InvalidInput(e.to_string()))
                .and_then(|record| LogRow::from_record(&record));
            match parsed {
                Ok(row) => rows.push(row),
                Err(e) => warn!(
                    "Skipping malformed line {} in {}: {}",
                    idx + 2,
                    path.display(),
                    e
                ),
            }
        }
        Ok(rows)
    }

    /// Rows for several days, in day order
    pub fn read_days(&self, dates: impl IntoIterator<Item = NaiveDate>) -> Result<Vec<LogRow>> {
        let mut rows = Vec::new();
        for date in dates {
            rows.extend(self.read_day(date)?);
        }
        Ok(rows)
    }
}
