//! Room schedule model
//!
//! A schedule is the ordered list of talks held in one room. It is built
//! once from the exported speakers list, validated, and then only read.
//!
//! Each source row carries the date (`MM-DD`) and start time (`HH:MM`) as
//! separate strings. The year is not part of the sheet, so it comes from
//! deployment configuration. A talk's window runs from its start to
//! `start + session + break`, so a vote cast during the break after a talk
//! still counts for that talk.

use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Format the combined `"MM-DD-YYYY HH:MM"` string is parsed with
const ROW_DATETIME_FORMAT: &str = "%m-%d-%Y %H:%M";

/// Schedule build/validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Schedule for room '{room}' is empty")]
    Empty { room: String },

    #[error("Duplicate time slot {start}: talks '{first}' and '{second}'")]
    DuplicateSlot {
        start: NaiveDateTime,
        first: String,
        second: String,
    },

    #[error("Duplicate talk id '{0}'")]
    DuplicateId(String),

    #[error("Invalid schedule row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },
}

/// Session length, break length and the fixed schedule year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTiming {
    #[serde(default = "default_session_minutes")]
    pub session_minutes: i64,
    #[serde(default = "default_break_minutes")]
    pub break_minutes: i64,
    #[serde(default = "default_schedule_year")]
    pub schedule_year: i32,
}

fn default_session_minutes() -> i64 {
    90
}

fn default_break_minutes() -> i64 {
    15
}

fn default_schedule_year() -> i32 {
    Local::now().year()
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            session_minutes: default_session_minutes(),
            break_minutes: default_break_minutes(),
            schedule_year: default_schedule_year(),
        }
    }
}

impl SessionTiming {
    /// Length of one talk window (session plus following break)
    pub fn slot_length(&self) -> Duration {
        Duration::minutes(self.session_minutes + self.break_minutes)
    }
}

/// One row of the speakers list as exported from the sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRow {
    #[serde(rename = "TalkID")]
    pub talk_id: String,
    #[serde(rename = "Room")]
    pub room: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "StartTime", alias = "startTime")]
    pub start_time: String,
}

/// A scheduled talk with its vote window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalkEvent {
    pub id: String,
    pub room: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TalkEvent {
    /// Window test, inclusive at both ends
    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Ordered talks for a single room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    room: String,
    events: Vec<TalkEvent>,
}

impl Schedule {
    /// Build and validate a room schedule from raw sheet rows.
    ///
    /// Rows for other rooms are skipped. Row numbers in errors are 1-based
    /// data rows (header excluded).
    pub fn build(
        rows: &[ScheduleRow],
        room: &str,
        timing: &SessionTiming,
    ) -> Result<Self, ScheduleError> {
        let mut events = Vec::new();

        for (idx, row) in rows.iter().enumerate() {
            if !same_room(&row.room, room) {
                continue;
            }

            let talk_id = row.talk_id.trim();
            if talk_id.is_empty() {
                return Err(ScheduleError::InvalidRow {
                    row: idx + 1,
                    reason: "missing TalkID".to_string(),
                });
            }

            let start = parse_row_start(row, timing.schedule_year).map_err(|reason| {
                ScheduleError::InvalidRow {
                    row: idx + 1,
                    reason,
                }
            })?;

            let event = TalkEvent {
                id: talk_id.to_string(),
                room: row.room.trim().to_string(),
                start,
                end: start + timing.slot_length(),
            };
            debug!(
                id = %event.id,
                room = %event.room,
                start = %event.start,
                end = %event.end,
                "Adding event to schedule"
            );
            events.push(event);
        }

        let schedule = Self {
            room: room.to_string(),
            events,
        };
        schedule.validate()?;
        Ok(schedule)
    }

    /// Empty schedule, used when neither the source nor the cache is usable
    pub fn empty(room: &str) -> Self {
        Self {
            room: room.to_string(),
            events: Vec::new(),
        }
    }

    /// Wrap already-constructed events (cache load, tests). Not validated.
    pub fn from_events(room: &str, events: Vec<TalkEvent>) -> Self {
        Self {
            room: room.to_string(),
            events,
        }
    }

    /// Non-empty, and no two talks starting at the same instant
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.events.is_empty() {
            return Err(ScheduleError::Empty {
                room: self.room.clone(),
            });
        }
        debug!("Validating {} events in room's schedule", self.events.len());

        let mut by_start: HashMap<NaiveDateTime, &str> = HashMap::new();
        let mut ids: BTreeSet<&str> = BTreeSet::new();
        for event in &self.events {
            if let Some(first) = by_start.insert(event.start, event.id.as_str()) {
                return Err(ScheduleError::DuplicateSlot {
                    start: event.start,
                    first: first.to_string(),
                    second: event.id.clone(),
                });
            }
            if !ids.insert(event.id.as_str()) {
                return Err(ScheduleError::DuplicateId(event.id.clone()));
            }
        }

        info!(
            "Validated {} events for room '{}'",
            self.events.len(),
            self.room
        );
        Ok(())
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn events(&self) -> &[TalkEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn talk_ids(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|e| e.id.as_str())
    }

    /// Calendar days touched by any talk window
    pub fn days(&self) -> BTreeSet<NaiveDate> {
        self.events
            .iter()
            .flat_map(|e| [e.start.date(), e.end.date()])
            .collect()
    }
}

fn same_room(row_room: &str, room: &str) -> bool {
    row_room.trim().eq_ignore_ascii_case(room.trim())
}

fn parse_row_start(row: &ScheduleRow, year: i32) -> Result<NaiveDateTime, String> {
    let combined = format!("{}-{} {}", row.date.trim(), year, row.start_time.trim());
    NaiveDateTime::parse_from_str(&combined, ROW_DATETIME_FORMAT)
        .map_err(|e| format!("cannot parse date/time '{}': {}", combined, e))
}

/// Read schedule rows from a CSV export of the speakers list.
///
/// Extra columns (speaker, title, vote counts) are ignored.
pub fn read_rows_csv(path: &Path) -> crate::Result<Vec<ScheduleRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, room: &str, date: &str, time: &str) -> ScheduleRow {
        ScheduleRow {
            talk_id: id.to_string(),
            room: room.to_string(),
            date: date.to_string(),
            start_time: time.to_string(),
        }
    }

    fn timing() -> SessionTiming {
        SessionTiming {
            session_minutes: 90,
            break_minutes: 15,
            schedule_year: 2018,
        }
    }

    fn at(month: u32, day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, month, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_build_computes_window_from_timing() {
        let rows = vec![row("T1", "A", "05-20", "09:00")];
        let schedule = Schedule::build(&rows, "A", &timing()).unwrap();

        assert_eq!(schedule.len(), 1);
        let event = &schedule.events()[0];
        assert_eq!(event.id, "T1");
        assert_eq!(event.start, at(5, 20, 9, 0));
        assert_eq!(event.end, at(5, 20, 10, 45));
    }

    #[test]
    fn test_build_filters_other_rooms() {
        let rows = vec![
            row("T1", "A", "05-20", "09:00"),
            row("T2", "B", "05-20", "09:00"),
            row("T3", " a ", "05-20", "11:00"),
        ];
        let schedule = Schedule::build(&rows, "A", &timing()).unwrap();

        let ids: Vec<&str> = schedule.talk_ids().collect();
        assert_eq!(ids, vec!["T1", "T3"]);
    }

    #[test]
    fn test_build_keeps_source_order() {
        let rows = vec![
            row("T2", "A", "05-20", "11:00"),
            row("T1", "A", "05-20", "09:00"),
        ];
        let schedule = Schedule::build(&rows, "A", &timing()).unwrap();
        let ids: Vec<&str> = schedule.talk_ids().collect();
        assert_eq!(ids, vec!["T2", "T1"]);
    }

    #[test]
    fn test_validate_rejects_duplicate_start() {
        let rows = vec![
            row("T1", "A", "05-20", "09:00"),
            row("T2", "A", "05-20", "09:00"),
        ];
        let err = Schedule::build(&rows, "A", &timing()).unwrap_err();
        assert_eq!(
            err,
            ScheduleError::DuplicateSlot {
                start: at(5, 20, 9, 0),
                first: "T1".to_string(),
                second: "T2".to_string(),
            }
        );
    }

    #[test]
    fn test_same_time_on_different_days_is_not_duplicate() {
        let rows = vec![
            row("T1", "A", "05-20", "09:00"),
            row("T2", "A", "05-21", "09:00"),
        ];
        assert!(Schedule::build(&rows, "A", &timing()).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty() {
        let err = Schedule::build(&[], "A", &timing()).unwrap_err();
        assert_eq!(err, ScheduleError::Empty { room: "A".to_string() });

        // Rows exist, but none for this room
        let rows = vec![row("T1", "B", "05-20", "09:00")];
        let err = Schedule::build(&rows, "A", &timing()).unwrap_err();
        assert!(matches!(err, ScheduleError::Empty { .. }));
    }

    #[test]
    fn test_validate_rejects_duplicate_id() {
        let rows = vec![
            row("T1", "A", "05-20", "09:00"),
            row("T1", "A", "05-20", "11:00"),
        ];
        let err = Schedule::build(&rows, "A", &timing()).unwrap_err();
        assert_eq!(err, ScheduleError::DuplicateId("T1".to_string()));
    }

    #[test]
    fn test_build_reports_unparseable_row() {
        let rows = vec![
            row("T1", "A", "05-20", "09:00"),
            row("T2", "A", "20-05", "9am"),
        ];
        let err = Schedule::build(&rows, "A", &timing()).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidRow { row: 2, .. }));
    }

    #[test]
    fn test_build_rejects_missing_talk_id() {
        let rows = vec![row("  ", "A", "05-20", "09:00")];
        let err = Schedule::build(&rows, "A", &timing()).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidRow { row: 1, .. }));
    }

    #[test]
    fn test_days_covers_windows_crossing_midnight() {
        let rows = vec![
            row("T1", "A", "05-20", "09:00"),
            row("T2", "A", "05-20", "23:30"),
        ];
        let schedule = Schedule::build(&rows, "A", &timing()).unwrap();
        let days: Vec<NaiveDate> = schedule.days().into_iter().collect();
        assert_eq!(
            days,
            vec![
                NaiveDate::from_ymd_opt(2018, 5, 20).unwrap(),
                NaiveDate::from_ymd_opt(2018, 5, 21).unwrap(),
            ]
        );
    }

    #[test]
    fn test_read_rows_csv_accepts_original_header_and_extra_columns() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("speakers.csv");
        std::fs::write(
            &path,
            "TalkID,Room,Date,startTime,Speaker\nT1,A,05-20,09:00,Ada\nT2, A ,05-20,11:00,Grace\n",
        )
        .unwrap();

        let rows = read_rows_csv(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], row("T2", "A", "05-20", "11:00"));
    }
}
