//! Local schedule cache and startup schedule selection
//!
//! The last schedule that passed validation is kept on disk so the device
//! can keep tagging votes when the speakers list is later broken or
//! unreachable. The raw rows read at startup are saved too (the "page
//! cache"), purely for reference after the event.

use crate::schedule::{read_rows_csv, Schedule, ScheduleRow, SessionTiming, TalkEvent};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const SCHEDULE_CACHE_FILE: &str = "schedule_cache.json";
pub const PAGE_CACHE_FILE: &str = "schedule_rows.json";

/// Settings the cached schedule was built with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfiguration {
    pub room_id: String,
    pub session_minutes: i64,
    pub break_minutes: i64,
    pub schedule_year: i32,
}

/// On-disk form: `{ "configuration": {...}, "events": [...] }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSchedule {
    pub configuration: CacheConfiguration,
    pub events: Vec<TalkEvent>,
}

/// Schedule cache files under one directory
#[derive(Debug, Clone)]
pub struct ScheduleCache {
    dir: PathBuf,
}

impl ScheduleCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn schedule_path(&self) -> PathBuf {
        self.dir.join(SCHEDULE_CACHE_FILE)
    }

    pub fn page_path(&self) -> PathBuf {
        self.dir.join(PAGE_CACHE_FILE)
    }

    /// Replace the cached schedule (temp file + rename)
    pub fn store(&self, schedule: &Schedule, timing: &SessionTiming) -> Result<()> {
        let cached = CachedSchedule {
            configuration: CacheConfiguration {
                room_id: schedule.room().to_string(),
                session_minutes: timing.session_minutes,
                break_minutes: timing.break_minutes,
                schedule_year: timing.schedule_year,
            },
            events: schedule.events().to_vec(),
        };
        let json = serde_json::to_vec_pretty(&cached)?;
        write_atomic(&self.schedule_path(), &json)
    }

    /// Cached schedule for `room`, if present and built for that room
    pub fn load(&self, room: &str) -> Result<Option<Schedule>> {
        let path = self.schedule_path();
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read(&path)?;
        let cached: CachedSchedule = serde_json::from_slice(&content)?;

        if !cached.configuration.room_id.eq_ignore_ascii_case(room) {
            warn!(
                "Ignoring cached schedule for room '{}' (configured room is '{}')",
                cached.configuration.room_id, room
            );
            return Ok(None);
        }

        Ok(Some(Schedule::from_events(room, cached.events)))
    }

    /// Save the raw source rows for reference
    pub fn store_page(&self, rows: &[ScheduleRow]) -> Result<()> {
        let json = serde_json::to_vec_pretty(rows)?;
        write_atomic(&self.page_path(), &json)
    }
}

/// Write `bytes` to `target` so that readers see either the old file or the
/// complete new one, never a partial write.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let file_name = target
        .file_name()
        .ok_or_else(|| Error::InvalidInput(format!("not a file path: {}", target.display())))?;
    let mut temp_name = file_name.to_os_string();
    temp_name.push(".tmp");
    let temp_path = parent.join(temp_name);

    {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&temp_path, target) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Where the startup schedule came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedSchedule {
    /// Source rows validated; cache refreshed
    Fresh(Schedule),
    /// Source unusable; last known-good schedule in use
    Cached { schedule: Schedule, reason: String },
    /// Neither source nor cache usable; every vote is logged unresolved
    Unavailable { schedule: Schedule, reason: String },
}

impl LoadedSchedule {
    pub fn schedule(&self) -> &Schedule {
        match self {
            LoadedSchedule::Fresh(schedule) => schedule,
            LoadedSchedule::Cached { schedule, .. } => schedule,
            LoadedSchedule::Unavailable { schedule, .. } => schedule,
        }
    }

    pub fn into_schedule(self) -> Schedule {
        match self {
            LoadedSchedule::Fresh(schedule) => schedule,
            LoadedSchedule::Cached { schedule, .. } => schedule,
            LoadedSchedule::Unavailable { schedule, .. } => schedule,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, LoadedSchedule::Fresh(_))
    }
}

/// Build the room schedule from `rows`, falling back to the cache.
///
/// Never fails: a bad source degrades to the cached schedule, and a missing
/// cache degrades to an empty one.
pub fn select_schedule(
    rows: Result<Vec<ScheduleRow>>,
    cache: &ScheduleCache,
    room: &str,
    timing: &SessionTiming,
) -> LoadedSchedule {
    let built = rows.and_then(|rows| {
        if let Err(e) = cache.store_page(&rows) {
            warn!("Failed to save schedule page cache: {}", e);
        }
        Schedule::build(&rows, room, timing).map_err(Error::from)
    });

    let reason = match built {
        Ok(schedule) => {
            if let Err(e) = cache.store(&schedule, timing) {
                // Still usable; only the fallback copy is stale
                warn!("Failed to write schedule cache: {}", e);
            }
            info!(
                "Loaded {} talks for room '{}' from schedule source",
                schedule.len(),
                room
            );
            return LoadedSchedule::Fresh(schedule);
        }
        Err(e) => e.to_string(),
    };

    error!("Event schedule FAILED validation: {}", reason);

    match cache.load(room) {
        Ok(Some(schedule)) => {
            warn!(
                "Using cached schedule ({} talks) from {}",
                schedule.len(),
                cache.schedule_path().display()
            );
            LoadedSchedule::Cached { schedule, reason }
        }
        Ok(None) => {
            error!("No cached schedule available; votes will be logged without a talk id");
            LoadedSchedule::Unavailable {
                schedule: Schedule::empty(room),
                reason,
            }
        }
        Err(e) => {
            error!("Cached schedule unreadable ({}); votes will be logged without a talk id", e);
            LoadedSchedule::Unavailable {
                schedule: Schedule::empty(room),
                reason,
            }
        }
    }
}

/// Read the CSV schedule source and select the startup schedule
pub fn load_schedule(
    source: &Path,
    cache: &ScheduleCache,
    room: &str,
    timing: &SessionTiming,
) -> LoadedSchedule {
    info!("Reading schedule source {}", source.display());
    select_schedule(read_rows_csv(source), cache, room, timing)
}
