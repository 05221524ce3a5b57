//! Tally sink abstraction
//!
//! Tallies end up in the event spreadsheet: one row per talk, one column per
//! vote category. The aggregator only knows the `TallySink` trait; the HTTP
//! gateway lives in `sheet_client`, and `MemorySheet` stands in when no
//! gateway is configured.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tfb_common::{TallyEntry, VoteCategory};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Tally sink errors
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// 1-based spreadsheet row holding one talk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowHandle(pub u32);

impl fmt::Display for RowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tally column for one vote category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TallyColumn {
    Positive,
    Negative,
    Neutral,
}

impl TallyColumn {
    pub const ALL: [TallyColumn; 3] = [
        TallyColumn::Positive,
        TallyColumn::Negative,
        TallyColumn::Neutral,
    ];

    /// This column's counter in a tally
    pub fn value(&self, entry: &TallyEntry) -> u64 {
        entry.count(VoteCategory::from(*self))
    }
}

impl From<TallyColumn> for VoteCategory {
    fn from(column: TallyColumn) -> Self {
        match column {
            TallyColumn::Positive => VoteCategory::Positive,
            TallyColumn::Negative => VoteCategory::Negative,
            TallyColumn::Neutral => VoteCategory::Neutral,
        }
    }
}

/// Column letters used by the spreadsheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetColumns {
    pub positive: String,
    pub negative: String,
    pub neutral: String,
}

impl SheetColumns {
    pub fn letter(&self, column: TallyColumn) -> &str {
        match column {
            TallyColumn::Positive => &self.positive,
            TallyColumn::Negative => &self.negative,
            TallyColumn::Neutral => &self.neutral,
        }
    }

    /// A1 reference, e.g. `H12`
    pub fn cell(&self, row: RowHandle, column: TallyColumn) -> String {
        format!("{}{}", self.letter(column), row.0)
    }
}

impl Default for SheetColumns {
    fn default() -> Self {
        Self {
            positive: "H".to_string(),
            negative: "I".to_string(),
            neutral: "J".to_string(),
        }
    }
}

/// Destination for published tallies
#[async_trait]
pub trait TallySink: Send + Sync {
    /// Row holding `talk_id`, or `None` if the sheet has no such talk
    async fn find_row(&self, talk_id: &str) -> Result<Option<RowHandle>, SinkError>;

    /// Overwrite one tally cell
    async fn update_cell(
        &self,
        row: RowHandle,
        column: TallyColumn,
        value: u64,
    ) -> Result<(), SinkError>;
}

/// Outcome of one publish cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// All three cells written
    pub published: BTreeSet<String>,
    /// Sheet has no row for the talk; nothing to retry
    pub missing: BTreeSet<String>,
    /// Lookup or write failed; retried next cycle
    pub failed: BTreeSet<String>,
}

impl PublishReport {
    /// Ids whose published value is now settled
    pub fn settled(&self) -> BTreeSet<String> {
        self.published.union(&self.missing).cloned().collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Push changed tallies to the sink, one talk at a time.
///
/// A failure on one talk never stops the others.
pub async fn publish_changes(
    sink: &dyn TallySink,
    changes: Vec<(String, TallyEntry)>,
) -> PublishReport {
    let mut report = PublishReport::default();

    for (talk_id, entry) in changes {
        let row = match sink.find_row(&talk_id).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                warn!(talk_id = %talk_id, "Talk not found in sheet, skipping");
                report.missing.insert(talk_id);
                continue;
            }
            Err(e) => {
                error!(talk_id = %talk_id, error = %e, "Sheet lookup failed");
                report.failed.insert(talk_id);
                continue;
            }
        };

        let mut written = true;
        for column in TallyColumn::ALL {
            if let Err(e) = sink.update_cell(row, column, column.value(&entry)).await {
                error!(
                    talk_id = %talk_id,
                    row = %row,
                    column = ?column,
                    error = %e,
                    "Sheet update failed"
                );
                written = false;
                break;
            }
        }

        if written {
            debug!(
                talk_id = %talk_id,
                row = %row,
                positive = entry.positive,
                negative = entry.negative,
                neutral = entry.neutral,
                "Published tally"
            );
            report.published.insert(talk_id);
        } else {
            report.failed.insert(talk_id);
        }
    }

    info!(
        published = report.published.len(),
        missing = report.missing.len(),
        failed = report.failed.len(),
        "Publish cycle finished"
    );
    report
}

#[derive(Debug, Default)]
struct MemorySheetState {
    rows: HashMap<String, RowHandle>,
    cells: BTreeMap<(RowHandle, TallyColumn), u64>,
    lookups: Vec<String>,
    updates: Vec<(RowHandle, TallyColumn, u64)>,
}

/// In-process sheet for dry runs and tests
#[derive(Debug, Default)]
pub struct MemorySheet {
    state: Mutex<MemorySheetState>,
    failing: AtomicBool,
}

impl MemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sheet with one row per talk, starting below the header row
    pub fn with_talks<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let sheet = Self::new();
        for id in ids {
            sheet.add_talk(id);
        }
        sheet
    }

    /// Append a row for `talk_id` unless it already has one
    pub fn add_talk(&self, talk_id: &str) -> RowHandle {
        let mut state = self.lock();
        let next = RowHandle(state.rows.len() as u32 + 2);
        *state.rows.entry(talk_id.to_string()).or_insert(next)
    }

    /// While set, every call fails with `SinkError::Unavailable`
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Current cell values for a talk
    pub fn tally(&self, talk_id: &str) -> Option<TallyEntry> {
        let state = self.lock();
        let row = *state.rows.get(talk_id)?;
        let cell = |column: TallyColumn| state.cells.get(&(row, column)).copied().unwrap_or(0);
        Some(TallyEntry {
            positive: cell(TallyColumn::Positive),
            negative: cell(TallyColumn::Negative),
            neutral: cell(TallyColumn::Neutral),
        })
    }

    /// Every talk id looked up, in call order
    pub fn lookups(&self) -> Vec<String> {
        self.lock().lookups.clone()
    }

    /// Every successful cell write, in call order
    pub fn updates(&self) -> Vec<(RowHandle, TallyColumn, u64)> {
        self.lock().updates.clone()
    }

    pub fn clear_history(&self) {
        let mut state = self.lock();
        state.lookups.clear();
        state.updates.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemorySheetState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn check_available(&self) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(SinkError::Unavailable("memory sheet set to fail".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TallySink for MemorySheet {
    async fn find_row(&self, talk_id: &str) -> Result<Option<RowHandle>, SinkError> {
        let mut state = self.lock();
        state.lookups.push(talk_id.to_string());
        self.check_available()?;
        Ok(state.rows.get(talk_id).copied())
    }

    async fn update_cell(
        &self,
        row: RowHandle,
        column: TallyColumn,
        value: u64,
    ) -> Result<(), SinkError> {
        self.check_available()?;
        let mut state = self.lock();
        state.cells.insert((row, column), value);
        state.updates.push((row, column, value));
        Ok(())
    }
}
