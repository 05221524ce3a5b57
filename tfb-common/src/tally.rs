//! Per-talk vote tallies
//!
//! The store is owned by the aggregation task and never shared, so it has
//! no internal locking. Snapshots are plain deep copies used to work out
//! which talks changed between two publish cycles.

use crate::vote::VoteCategory;
use crate::vote_log::LogRow;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Vote counters for one talk
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyEntry {
    pub positive: u64,
    pub negative: u64,
    pub neutral: u64,
}

impl TallyEntry {
    pub fn increment(&mut self, category: VoteCategory) {
        match category {
            VoteCategory::Positive => self.positive += 1,
            VoteCategory::Negative => self.negative += 1,
            VoteCategory::Neutral => self.neutral += 1,
        }
    }

    pub fn count(&self, category: VoteCategory) -> u64 {
        match category {
            VoteCategory::Positive => self.positive,
            VoteCategory::Negative => self.negative,
            VoteCategory::Neutral => self.neutral,
        }
    }

    pub fn total(&self) -> u64 {
        self.positive + self.negative + self.neutral
    }
}

/// Frozen copy of every tally at one point in time
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CheckpointSnapshot {
    entries: BTreeMap<String, TallyEntry>,
}

impl CheckpointSnapshot {
    /// Unseen talks read as zero
    pub fn get(&self, talk_id: &str) -> TallyEntry {
        self.entries.get(talk_id).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TallyEntry)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overwrite the given ids with their values from `other`
    pub fn advance(&mut self, ids: &BTreeSet<String>, other: &CheckpointSnapshot) {
        for id in ids {
            self.entries.insert(id.clone(), other.get(id));
        }
    }
}

/// In-memory talk id → counters map
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TallyStore {
    entries: BTreeMap<String, TallyEntry>,
}

impl TallyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create zero entries for every scheduled talk
    pub fn seed<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        for id in ids {
            self.entries.entry(id.to_string()).or_default();
        }
    }

    /// Count one vote, creating the entry on first use
    pub fn apply(&mut self, talk_id: &str, category: VoteCategory) {
        self.entries
            .entry(talk_id.to_string())
            .or_default()
            .increment(category);
    }

    pub fn get(&self, talk_id: &str) -> TallyEntry {
        self.entries.get(talk_id).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> CheckpointSnapshot {
        CheckpointSnapshot {
            entries: self.entries.clone(),
        }
    }

    /// Rebuild tallies from durable log rows. Rows without a talk id are
    /// audit-only and skipped.
    pub fn replay<'a>(rows: impl IntoIterator<Item = &'a LogRow>) -> Self {
        let mut store = Self::new();
        for row in rows {
            if let Some(id) = row.event_id.as_deref() {
                store.apply(id, row.category);
            }
        }
        store
    }
}

/// Talk ids whose counters differ between two snapshots.
///
/// Keys missing on one side compare as zero, so a talk seeded at zero and a
/// talk never seen are the same thing.
pub fn diff(a: &CheckpointSnapshot, b: &CheckpointSnapshot) -> BTreeSet<String> {
    a.entries
        .keys()
        .chain(b.entries.keys())
        .filter(|id| a.get(id) != b.get(id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn votes() -> Vec<(&'static str, VoteCategory)> {
        vec![
            ("T1", VoteCategory::Positive),
            ("T1", VoteCategory::Negative),
            ("T2", VoteCategory::Neutral),
            ("T1", VoteCategory::Positive),
            ("T3", VoteCategory::Negative),
        ]
    }

    #[test]
    fn test_apply_creates_and_increments() {
        let mut store = TallyStore::new();
        for (id, category) in votes() {
            store.apply(id, category);
        }

        assert_eq!(
            store.get("T1"),
            TallyEntry {
                positive: 2,
                negative: 1,
                neutral: 0
            }
        );
        assert_eq!(store.get("T2").neutral, 1);
        assert_eq!(store.get("T3").count(VoteCategory::Negative), 1);
        assert_eq!(store.get("unknown"), TallyEntry::default());
    }

    #[test]
    fn test_replaying_same_sequence_is_deterministic() {
        let run = || {
            let mut store = TallyStore::new();
            for (id, category) in votes() {
                store.apply(id, category);
            }
            store
        };
        assert_eq!(run(), run());
        assert_eq!(run().snapshot(), run().snapshot());
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let mut store = TallyStore::new();
        store.apply("T1", VoteCategory::Positive);
        let snap = store.snapshot();

        store.apply("T1", VoteCategory::Positive);
        assert_eq!(snap.get("T1").positive, 1);
        assert_eq!(store.get("T1").positive, 2);
    }

    #[test]
    fn test_diff_empty_when_nothing_applied() {
        let mut store = TallyStore::new();
        store.seed(["T1", "T2"]);
        store.apply("T1", VoteCategory::Neutral);

        let before = store.snapshot();
        let after = store.snapshot();
        assert!(diff(&before, &after).is_empty());
    }

    #[test]
    fn test_diff_returns_exactly_changed_ids() {
        let mut store = TallyStore::new();
        store.seed(["T1", "T2", "T3"]);
        store.apply("T2", VoteCategory::Positive);
        let before = store.snapshot();

        store.apply("T1", VoteCategory::Positive);
        store.apply("T3", VoteCategory::Negative);
        store.apply("T4", VoteCategory::Neutral);
        let after = store.snapshot();

        let changed: Vec<String> = diff(&before, &after).into_iter().collect();
        assert_eq!(changed, vec!["T1", "T3", "T4"]);
    }

    #[test]
    fn test_diff_treats_missing_as_zero() {
        let mut seeded = TallyStore::new();
        seeded.seed(["T1"]);
        let empty = TallyStore::new();
        assert!(diff(&seeded.snapshot(), &empty.snapshot()).is_empty());
    }

    #[test]
    fn test_advance_only_moves_given_ids() {
        let mut published = CheckpointSnapshot::default();
        let mut store = TallyStore::new();
        store.apply("T1", VoteCategory::Positive);
        store.apply("T2", VoteCategory::Positive);
        let current = store.snapshot();

        let ids: BTreeSet<String> = ["T1".to_string()].into_iter().collect();
        published.advance(&ids, &current);

        let remaining: Vec<String> = diff(&published, &current).into_iter().collect();
        assert_eq!(remaining, vec!["T2"]);
    }

    #[test]
    fn test_replay_skips_unresolved_rows() {
        let t = NaiveDate::from_ymd_opt(2018, 5, 20)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        let rows = vec![
            LogRow::new(t, Some("T1".to_string()), VoteCategory::Positive),
            LogRow::new(t, None, VoteCategory::Neutral),
            LogRow::new(t, Some("T1".to_string()), VoteCategory::Negative),
        ];

        let first = TallyStore::replay(&rows);
        let second = TallyStore::replay(&rows);
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert_eq!(
            first.get("T1"),
            TallyEntry {
                positive: 1,
                negative: 1,
                neutral: 0
            }
        );
    }
}
