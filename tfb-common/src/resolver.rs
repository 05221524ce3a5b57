//! Timestamp to talk resolution
//!
//! Schedules hold tens of talks, so a linear scan is enough. When windows
//! overlap (only possible for a schedule that slipped past validation, e.g.
//! a long session followed by an early start), the last matching talk in
//! schedule order wins.

use crate::schedule::{Schedule, TalkEvent};
use chrono::NaiveDateTime;

/// Find the talk whose window contains `timestamp`
pub fn resolve(timestamp: NaiveDateTime, schedule: &Schedule) -> Option<&TalkEvent> {
    schedule
        .events()
        .iter()
        .rev()
        .find(|event| event.contains(timestamp))
}

/// Talk id for `timestamp`, or `None` when no talk is running
pub fn resolve_id(timestamp: NaiveDateTime, schedule: &Schedule) -> Option<&str> {
    resolve(timestamp, schedule).map(|event| event.id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 5, 20)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn talk(id: &str, start: NaiveDateTime, minutes: i64) -> TalkEvent {
        TalkEvent {
            id: id.to_string(),
            room: "A".to_string(),
            start,
            end: start + Duration::minutes(minutes),
        }
    }

    fn day_schedule() -> Schedule {
        Schedule::from_events(
            "A",
            vec![
                talk("T1", at(9, 0), 105),
                talk("T2", at(11, 0), 105),
                talk("T3", at(13, 30), 105),
            ],
        )
    }

    #[test]
    fn test_resolves_inside_each_window() {
        let schedule = day_schedule();
        assert_eq!(resolve_id(at(9, 30), &schedule), Some("T1"));
        assert_eq!(resolve_id(at(11, 59), &schedule), Some("T2"));
        assert_eq!(resolve_id(at(14, 0), &schedule), Some("T3"));
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let schedule = day_schedule();
        assert_eq!(resolve_id(at(9, 0), &schedule), Some("T1"));
        assert_eq!(resolve_id(at(10, 45), &schedule), Some("T1"));
        assert_eq!(
            resolve_id(at(10, 45) + Duration::seconds(1), &schedule),
            None
        );
    }

    #[test]
    fn test_outside_every_window_is_none() {
        let schedule = day_schedule();
        assert_eq!(resolve_id(at(8, 59), &schedule), None);
        assert_eq!(resolve_id(at(10, 50), &schedule), None);
        assert_eq!(resolve_id(at(18, 0), &schedule), None);
    }

    #[test]
    fn test_every_minute_of_the_day_matches_at_most_the_containing_talk() {
        let schedule = day_schedule();
        let mut t = at(0, 0);
        while t < at(23, 59) {
            let expected: Vec<&str> = schedule
                .events()
                .iter()
                .filter(|e| e.start <= t && t <= e.end)
                .map(|e| e.id.as_str())
                .collect();
            // Non-overlapping schedule: zero or one candidate
            assert!(expected.len() <= 1);
            assert_eq!(resolve_id(t, &schedule), expected.first().copied());
            t += Duration::minutes(1);
        }
    }

    #[test]
    fn test_overlap_picks_later_event_in_schedule_order() {
        let schedule = Schedule::from_events(
            "A",
            vec![talk("LONG", at(9, 0), 180), talk("EARLY", at(10, 0), 60)],
        );
        assert_eq!(resolve_id(at(10, 30), &schedule), Some("EARLY"));
        // Only the first window covers 11:30
        assert_eq!(resolve_id(at(11, 30), &schedule), Some("LONG"));

        // Order, not start time, decides
        let reversed = Schedule::from_events(
            "A",
            vec![talk("EARLY", at(10, 0), 60), talk("LONG", at(9, 0), 180)],
        );
        assert_eq!(resolve_id(at(10, 30), &reversed), Some("LONG"));
    }

    #[test]
    fn test_empty_schedule_resolves_nothing() {
        let schedule = Schedule::empty("A");
        assert!(resolve(at(9, 30), &schedule).is_none());
    }
}
