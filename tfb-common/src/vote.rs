//! Vote types shared by capture and aggregation

use crate::{Error, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three feedback buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteCategory {
    Positive,
    Negative,
    Neutral,
}

impl VoteCategory {
    pub const ALL: [VoteCategory; 3] = [
        VoteCategory::Positive,
        VoteCategory::Negative,
        VoteCategory::Neutral,
    ];

    /// Text written to the `Feedback` column of the vote log
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteCategory::Positive => "Positive",
            VoteCategory::Negative => "Negative",
            VoteCategory::Neutral => "Neutral",
        }
    }
}

impl fmt::Display for VoteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(VoteCategory::Positive),
            "negative" => Ok(VoteCategory::Negative),
            "neutral" => Ok(VoteCategory::Neutral),
            other => Err(Error::InvalidInput(format!(
                "Unknown vote category: '{}'",
                other
            ))),
        }
    }
}

/// A single captured button press
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub timestamp: NaiveDateTime,
    pub category: VoteCategory,
    pub room: Option<String>,
}

impl VoteRecord {
    pub fn new(timestamp: NaiveDateTime, category: VoteCategory) -> Self {
        Self {
            timestamp,
            category,
            room: None,
        }
    }

    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_text_roundtrip() {
        for category in VoteCategory::ALL {
            let parsed: VoteCategory = category.as_str().parse().unwrap();
            assert_eq!(parsed, category);
        }
    }

    #[test]
    fn test_category_parse_is_case_insensitive() {
        assert_eq!("POSITIVE".parse::<VoteCategory>().unwrap(), VoteCategory::Positive);
        assert_eq!(" neutral ".parse::<VoteCategory>().unwrap(), VoteCategory::Neutral);
    }

    #[test]
    fn test_category_parse_rejects_unknown() {
        let err = "meh".parse::<VoteCategory>().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_record_with_room() {
        let t = chrono::NaiveDate::from_ymd_opt(2018, 5, 20)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        let record = VoteRecord::new(t, VoteCategory::Negative).with_room("BallroomA");
        assert_eq!(record.room.as_deref(), Some("BallroomA"));
        assert_eq!(record.category, VoteCategory::Negative);
    }
}
