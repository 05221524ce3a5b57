//! # TFB Common Library
//!
//! Shared code for the Talk Feedback services including:
//! - Schedule model, validation and the on-disk schedule cache
//! - Timestamp to talk resolution
//! - Vote and tally types
//! - The durable per-day vote log
//! - Configuration loading
//! - Clock abstraction

pub mod cache;
pub mod config;
pub mod error;
pub mod resolver;
pub mod schedule;
pub mod tally;
pub mod time;
pub mod vote;
pub mod vote_log;

pub use error::{Error, Result};
pub use schedule::{Schedule, ScheduleError, TalkEvent};
pub use tally::{CheckpointSnapshot, TallyEntry, TallyStore};
pub use vote::{VoteCategory, VoteRecord};
