//! # TFB Aggregator Library (tfb-ag)
//!
//! Collects feedback votes for one room, logs them durably and keeps the
//! event spreadsheet's per-talk tallies up to date.
//!
//! **Architecture:** capture tasks → bounded vote channel → single
//! aggregation task (log, resolve, tally) → background publish to the
//! tally sink.

pub mod aggregator;
pub mod capture;
pub mod channel;
pub mod error;
pub mod sheet_client;
pub mod sink;

pub use aggregator::{AggregatorConfig, AggregatorPhase, FeedbackAggregator};
pub use channel::{vote_channel, VoteReceiver, VoteSender};
pub use error::{Error, Result};
pub use sink::{MemorySheet, TallySink};
