//! Vote producers
//!
//! The device has three buttons. Here they are stood in for by a random
//! simulator (for bench testing a unit with nothing wired up) and a
//! line-oriented reader, one vote per line:
//!
//! | input                    | vote     |
//! |--------------------------|----------|
//! | `p`, `+`, `positive`     | Positive |
//! | `n`, `-`, `negative`     | Negative |
//! | `u`, `0`, `neutral`      | Neutral  |
//!
//! Both stamp votes with the injected clock and hand them to the channel
//! without waiting.

use crate::channel::VoteSender;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tfb_common::time::Clock;
use tfb_common::{VoteCategory, VoteRecord};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default spacing between simulated votes
pub const SIMULATED_VOTE_PERIOD: Duration = Duration::from_secs(1);

/// Turns button presses into timestamped vote records
#[derive(Clone)]
pub struct VoteCapture {
    sender: VoteSender,
    clock: Arc<dyn Clock>,
    room: String,
}

impl VoteCapture {
    pub fn new(sender: VoteSender, clock: Arc<dyn Clock>, room: impl Into<String>) -> Self {
        Self {
            sender,
            clock,
            room: room.into(),
        }
    }

    /// Record one button press. Returns `false` if the vote was dropped.
    pub fn vote(&self, category: VoteCategory) -> bool {
        let record = VoteRecord::new(self.clock.now(), category).with_room(self.room.clone());
        info!(
            category = %record.category,
            timestamp = %record.timestamp,
            "Vote captured"
        );
        self.sender.submit(record)
    }
}

/// Parse one input line into a vote; `None` for blank or unknown input
pub fn parse_vote_line(line: &str) -> Option<VoteCategory> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" => None,
        "p" | "+" => Some(VoteCategory::Positive),
        "n" | "-" => Some(VoteCategory::Negative),
        "u" | "0" => Some(VoteCategory::Neutral),
        other => other.parse().ok(),
    }
}

/// Cast a random vote every `period` until cancelled.
///
/// Returns the number of votes cast.
pub async fn simulate(capture: VoteCapture, period: Duration, cancel: CancellationToken) -> u64 {
    info!("Simulating votes every {:?}", period);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut cast = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let index = rand::thread_rng().gen_range(0..VoteCategory::ALL.len());
                let category = VoteCategory::ALL[index];
                debug!("SIMULATING: {} vote", category);
                capture.vote(category);
                cast += 1;
            }
        }
    }

    info!("Vote simulator stopped after {} votes", cast);
    cast
}

/// Read votes line by line until end of input or cancellation.
///
/// Returns the number of votes cast.
pub async fn read_votes<R>(capture: VoteCapture, reader: R, cancel: CancellationToken) -> u64
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut cast = 0;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => match parse_vote_line(&line) {
                Some(category) => {
                    capture.vote(category);
                    cast += 1;
                }
                None if line.trim().is_empty() => {}
                None => warn!("Ignoring unrecognised input '{}'", line.trim()),
            },
            Ok(None) => {
                info!("Vote input closed");
                break;
            }
            Err(e) => {
                warn!("Vote input error: {}", e);
                break;
            }
        }
    }

    cast
}
