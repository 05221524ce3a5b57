//! Vote hand-off between capture and aggregation
//!
//! Many producers (one per input source), one consumer. Producers never
//! wait: when the buffer is full the vote is dropped, because a missed
//! button press is acceptable and a frozen input loop is not. The consumer
//! takes everything queued once per tick instead of one vote at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tfb_common::VoteRecord;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{info, warn};

/// Create a bounded vote channel
pub fn vote_channel(capacity: usize) -> (VoteSender, VoteReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        VoteSender {
            tx,
            dropped: Arc::clone(&dropped),
        },
        VoteReceiver { rx, dropped },
    )
}

/// Producer side; cheap to clone, one per capture task
#[derive(Debug, Clone)]
pub struct VoteSender {
    tx: mpsc::Sender<VoteRecord>,
    dropped: Arc<AtomicU64>,
}

impl VoteSender {
    /// Queue a vote without waiting. Returns `false` if it was dropped.
    pub fn submit(&self, record: VoteRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    category = %record.category,
                    timestamp = %record.timestamp,
                    dropped_total = total,
                    "Vote channel full, dropping vote"
                );
                false
            }
            Err(TrySendError::Closed(record)) => {
                warn!(
                    category = %record.category,
                    "Vote channel closed, vote not recorded"
                );
                false
            }
        }
    }

    /// Votes dropped because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side, owned by the aggregator
#[derive(Debug)]
pub struct VoteReceiver {
    rx: mpsc::Receiver<VoteRecord>,
    dropped: Arc<AtomicU64>,
}

impl VoteReceiver {
    /// Everything queued right now, in arrival order. Never waits.
    pub fn drain(&mut self) -> Vec<VoteRecord> {
        let mut records = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(record) => records.push(record),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        records
    }

    /// Refuse further votes and return whatever is still buffered
    pub fn close_and_drain(&mut self) -> Vec<VoteRecord> {
        self.rx.close();
        let records = self.drain();
        info!("Vote channel closed with {} votes buffered", records.len());
        records
    }

    /// Votes dropped because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tfb_common::VoteCategory;

    fn vote(minute: u32, category: VoteCategory) -> VoteRecord {
        let t = NaiveDate::from_ymd_opt(2018, 5, 20)
            .unwrap()
            .and_hms_opt(9, minute, 0)
            .unwrap();
        VoteRecord::new(t, category)
    }

    #[test]
    fn test_drain_empty_is_noop() {
        let (_tx, mut rx) = vote_channel(4);
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_drain_preserves_producer_order() {
        let (tx, mut rx) = vote_channel(8);
        for minute in 0..5 {
            assert!(tx.submit(vote(minute, VoteCategory::Positive)));
        }

        let drained = rx.drain();
        let minutes: Vec<u32> = drained
            .iter()
            .map(|r| chrono::Timelike::minute(&r.timestamp))
            .collect();
        assert_eq!(minutes, vec![0, 1, 2, 3, 4]);
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (tx, mut rx) = vote_channel(2);
        assert!(tx.submit(vote(0, VoteCategory::Positive)));
        assert!(tx.submit(vote(1, VoteCategory::Negative)));
        assert!(!tx.submit(vote(2, VoteCategory::Neutral)));
        assert!(!tx.submit(vote(3, VoteCategory::Neutral)));

        assert_eq!(tx.dropped(), 2);
        assert_eq!(rx.dropped(), 2);
        assert_eq!(rx.drain().len(), 2);

        // Space again after draining
        assert!(tx.submit(vote(4, VoteCategory::Neutral)));
    }

    #[test]
    fn test_many_producers_single_consumer() {
        let (tx, mut rx) = vote_channel(16);
        let tx2 = tx.clone();
        tx.submit(vote(0, VoteCategory::Positive));
        tx2.submit(vote(1, VoteCategory::Negative));
        tx.submit(vote(2, VoteCategory::Neutral));

        assert_eq!(rx.drain().len(), 3);
    }

    #[test]
    fn test_close_and_drain_returns_buffer_and_rejects_new_votes() {
        let (tx, mut rx) = vote_channel(4);
        tx.submit(vote(0, VoteCategory::Positive));
        tx.submit(vote(1, VoteCategory::Positive));

        let remaining = rx.close_and_drain();
        assert_eq!(remaining.len(), 2);
        assert!(tx.is_closed());
        assert!(!tx.submit(vote(2, VoteCategory::Positive)));
        // Closed, not full: not counted as dropped
        assert_eq!(tx.dropped(), 0);
    }
}
