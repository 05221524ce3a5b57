//! Feedback aggregation loop
//!
//! One task owns the tally store. Every `poll_interval` it:
//!
//! 1. **Draining**: takes every queued vote (plus any batch a failed write
//!    left behind)
//! 2. **Persisting**: resolves each vote to a talk, appends the batch to the
//!    per-day log, and only then counts resolved votes
//! 3. **Publishing**: once `publish_interval` has passed, recomputes tallies
//!    from the log and pushes the talks that changed since the last
//!    successful publish to the sheet in a background task
//!
//! A slow or unreachable sheet therefore never holds up logging.

use crate::channel::VoteReceiver;
use crate::error::Result;
use crate::sink::{publish_changes, PublishReport, TallySink};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tfb_common::config::TomlConfig;
use tfb_common::resolver::resolve_id;
use tfb_common::tally::diff;
use tfb_common::time::{secs_to_duration, Clock};
use tfb_common::vote_log::{LogRow, VoteLog};
use tfb_common::{CheckpointSnapshot, Schedule, TallyEntry, TallyStore, VoteRecord};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Aggregator timing and retry settings
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Drain/persist period (default: 5s)
    pub poll_interval: Duration,

    /// Minimum time between publish cycles (default: 120s)
    pub publish_interval: Duration,

    /// Log write attempts per tick (default: 3)
    pub write_attempts: u32,

    /// Backoff unit between write attempts; attempt N waits N units
    pub write_retry_backoff: Duration,

    /// How long shutdown waits for an in-flight publish (default: 10s)
    pub shutdown_publish_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            publish_interval: Duration::from_secs(120),
            write_attempts: 3,
            write_retry_backoff: Duration::from_millis(200),
            shutdown_publish_timeout: Duration::from_secs(10),
        }
    }
}

impl AggregatorConfig {
    pub fn from_toml(config: &TomlConfig) -> Self {
        Self {
            poll_interval: secs_to_duration(config.poll_interval_secs),
            publish_interval: secs_to_duration(config.publish_interval_secs),
            write_attempts: config.write_attempts,
            ..Self::default()
        }
    }
}

/// Where the aggregator is within a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorPhase {
    Idle,
    Draining,
    Persisting,
    Publishing,
}

struct InFlightPublish {
    handle: JoinHandle<PublishReport>,
    /// Tallies the publish was computed from
    snapshot: CheckpointSnapshot,
}

/// Single owner of tallies and the vote log writer
pub struct FeedbackAggregator {
    schedule: Arc<Schedule>,
    log: VoteLog,
    sink: Arc<dyn TallySink>,
    receiver: VoteReceiver,
    clock: Arc<dyn Clock>,
    config: AggregatorConfig,

    tallies: TallyStore,
    last_published: CheckpointSnapshot,
    pending: Vec<VoteRecord>,
    phase: AggregatorPhase,
    last_publish: Instant,
    in_flight: Option<InFlightPublish>,
}

impl FeedbackAggregator {
    /// Create the aggregator, restoring tallies from votes already on disk
    pub fn new(
        schedule: Arc<Schedule>,
        log: VoteLog,
        sink: Arc<dyn TallySink>,
        receiver: VoteReceiver,
        clock: Arc<dyn Clock>,
        config: AggregatorConfig,
    ) -> Self {
        let mut aggregator = Self {
            schedule,
            log,
            sink,
            receiver,
            clock,
            config,
            tallies: TallyStore::new(),
            last_published: CheckpointSnapshot::default(),
            pending: Vec::new(),
            phase: AggregatorPhase::Idle,
            last_publish: Instant::now(),
            in_flight: None,
        };

        match aggregator.recompute() {
            Ok(tallies) => {
                let restored: u64 = tallies.snapshot().iter().map(|(_, e)| e.total()).sum();
                if restored > 0 {
                    info!(
                        "Restored {} logged votes from {}",
                        restored,
                        aggregator.log.dir().display()
                    );
                }
                aggregator.tallies = tallies;
            }
            Err(e) => {
                warn!("Could not read existing vote logs, starting from zero: {}", e);
                aggregator.tallies.seed(aggregator.schedule.talk_ids());
            }
        }

        aggregator
    }

    pub fn phase(&self) -> AggregatorPhase {
        self.phase
    }

    pub fn tallies(&self) -> &TallyStore {
        &self.tallies
    }

    /// Tallies as of the last successful publish
    pub fn last_published(&self) -> &CheckpointSnapshot {
        &self.last_published
    }

    /// Votes waiting for a successful log write
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn publish_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Drain, persist and, when due, publish
    pub async fn tick(&mut self) -> Result<()> {
        self.collect_publish(false).await;

        self.set_phase(AggregatorPhase::Draining);
        let mut batch = std::mem::take(&mut self.pending);
        batch.extend(self.receiver.drain());

        if !batch.is_empty() {
            self.set_phase(AggregatorPhase::Persisting);
            if let Err(e) = self.persist(batch).await {
                self.set_phase(AggregatorPhase::Idle);
                return Err(e);
            }
        }

        let result = if self.publish_due() {
            self.set_phase(AggregatorPhase::Publishing);
            self.start_publish()
        } else {
            Ok(())
        };

        self.set_phase(AggregatorPhase::Idle);
        result
    }

    /// Wait for the in-flight publish, if any, and record its outcome
    pub async fn wait_for_publish(&mut self) -> Option<PublishReport> {
        self.collect_publish(true).await
    }

    /// Tick every `poll_interval` until cancelled, then shut down
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            "Starting aggregator (poll: {:?}, publish: {:?}, {} talks)",
            self.config.poll_interval,
            self.config.publish_interval,
            self.schedule.len()
        );

        let mut timer = interval(self.config.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("Aggregator tick failed: {}", e);
                    }
                }
            }
        }

        if let Err(e) = self.shutdown().await {
            error!("Votes could not be saved during shutdown: {}", e);
        }
    }

    /// Stop accepting votes, persist what is buffered and let an in-flight
    /// publish finish within `shutdown_publish_timeout`
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Aggregator shutting down");

        self.set_phase(AggregatorPhase::Draining);
        let mut batch = std::mem::take(&mut self.pending);
        batch.extend(self.receiver.close_and_drain());

        let persisted = if batch.is_empty() {
            Ok(())
        } else {
            self.set_phase(AggregatorPhase::Persisting);
            self.persist(batch).await
        };
        self.set_phase(AggregatorPhase::Idle);

        if self.in_flight.is_some() {
            let timeout = self.config.shutdown_publish_timeout;
            if tokio::time::timeout(timeout, self.wait_for_publish())
                .await
                .is_err()
            {
                warn!("Publish still running after {:?}, abandoning it", timeout);
            }
        }

        let dropped = self.receiver.dropped();
        if dropped > 0 {
            warn!("{} votes were dropped because the vote channel was full", dropped);
        }

        info!("Aggregator stopped");
        persisted
    }

    fn set_phase(&mut self, phase: AggregatorPhase) {
        if self.phase != phase {
            debug!("Aggregator phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn publish_due(&self) -> bool {
        self.in_flight.is_none() && self.last_publish.elapsed() >= self.config.publish_interval
    }

    /// Log the batch, then count it. On failure nothing is counted and the
    /// batch is kept for the next tick.
    async fn persist(&mut self, batch: Vec<VoteRecord>) -> Result<()> {
        let rows: Vec<LogRow> = batch
            .iter()
            .map(|vote| LogRow::from_vote(vote, resolve_id(vote.timestamp, &self.schedule)))
            .collect();

        let attempts = self.config.write_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.log.append(&rows) {
                Ok(_) => break,
                Err(e) if attempt < attempts => {
                    warn!(
                        attempt,
                        attempts,
                        votes = rows.len(),
                        "Vote log write failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(self.config.write_retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        votes = rows.len(),
                        "Vote log write failed after {} attempts, keeping votes for next tick: {}",
                        attempts,
                        e
                    );
                    self.pending = batch;
                    return Err(e.into());
                }
            }
        }

        let mut unresolved = 0;
        for row in &rows {
            match row.event_id.as_deref() {
                Some(id) => self.tallies.apply(id, row.category),
                None => unresolved += 1,
            }
        }
        info!(
            votes = rows.len(),
            unresolved,
            "Persisted votes to {}",
            self.log.dir().display()
        );
        Ok(())
    }

    /// Days whose logs can hold votes for this schedule, plus today
    fn publish_days(&self) -> BTreeSet<chrono::NaiveDate> {
        let mut days = self.schedule.days();
        days.insert(self.clock.now().date());
        days
    }

    /// Tallies rebuilt from the vote log
    fn recompute(&self) -> Result<TallyStore> {
        let rows = self.log.read_days(self.publish_days())?;
        let mut tallies = TallyStore::replay(&rows);
        tallies.seed(self.schedule.talk_ids());
        Ok(tallies)
    }

    fn start_publish(&mut self) -> Result<()> {
        let before = self.tallies.snapshot();
        let recomputed = match self.recompute() {
            Ok(tallies) => tallies,
            Err(e) => {
                error!("Skipping publish, vote log unreadable: {}", e);
                return Err(e);
            }
        };
        let current = recomputed.snapshot();

        let drift = diff(&before, &current);
        if !drift.is_empty() {
            warn!(
                talks = ?drift,
                "In-memory tallies disagree with the vote log; using the log"
            );
        }
        self.tallies = recomputed;
        self.last_publish = Instant::now();

        let changed = diff(&self.last_published, &current);
        if changed.is_empty() {
            debug!("No tally changes to publish");
            return Ok(());
        }

        info!("Publishing {} changed talks", changed.len());
        let changes: Vec<(String, TallyEntry)> = changed
            .into_iter()
            .map(|id| {
                let entry = current.get(&id);
                (id, entry)
            })
            .collect();

        let sink = Arc::clone(&self.sink);
        let handle = tokio::spawn(async move { publish_changes(sink.as_ref(), changes).await });
        self.in_flight = Some(InFlightPublish {
            handle,
            snapshot: current,
        });
        Ok(())
    }

    /// Record a finished publish. With `wait` set, block until it finishes.
    async fn collect_publish(&mut self, wait: bool) -> Option<PublishReport> {
        let ready = match &self.in_flight {
            Some(publish) => wait || publish.handle.is_finished(),
            None => false,
        };
        if !ready {
            return None;
        }

        let publish = self.in_flight.take()?;
        match publish.handle.await {
            Ok(report) => {
                self.last_published
                    .advance(&report.settled(), &publish.snapshot);
                if !report.failed.is_empty() {
                    warn!(
                        talks = ?report.failed,
                        "Publish incomplete; failed talks will be retried next cycle"
                    );
                }
                Some(report)
            }
            Err(e) => {
                error!("Publish task ended abnormally: {}", e);
                None
            }
        }
    }
}
