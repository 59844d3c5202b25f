//! Polling book collector
//!
//! One task per configured (asset, level) pair. Every tick of the pair's
//! timer asks the collector's [`RateGate`] for admission, fetches a snapshot
//! and appends it to the pair's book collection. Failed fetches are retried
//! with backoff inside the same admission. When a retry succeeds after the
//! tick, the admission and the pair's schedule move to that attempt, so
//! persisted snapshots stay at least one interval apart.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::rate_gate::RateGate;
use super::stats::CollectorStats;
use crate::common::alerts::AlertDispatcher;
use crate::common::backoff::{Backoff, BackoffConfig};
use crate::common::errors::AlphaError;
use crate::common::traits::BookSource;
use crate::common::types::{book_collection, BookLevel, BookSnapshot};
use crate::config::types::{PollConfig, PollSchedule};
use crate::store::{append_record, DocumentStore};

/// Throttle key of the poll collector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PollKey {
    pub asset: String,
    pub level: BookLevel,
}

impl PollKey {
    pub fn new(asset: impl Into<String>, level: BookLevel) -> Self {
        Self {
            asset: asset.into().to_uppercase(),
            level,
        }
    }
}

impl From<&PollSchedule> for PollKey {
    fn from(schedule: &PollSchedule) -> Self {
        PollKey::new(schedule.asset.clone(), schedule.level)
    }
}

pub struct PollCollector {
    source: Arc<dyn BookSource>,
    store: Arc<dyn DocumentStore>,
    gate: Arc<RateGate<PollKey>>,
    schedules: Vec<PollSchedule>,
    retry: BackoffConfig,
    store_retry: BackoffConfig,
    stats: Arc<CollectorStats>,
    alerts: AlertDispatcher,
}

impl PollCollector {
    /// Create a collector whose gate enforces each schedule's interval
    pub fn new(source: Arc<dyn BookSource>, store: Arc<dyn DocumentStore>, config: &PollConfig) -> Self {
        let gate = RateGate::new(Duration::ZERO).with_intervals(
            config
                .schedules
                .iter()
                .map(|s| (PollKey::from(s), s.interval())),
        );

        Self {
            source,
            store,
            gate: Arc::new(gate),
            schedules: config.schedules.clone(),
            retry: config.retry.clone(),
            store_retry: config.store_retry.clone(),
            stats: Arc::new(CollectorStats::new()),
            alerts: AlertDispatcher::disabled(),
        }
    }

    /// Raise operator alerts through `alerts`
    pub fn with_alerts(mut self, alerts: AlertDispatcher) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn stats(&self) -> Arc<CollectorStats> {
        self.stats.clone()
    }

    pub fn gate(&self) -> Arc<RateGate<PollKey>> {
        self.gate.clone()
    }

    /// Spawn one polling task per schedule
    pub fn spawn(self, cancel: CancellationToken) -> JoinSet<()> {
        let mut tasks = JoinSet::new();
        for schedule in &self.schedules {
            let poller = PairPoller {
                key: PollKey::from(schedule),
                interval: schedule.interval(),
                source: self.source.clone(),
                store: self.store.clone(),
                gate: self.gate.clone(),
                retry: self.retry.clone(),
                store_retry: self.store_retry.clone(),
                stats: self.stats.clone(),
                alerts: self.alerts.clone(),
            };
            tasks.spawn(poller.run(cancel.clone()));
        }
        info!(pairs = self.schedules.len(), "Poll collector started");
        self.alerts.send(
            "Poll collector started",
            format!("{} (asset, level) pairs", self.schedules.len()),
        );
        tasks
    }
}

struct PairPoller {
    key: PollKey,
    interval: Duration,
    source: Arc<dyn BookSource>,
    store: Arc<dyn DocumentStore>,
    gate: Arc<RateGate<PollKey>>,
    retry: BackoffConfig,
    store_retry: BackoffConfig,
    stats: Arc<CollectorStats>,
    alerts: AlertDispatcher,
}

impl PairPoller {
    async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                tick = ticker.tick() => {
                    if self.poll_once(tick, &cancel).await {
                        ticker.reset();
                    }
                }
            }
        }
        debug!(asset = %self.key.asset, level = %self.key.level, "Poller stopped");
    }

    /// One admission: fetch (with retries) and persist
    ///
    /// `tick` is the scheduled tick time, so admissions stay exactly one
    /// interval apart even when the task wakes late. Returns true when the
    /// snapshot came from a retry after the tick and the schedule must
    /// restart from it.
    async fn poll_once(&self, tick: Instant, cancel: &CancellationToken) -> bool {
        if !self.gate.admit(&self.key, tick) {
            self.stats.record_throttled();
            debug!(asset = %self.key.asset, level = %self.key.level, "Poll throttled");
            return false;
        }

        let Some((snapshot, fetched_at)) = self.fetch_with_retry(tick, cancel).await else {
            return false;
        };
        let rescheduled = fetched_at > tick;
        if rescheduled {
            self.gate.record(&self.key, fetched_at);
        }

        let collection = book_collection(&self.key.asset, self.key.level);
        match append_record(
            self.store.as_ref(),
            &collection,
            &snapshot.document_id(),
            &snapshot,
            &self.store_retry,
        )
        .await
        {
            Ok(sequence) => {
                self.stats.record_persisted();
                debug!(%collection, sequence, "Book snapshot persisted");
            }
            Err(e) => {
                if self.stats.record_store_failure() {
                    self.alerts.send(
                        "Poll collector degraded",
                        format!("{} snapshot not persisted: {}", collection, e),
                    );
                }
                error!(%collection, error = %e, "Poll collector degraded: snapshot not persisted");
            }
        }
        rescheduled
    }

    /// Fetch until success or the retry cap; yields the snapshot and the
    /// instant its attempt started, the tick itself for the first attempt
    async fn fetch_with_retry(
        &self,
        tick: Instant,
        cancel: &CancellationToken,
    ) -> Option<(BookSnapshot, Instant)> {
        let mut backoff = Backoff::new(self.retry.clone());

        loop {
            let started = if backoff.attempt_count() == 0 {
                tick
            } else {
                Instant::now()
            };
            let error = match self.source.fetch_book(&self.key.asset, self.key.level).await {
                Ok(snapshot) => return Some((snapshot, started)),
                Err(e) => e,
            };
            self.stats.record_fetch_failure();

            let delay = match &error {
                AlphaError::RateLimit { .. } => {
                    let floor = error.retry_after().unwrap_or(self.retry.initial_delay() * 2);
                    backoff.next_delay_at_least(floor)
                }
                _ => backoff.next_delay(),
            };

            let Some(delay) = delay else {
                warn!(
                    asset = %self.key.asset,
                    level = %self.key.level,
                    error = %error,
                    "Snapshot fetch failed, waiting for next tick"
                );
                return None;
            };

            debug!(
                asset = %self.key.asset,
                level = %self.key.level,
                attempt = backoff.attempt_count(),
                error = %error,
                "Snapshot fetch failed, retrying in {:?}",
                delay
            );
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = sleep(delay) => {}
            }
        }
    }
}
