//! Streaming quote collector
//!
//! The feed delivers one side of the top of book per message. Halves are
//! merged per asset into a [`Quote`]; a complete quote passes through the
//! collector's [`RateGate`] and, if admitted, is appended to the asset's
//! ticker collection. Rejected quotes are dropped, never queued.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::rate_gate::RateGate;
use super::stats::CollectorStats;
use crate::coinbase::websocket::{parse_feed_message, FeedMessage};
use crate::common::alerts::AlertDispatcher;
use crate::common::backoff::{Backoff, BackoffConfig};
use crate::common::errors::{AlphaError, Result};
use crate::common::traits::QuoteFeed;
use crate::common::types::{quote_collection, Quote, QuoteHalf, Side};
use crate::config::types::StreamConfig;
use crate::store::{append_record, DocumentStore};

/// Accumulation state for one asset
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PendingQuote {
    #[default]
    Empty,
    /// Bid held, waiting for the ask
    AwaitingAsk(QuoteHalf),
    /// Ask held, waiting for the bid
    AwaitingBid(QuoteHalf),
}

/// Per-asset half-quote buffers
#[derive(Debug, Default)]
pub struct QuoteAccumulator {
    pending: HashMap<String, PendingQuote>,
}

impl QuoteAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a half; returns the merged quote once both sides are held
    ///
    /// A half for a side already held replaces it. Completing a quote resets
    /// the asset to empty.
    pub fn push(&mut self, half: QuoteHalf, received: DateTime<Utc>) -> Option<Quote> {
        let slot = self.pending.entry(half.asset_id.clone()).or_default();
        let current = std::mem::take(slot);

        let (next, quote) = match (current, half.side) {
            (PendingQuote::AwaitingBid(ask), Side::Buy) => {
                (PendingQuote::Empty, Some(Quote::from_halves(&half, &ask, received)))
            }
            (PendingQuote::AwaitingAsk(bid), Side::Sell) => {
                (PendingQuote::Empty, Some(Quote::from_halves(&bid, &half, received)))
            }
            (_, Side::Buy) => (PendingQuote::AwaitingAsk(half), None),
            (_, Side::Sell) => (PendingQuote::AwaitingBid(half), None),
        };

        *slot = next;
        quote
    }

    pub fn state(&self, asset_id: &str) -> PendingQuote {
        self.pending.get(asset_id).cloned().unwrap_or_default()
    }

    /// Drop every held half
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Collector for the exchange's push feed
pub struct StreamCollector<F: QuoteFeed> {
    feed: F,
    assets: Vec<String>,
    gate: Arc<RateGate<String>>,
    store: Arc<dyn DocumentStore>,
    accumulator: QuoteAccumulator,
    reconnect: BackoffConfig,
    store_retry: BackoffConfig,
    stats: Arc<CollectorStats>,
    alerts: AlertDispatcher,
}

impl<F: QuoteFeed> StreamCollector<F> {
    pub fn new(feed: F, store: Arc<dyn DocumentStore>, config: &StreamConfig) -> Self {
        let assets: Vec<String> = config.assets.iter().map(|a| a.to_uppercase()).collect();
        let overrides = config
            .interval_overrides()
            .into_iter()
            .map(|(asset, interval)| (asset.to_uppercase(), interval));
        let gate = RateGate::new(config.quote_interval()).with_intervals(overrides);

        Self {
            feed,
            assets,
            gate: Arc::new(gate),
            store,
            accumulator: QuoteAccumulator::new(),
            reconnect: config.reconnect.clone(),
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

    pub fn gate(&self) -> Arc<RateGate<String>> {
        self.gate.clone()
    }

    pub fn accumulator(&self) -> &QuoteAccumulator {
        &self.accumulator
    }

    /// Process one text frame received at `now`
    ///
    /// Returns the commit sequence when a quote was persisted.
    pub async fn handle_frame(&mut self, text: &str, now: Instant) -> Option<u64> {
        let message = match parse_feed_message(text) {
            Ok(message) => message,
            Err(e) => {
                self.stats.record_malformed();
                warn!(error = %e, "Dropping malformed feed message");
                return None;
            }
        };

        match message {
            FeedMessage::Half(half) => {
                if !self.assets.contains(&half.asset_id) {
                    debug!(asset = %half.asset_id, "Half for unsubscribed asset ignored");
                    return None;
                }
                let quote = self.accumulator.push(half, Utc::now())?;
                if self.gate.admit(&quote.asset_id, now) {
                    self.persist(&quote).await
                } else {
                    self.stats.record_throttled();
                    debug!(asset = %quote.asset_id, "Quote throttled");
                    None
                }
            }
            FeedMessage::Error(detail) => {
                warn!(%detail, "Feed reported an error");
                None
            }
            FeedMessage::Snapshot { .. }
            | FeedMessage::Heartbeat
            | FeedMessage::Subscriptions
            | FeedMessage::Other(_) => None,
        }
    }

    async fn persist(&self, quote: &Quote) -> Option<u64> {
        let collection = quote_collection(&quote.asset_id);
        match append_record(
            self.store.as_ref(),
            &collection,
            &quote.document_id(),
            quote,
            &self.store_retry,
        )
        .await
        {
            Ok(sequence) => {
                self.stats.record_persisted();
                debug!(asset = %quote.asset_id, sequence, "Quote persisted");
                Some(sequence)
            }
            Err(e) => {
                if self.stats.record_store_failure() {
                    self.alerts.send(
                        "Stream collector degraded",
                        format!("quote for {} not persisted: {}", quote.asset_id, e),
                    );
                }
                error!(
                    asset = %quote.asset_id,
                    error = %e,
                    "Stream collector degraded: quote not persisted"
                );
                None
            }
        }
    }

    /// Connect, subscribe and process frames until cancelled
    ///
    /// Each (re)subscription starts from empty buffers. Gives up only when the
    /// reconnect backoff has a finite cap and exhausts it.
    #[instrument(skip_all, fields(feed = self.feed.feed_name()))]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut backoff = Backoff::new(self.reconnect.clone());
        self.alerts.send("Stream collector started", self.assets.join(", "));

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.feed.connect(&self.assets).await {
                Ok(()) => {
                    self.accumulator.clear();
                    info!(assets = ?self.assets, "Subscribed to feed");

                    loop {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                if let Err(e) = self.feed.close().await {
                                    debug!(error = %e, "Error closing feed");
                                }
                                return Ok(());
                            }
                            frame = self.feed.next_frame() => match frame {
                                Ok(Some(text)) => {
                                    backoff.reset();
                                    self.handle_frame(&text, Instant::now()).await;
                                }
                                Ok(None) => {
                                    warn!("Feed closed by server");
                                    self.alerts.send("Feed connection lost", "closed by server");
                                    break;
                                }
                                Err(e) => {
                                    warn!(error = %e, "Feed connection lost");
                                    self.alerts.send("Feed connection lost", e.to_string());
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Feed connection failed"),
            }

            let Some(delay) = backoff.next_delay() else {
                error!(attempts = backoff.attempt_count(), "Giving up on feed");
                self.alerts.send(
                    "Stream collector stopped",
                    format!("gave up after {} reconnect attempts", backoff.attempt_count()),
                );
                return Err(AlphaError::TransientNetwork(
                    "feed reconnect attempts exhausted".to_string(),
                ));
            };
            info!(
                attempt = backoff.attempt_count(),
                "Reconnecting to feed in {:?}", delay
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        info!(stats = ?self.stats.snapshot(), "Stream collector stopped");
        Ok(())
    }
}
