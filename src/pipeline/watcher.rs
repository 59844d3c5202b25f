//! Tails a store collection and fans change events out to subscribers

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::errors::Result;
use crate::common::types::ChangeEvent;
use crate::config::types::WatcherConfig;
use crate::store::DocumentStore;

/// Cycles a gap may persist before it is reported at warn level
const GAP_WARN_CYCLES: u32 = 20;

/// One consumer of the collection with its own position
struct Subscriber {
    tx: mpsc::Sender<ChangeEvent>,
    cursor: u64,
    gap_cycles: u32,
}

enum Progress {
    /// Caught up with everything committed
    CaughtUp,
    /// Stopped before a missing sequence or a full queue
    Blocked,
    /// Receiver dropped
    Closed,
}

/// Delivers committed documents of one collection in sequence order
///
/// Every subscriber keeps its own cursor. A cursor only moves past a sequence
/// once its event sits in that subscriber's queue, and only ever by one: a
/// missing sequence halts delivery until it shows up. A full queue holds back
/// its own subscriber and no other.
pub struct ChangeWatcher {
    store: Arc<dyn DocumentStore>,
    collection: String,
    start_after: u64,
    config: WatcherConfig,
    subscribers: Vec<Subscriber>,
}

impl ChangeWatcher {
    /// Watch `collection`; [`subscribe`](Self::subscribe) starts after `start_after`
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        start_after: u64,
        config: WatcherConfig,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            start_after,
            config,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, tx: mpsc::Sender<ChangeEvent>) {
        self.subscribe_after(tx, self.start_after);
    }

    /// Subscribe with deliveries starting after `sequence`
    pub fn subscribe_after(&mut self, tx: mpsc::Sender<ChangeEvent>, sequence: u64) {
        self.subscribers.push(Subscriber {
            tx,
            cursor: sequence,
            gap_cycles: 0,
        });
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Highest sequence delivered to every subscriber
    pub fn cursor(&self) -> u64 {
        self.subscribers
            .iter()
            .map(|s| s.cursor)
            .min()
            .unwrap_or(self.start_after)
    }

    /// Cursor of each subscriber, in subscription order
    pub fn cursors(&self) -> Vec<u64> {
        self.subscribers.iter().map(|s| s.cursor).collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver every contiguous sequence currently committed
    ///
    /// Returns the number of events delivered across all subscribers.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let mut delivered = 0;
        let mut index = 0;

        while index < self.subscribers.len() {
            let (count, progress) = self.advance(index).await?;
            delivered += count;
            if let Progress::Closed = progress {
                warn!(collection = %self.collection, "Subscriber went away, dropping it");
                self.subscribers.remove(index);
            } else {
                index += 1;
            }
        }
        Ok(delivered)
    }

    async fn advance(&mut self, index: usize) -> Result<(usize, Progress)> {
        let after = self.subscribers[index].cursor;
        let documents = self
            .store
            .query_after(&self.collection, after, self.config.batch_size)
            .await?;

        let collection = &self.collection;
        let subscriber = &mut self.subscribers[index];
        let mut delivered = 0;

        for document in documents {
            let expected = subscriber.cursor + 1;
            if document.sequence != expected {
                subscriber.gap_cycles += 1;
                if subscriber.gap_cycles == GAP_WARN_CYCLES {
                    warn!(
                        %collection,
                        expected,
                        found = document.sequence,
                        "Sequence gap persists"
                    );
                } else {
                    debug!(
                        %collection,
                        expected,
                        found = document.sequence,
                        "Sequence gap, retrying next cycle"
                    );
                }
                return Ok((delivered, Progress::Blocked));
            }

            match subscriber.tx.try_send(document.change_event()) {
                Ok(()) => {
                    subscriber.cursor = document.sequence;
                    delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    debug!(%collection, cursor = subscriber.cursor, "Subscriber queue full, retrying next cycle");
                    subscriber.gap_cycles = 0;
                    return Ok((delivered, Progress::Blocked));
                }
                Err(TrySendError::Closed(_)) => return Ok((delivered, Progress::Closed)),
            }
        }

        subscriber.gap_cycles = 0;
        Ok((delivered, Progress::CaughtUp))
    }

    /// Poll until cancelled or every subscriber is gone
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            collection = %self.collection,
            subscribers = self.subscribers.len(),
            cursor = self.cursor(),
            "Change watcher started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!(collection = %self.collection, error = %e, "Change query failed");
                    }
                    if self.subscribers.is_empty() {
                        info!(collection = %self.collection, "No subscribers left");
                        break;
                    }
                }
            }
        }
        debug!(collection = %self.collection, cursor = self.cursor(), "Change watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::errors::AlphaError;
    use crate::store::{InMemoryStore, StoredDocument};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Store whose query results are scripted
    struct ScriptedStore {
        documents: Mutex<Vec<StoredDocument>>,
    }

    impl ScriptedStore {
        fn with_sequences(sequences: &[u64]) -> Self {
            Self {
                documents: Mutex::new(sequences.iter().map(|s| document(*s)).collect()),
            }
        }

        fn commit(&self, sequence: u64) {
            let mut documents = self.documents.lock().unwrap();
            documents.push(document(sequence));
            documents.sort_by_key(|d| d.sequence);
        }
    }

    fn document(sequence: u64) -> StoredDocument {
        StoredDocument {
            collection: "ticker.btc-usd".to_string(),
            sequence,
            document_id: format!("doc-{}", sequence),
            body: json!({}),
            committed_at: Utc::now(),
        }
    }

    #[async_trait]
    impl DocumentStore for ScriptedStore {
        async fn append(&self, _: &str, _: &str, _: serde_json::Value) -> Result<u64> {
            Err(AlphaError::Internal("read only".to_string()))
        }

        async fn query_after(&self, _: &str, after: u64, limit: usize) -> Result<Vec<StoredDocument>> {
            Ok(self
                .documents
                .lock()
                .unwrap()
                .iter()
                .filter(|d| d.sequence > after)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn latest(&self, _: &str) -> Result<Option<StoredDocument>> {
            Ok(self.documents.lock().unwrap().last().cloned())
        }

        async fn head_sequence(&self, _: &str) -> Result<u64> {
            Ok(self.documents.lock().unwrap().last().map(|d| d.sequence).unwrap_or(0))
        }

        async fn upsert(&self, _: &str, _: &str, _: serde_json::Value) -> Result<()> {
            Ok(())
        }

        async fn fetch(&self, _: &str, _: &str) -> Result<Option<serde_json::Value>> {
            Ok(None)
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ChangeEvent>) -> Vec<u64> {
        let mut sequences = Vec::new();
        while let Ok(event) = rx.try_recv() {
            sequences.push(event.commit_sequence);
        }
        sequences
    }

    #[tokio::test]
    async fn test_delivers_in_order_from_cursor() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..5 {
            store.append("ticker.btc-usd", &i.to_string(), json!(i)).await.unwrap();
        }
        let (tx, mut rx) = mpsc::channel(16);
        let mut watcher = ChangeWatcher::new(store, "ticker.btc-usd", 2, WatcherConfig::default());
        watcher.subscribe(tx);

        assert_eq!(watcher.poll_once().await.unwrap(), 3);
        assert_eq!(drain(&mut rx), vec![3, 4, 5]);
        assert_eq!(watcher.cursor(), 5);

        assert_eq!(watcher.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_gap_halts_delivery_until_filled() {
        let store = Arc::new(ScriptedStore::with_sequences(&[1, 2, 4, 5]));
        let (tx, mut rx) = mpsc::channel(16);
        let mut watcher = ChangeWatcher::new(store.clone(), "ticker.btc-usd", 0, WatcherConfig::default());
        watcher.subscribe(tx);

        watcher.poll_once().await.unwrap();
        assert_eq!(drain(&mut rx), vec![1, 2]);
        watcher.poll_once().await.unwrap();
        assert!(drain(&mut rx).is_empty());

        store.commit(3);
        watcher.poll_once().await.unwrap();
        assert_eq!(drain(&mut rx), vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_fans_out_and_drops_closed_subscribers() {
        let store = Arc::new(InMemoryStore::new());
        store.append("ticker.btc-usd", "a", json!({})).await.unwrap();

        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, rx2) = mpsc::channel(4);
        let mut watcher = ChangeWatcher::new(store.clone(), "ticker.btc-usd", 0, WatcherConfig::default());
        watcher.subscribe(tx1);
        watcher.subscribe(tx2);
        drop(rx2);

        watcher.poll_once().await.unwrap();
        assert_eq!(drain(&mut rx1), vec![1]);
        assert_eq!(watcher.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_holds_back_only_its_subscriber() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..5 {
            store.append("ticker.btc-usd", &i.to_string(), json!(i)).await.unwrap();
        }
        let (busy_tx, mut busy_rx) = mpsc::channel(1);
        let (free_tx, mut free_rx) = mpsc::channel(16);
        let mut watcher = ChangeWatcher::new(store.clone(), "ticker.btc-usd", 0, WatcherConfig::default());
        watcher.subscribe(busy_tx);
        watcher.subscribe(free_tx);

        let delivered = tokio::time::timeout(Duration::from_secs(1), watcher.poll_once())
            .await
            .expect("a full queue must not stall the watcher")
            .unwrap();

        assert_eq!(delivered, 6);
        assert_eq!(drain(&mut free_rx), vec![1, 2, 3, 4, 5]);
        assert_eq!(watcher.cursors(), vec![1, 5]);
        assert_eq!(watcher.cursor(), 1);

        // the busy subscriber picks up where it stopped once it drains
        assert_eq!(drain(&mut busy_rx), vec![1]);
        watcher.poll_once().await.unwrap();
        assert_eq!(drain(&mut busy_rx), vec![2]);
        assert!(drain(&mut free_rx).is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_start_at_their_own_sequence() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..4 {
            store.append("ticker.btc-usd", &i.to_string(), json!(i)).await.unwrap();
        }
        let (old_tx, mut old_rx) = mpsc::channel(16);
        let (new_tx, mut new_rx) = mpsc::channel(16);
        let mut watcher = ChangeWatcher::new(store, "ticker.btc-usd", 0, WatcherConfig::default());
        watcher.subscribe_after(old_tx, 1);
        watcher.subscribe_after(new_tx, 4);

        watcher.poll_once().await.unwrap();
        assert_eq!(drain(&mut old_rx), vec![2, 3, 4]);
        assert!(drain(&mut new_rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_without_subscribers() {
        let store = Arc::new(InMemoryStore::new());
        store.append("ticker.btc-usd", "a", json!({})).await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let mut watcher = ChangeWatcher::new(store, "ticker.btc-usd", 0, WatcherConfig::default());
        watcher.subscribe(tx);

        // returns on its own once the only subscriber is found closed
        watcher.run(CancellationToken::new()).await;
    }
}
