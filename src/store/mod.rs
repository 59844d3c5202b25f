//! Document store: the durable hand-off between collectors and executors
//!
//! Appends to a collection receive a per-collection commit sequence starting
//! at 1. Readers observe documents of one collection in sequence order; that
//! ordering is the only synchronization between producers and consumers.
//!
//! Keyed documents (`upsert`/`fetch`) live beside the sequenced collections
//! and hold mutable records such as strategy state.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::common::backoff::{Backoff, BackoffConfig};
use crate::common::errors::{AlphaError, Result};
use crate::common::types::ChangeEvent;

pub use memory::InMemoryStore;
pub use postgres::PgDocumentStore;

/// A committed document and its position in its collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub collection: String,
    pub sequence: u64,
    pub document_id: String,
    pub body: serde_json::Value,
    pub committed_at: DateTime<Utc>,
}

impl StoredDocument {
    /// Deserialize the body into a typed record
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone()).map_err(AlphaError::from)
    }

    pub fn change_event(&self) -> ChangeEvent {
        ChangeEvent {
            collection_name: self.collection.clone(),
            document_id: self.document_id.clone(),
            commit_sequence: self.sequence,
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Append a document and return its commit sequence
    ///
    /// Idempotent on `document_id`: appending an id already present in the
    /// collection returns the existing sequence and writes nothing.
    async fn append(
        &self,
        collection: &str,
        document_id: &str,
        body: serde_json::Value,
    ) -> Result<u64>;

    /// Documents with sequence greater than `after_sequence`, ascending
    async fn query_after(
        &self,
        collection: &str,
        after_sequence: u64,
        limit: usize,
    ) -> Result<Vec<StoredDocument>>;

    /// Most recently committed document of a collection
    async fn latest(&self, collection: &str) -> Result<Option<StoredDocument>>;

    /// Highest committed sequence, 0 for an empty collection
    async fn head_sequence(&self, collection: &str) -> Result<u64>;

    /// Insert or replace a keyed document
    async fn upsert(&self, collection: &str, document_id: &str, body: serde_json::Value)
        -> Result<()>;

    /// Read a keyed document
    async fn fetch(&self, collection: &str, document_id: &str) -> Result<Option<serde_json::Value>>;
}

/// Serialize and append a record, retrying failed writes with backoff
///
/// Gives up with the last error once the retry cap is reached.
pub async fn append_record<T: Serialize + Sync>(
    store: &dyn DocumentStore,
    collection: &str,
    document_id: &str,
    record: &T,
    retry: &BackoffConfig,
) -> Result<u64> {
    let body = serde_json::to_value(record)?;
    let mut backoff = Backoff::new(retry.clone());

    loop {
        match store.append(collection, document_id, body.clone()).await {
            Ok(sequence) => return Ok(sequence),
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        collection,
                        document_id,
                        attempt = backoff.attempt_count(),
                        error = %e,
                        "Store append failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(AlphaError::StoreWrite(e.to_string())),
            },
        }
    }
}

/// Serialize and upsert a keyed record, retrying failed writes with backoff
pub async fn upsert_record<T: Serialize + Sync>(
    store: &dyn DocumentStore,
    collection: &str,
    document_id: &str,
    record: &T,
    retry: &BackoffConfig,
) -> Result<()> {
    let body = serde_json::to_value(record)?;
    let mut backoff = Backoff::new(retry.clone());

    loop {
        match store.upsert(collection, document_id, body.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        collection,
                        document_id,
                        attempt = backoff.attempt_count(),
                        error = %e,
                        "Store upsert failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(AlphaError::StoreWrite(e.to_string())),
            },
        }
    }
}

/// Read and decode the latest record of a collection
pub async fn latest_record<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
) -> Result<Option<T>> {
    match store.latest(collection).await? {
        Some(document) => Ok(Some(document.decode()?)),
        None => Ok(None),
    }
}
