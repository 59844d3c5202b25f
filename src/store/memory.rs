//! In-process document store
//!
//! Used when no database is configured and throughout the tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{DocumentStore, StoredDocument};
use crate::common::errors::{AlphaError, Result};

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<StoredDocument>,
    ids: HashMap<String, u64>,
}

/// Document store held entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
    keyed: RwLock<HashMap<(String, String), serde_json::Value>>,
    failing_writes: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with a store write error
    pub fn inject_write_failures(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of documents committed to a collection
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.documents.len())
            .unwrap_or(0)
    }

    /// All committed documents of a collection, in sequence order
    pub async fn documents(&self, collection: &str) -> Vec<StoredDocument> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    fn take_injected_failure(&self) -> Result<()> {
        let consumed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(AlphaError::StoreWrite("injected write failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn append(
        &self,
        collection: &str,
        document_id: &str,
        body: serde_json::Value,
    ) -> Result<u64> {
        self.take_injected_failure()?;

        let mut collections = self.collections.write().await;
        let entry = collections.entry(collection.to_string()).or_default();

        if let Some(existing) = entry.ids.get(document_id) {
            return Ok(*existing);
        }

        let sequence = entry.documents.len() as u64 + 1;
        entry.documents.push(StoredDocument {
            collection: collection.to_string(),
            sequence,
            document_id: document_id.to_string(),
            body,
            committed_at: Utc::now(),
        });
        entry.ids.insert(document_id.to_string(), sequence);
        Ok(sequence)
    }

    async fn query_after(
        &self,
        collection: &str,
        after_sequence: u64,
        limit: usize,
    ) -> Result<Vec<StoredDocument>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|c| {
                // sequence n lives at index n - 1
                c.documents
                    .iter()
                    .skip(after_sequence as usize)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest(&self, collection: &str) -> Result<Option<StoredDocument>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|c| c.documents.last().cloned()))
    }

    async fn head_sequence(&self, collection: &str) -> Result<u64> {
        Ok(self.len(collection).await as u64)
    }

    async fn upsert(
        &self,
        collection: &str,
        document_id: &str,
        body: serde_json::Value,
    ) -> Result<()> {
        self.take_injected_failure()?;
        self.keyed
            .write()
            .await
            .insert((collection.to_string(), document_id.to_string()), body);
        Ok(())
    }

    async fn fetch(&self, collection: &str, document_id: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .keyed
            .read()
            .await
            .get(&(collection.to_string(), document_id.to_string()))
            .cloned())
    }
}
