//! PostgreSQL document store
//!
//! Each collection owns a row in `alpha_collection_heads`. An append locks
//! that row for the duration of its transaction, so sequences within a
//! collection commit in the order they were assigned.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info, instrument};

use super::{DocumentStore, StoredDocument};
use crate::common::errors::{AlphaError, Result};
use crate::config::types::DatabaseConfig;

const SCHEMA: [&str; 3] = [
    r"
    CREATE TABLE IF NOT EXISTS alpha_collection_heads (
        collection TEXT PRIMARY KEY,
        last_sequence BIGINT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS alpha_documents (
        collection TEXT NOT NULL,
        sequence BIGINT NOT NULL,
        document_id TEXT NOT NULL,
        body JSONB NOT NULL,
        committed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (collection, sequence),
        UNIQUE (collection, document_id)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS alpha_keyed_documents (
        collection TEXT NOT NULL,
        document_id TEXT NOT NULL,
        body JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (collection, document_id)
    )
    ",
];

/// Document store backed by a PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Connect using the database section of the configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "PostgreSQL connection pool initialized"
        );

        Ok(Self { pool })
    }

    /// Create a store with an existing pool
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the store tables if they do not exist
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn row_to_document(row: &sqlx::postgres::PgRow) -> Result<StoredDocument> {
        let sequence: i64 = row.try_get("sequence")?;
        let body: String = row.try_get("body")?;
        let committed_at: DateTime<Utc> = row.try_get("committed_at")?;
        Ok(StoredDocument {
            collection: row.try_get("collection")?,
            sequence: sequence as u64,
            document_id: row.try_get("document_id")?,
            body: serde_json::from_str(&body)?,
            committed_at,
        })
    }
}

fn write_error(e: sqlx::Error) -> AlphaError {
    AlphaError::StoreWrite(e.to_string())
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    #[instrument(skip(self, body))]
    async fn append(
        &self,
        collection: &str,
        document_id: &str,
        body: serde_json::Value,
    ) -> Result<u64> {
        let body = serde_json::to_string(&body)?;
        let mut tx = self.pool.begin().await.map_err(write_error)?;

        // Takes the collection row lock before the duplicate check so two
        // appends of the same id cannot both pass it.
        let next: i64 = sqlx::query_scalar(
            r"
            INSERT INTO alpha_collection_heads (collection, last_sequence)
            VALUES ($1, 1)
            ON CONFLICT (collection) DO UPDATE
                SET last_sequence = alpha_collection_heads.last_sequence + 1
            RETURNING last_sequence
            ",
        )
        .bind(collection)
        .fetch_one(&mut *tx)
        .await
        .map_err(write_error)?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT sequence FROM alpha_documents WHERE collection = $1 AND document_id = $2",
        )
        .bind(collection)
        .bind(document_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(write_error)?;

        if let Some(sequence) = existing {
            tx.rollback().await.map_err(write_error)?;
            debug!(sequence, "Document already present");
            return Ok(sequence as u64);
        }

        sqlx::query(
            r"
            INSERT INTO alpha_documents (collection, sequence, document_id, body)
            VALUES ($1, $2, $3, $4::jsonb)
            ",
        )
        .bind(collection)
        .bind(next)
        .bind(document_id)
        .bind(&body)
        .execute(&mut *tx)
        .await
        .map_err(write_error)?;

        tx.commit().await.map_err(write_error)?;
        Ok(next as u64)
    }

    async fn query_after(
        &self,
        collection: &str,
        after_sequence: u64,
        limit: usize,
    ) -> Result<Vec<StoredDocument>> {
        let rows = sqlx::query(
            r"
            SELECT collection, sequence, document_id, body::text AS body, committed_at
            FROM alpha_documents
            WHERE collection = $1 AND sequence > $2
            ORDER BY sequence ASC
            LIMIT $3
            ",
        )
        .bind(collection)
        .bind(after_sequence as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_document).collect()
    }

    async fn latest(&self, collection: &str) -> Result<Option<StoredDocument>> {
        let row = sqlx::query(
            r"
            SELECT collection, sequence, document_id, body::text AS body, committed_at
            FROM alpha_documents
            WHERE collection = $1
            ORDER BY sequence DESC
            LIMIT 1
            ",
        )
        .bind(collection)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn head_sequence(&self, collection: &str) -> Result<u64> {
        let head: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(sequence) FROM alpha_documents WHERE collection = $1",
        )
        .bind(collection)
        .fetch_one(&self.pool)
        .await?;

        Ok(head.unwrap_or(0) as u64)
    }

    async fn upsert(
        &self,
        collection: &str,
        document_id: &str,
        body: serde_json::Value,
    ) -> Result<()> {
        let body = serde_json::to_string(&body)?;
        sqlx::query(
            r"
            INSERT INTO alpha_keyed_documents (collection, document_id, body, updated_at)
            VALUES ($1, $2, $3::jsonb, NOW())
            ON CONFLICT (collection, document_id) DO UPDATE SET
                body = EXCLUDED.body,
                updated_at = NOW()
            ",
        )
        .bind(collection)
        .bind(document_id)
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(write_error)?;

        Ok(())
    }

    async fn fetch(&self, collection: &str, document_id: &str) -> Result<Option<serde_json::Value>> {
        let body: Option<String> = sqlx::query_scalar(
            "SELECT body::text FROM alpha_keyed_documents WHERE collection = $1 AND document_id = $2",
        )
        .bind(collection)
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        body.map(|b| serde_json::from_str(&b).map_err(AlphaError::from))
            .transpose()
    }
}
