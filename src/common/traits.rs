//! Trait definitions for the exchange-facing collaborators

use async_trait::async_trait;

use super::errors::Result;
use super::types::{BookLevel, BookSnapshot};
use crate::strategy::{OrderIntent, OrderOutcome};

/// Push feed delivering quote half messages
///
/// The StreamCollector owns exactly one feed and drives it from a single
/// task, so implementations need not be shareable.
#[async_trait]
pub trait QuoteFeed: Send {
    /// Open the connection and subscribe to the given assets
    ///
    /// Called again after a disconnect; implementations must drop any
    /// previous connection first.
    async fn connect(&mut self, asset_ids: &[String]) -> Result<()>;

    /// Next text frame from the feed
    ///
    /// Returns `Ok(None)` when the server closed the stream and an error on
    /// transport failure. Both mean the caller must reconnect.
    async fn next_frame(&mut self) -> Result<Option<String>>;

    /// Gracefully close the connection
    async fn close(&mut self) -> Result<()>;

    /// Get the name of the feed for logging
    fn feed_name(&self) -> &'static str;
}

/// Pull API returning order book snapshots
#[async_trait]
pub trait BookSource: Send + Sync {
    /// Fetch a book snapshot for one asset at one granularity level
    async fn fetch_book(&self, asset_id: &str, level: BookLevel) -> Result<BookSnapshot>;
}

/// Order submission and reconciliation
///
/// Errors of kind [`AlphaError::Gateway`](super::errors::AlphaError::Gateway)
/// with `recoverable: true` mean the outcome of the call is unknown.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Submit an order; the intent's `client_order_id` identifies it afterwards
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderOutcome>;

    /// Look up an order by client order id
    async fn order_status(&self, client_order_id: &str) -> Result<OrderOutcome>;

    /// Cancel an open order by client order id
    async fn cancel(&self, client_order_id: &str) -> Result<()>;

    /// Get the name of the gateway for logging
    fn gateway_name(&self) -> &'static str;
}

/// Outbound operator alerts
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one alert
    async fn notify(&self, title: &str, message: &str) -> Result<()>;
}
