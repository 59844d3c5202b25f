//! Coinbase Exchange wire message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// WebSocket channels used by the feed client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedChannel {
    Ticker,
    Heartbeat,
}

/// Subscribe message for the WebSocket feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsSubscribeMessage {
    /// Always "subscribe" or "unsubscribe"
    #[serde(rename = "type")]
    pub message_type: String,
    pub product_ids: Vec<String>,
    pub channels: Vec<FeedChannel>,
}

impl WsSubscribeMessage {
    pub fn subscribe(product_ids: &[String]) -> Self {
        Self {
            message_type: "subscribe".to_string(),
            product_ids: product_ids.to_vec(),
            channels: vec![FeedChannel::Ticker, FeedChannel::Heartbeat],
        }
    }
}

/// Ticker channel message
///
/// Decimal fields arrive as strings and are parsed by the feed client so a
/// bad number is reported as a malformed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerEvent {
    pub product_id: String,
    #[serde(default)]
    pub sequence: Option<u64>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub best_bid: Option<String>,
    #[serde(default)]
    pub best_bid_size: Option<String>,
    #[serde(default)]
    pub best_ask: Option<String>,
    #[serde(default)]
    pub best_ask_size: Option<String>,
    /// Taker side; absent on the snapshot tick sent right after subscribing
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub last_size: Option<String>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

/// Error message pushed by the feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedErrorEvent {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Order book response from `GET /products/{id}/book`
///
/// Rows are `[price, size, num_orders]` for levels 1-2 and
/// `[price, size, order_id]` for level 3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookResponse {
    #[serde(default)]
    pub sequence: u64,
    pub bids: Vec<(String, String, serde_json::Value)>,
    pub asks: Vec<(String, String, serde_json::Value)>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

/// Order placement request for `POST /orders`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderRequest {
    pub client_oid: String,
    pub product_id: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

/// Order as returned by the orders endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    #[serde(default)]
    pub client_oid: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    /// open, pending, active, done or rejected
    pub status: String,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub reject_reason: Option<String>,
    #[serde(default)]
    pub filled_size: Option<String>,
    #[serde(default)]
    pub executed_value: Option<String>,
    #[serde(default)]
    pub settled: bool,
}

/// Error body returned by the REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub message: String,
}
