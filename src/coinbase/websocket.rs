//! WebSocket client for the Coinbase Exchange ticker feed

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, instrument, warn};

use super::messages::*;
use crate::common::errors::{AlphaError, Result};
use crate::common::traits::QuoteFeed;
use crate::common::types::{QuoteHalf, Side};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A decoded feed frame
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Ticker update carrying one side of the top of book
    Half(QuoteHalf),
    /// Ticker without a taker side (initial snapshot tick)
    Snapshot { product_id: String },
    Heartbeat,
    Subscriptions,
    /// Error reported by the feed
    Error(String),
    /// Any other message type
    Other(String),
}

/// Decode a feed text frame
///
/// A `buy` taker side lifts the bid half of the quote, a `sell` taker side the
/// ask half. Invalid JSON or unparseable numbers yield
/// [`AlphaError::MalformedMessage`].
pub fn parse_feed_message(text: &str) -> Result<FeedMessage> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| AlphaError::MalformedMessage(format!("invalid JSON: {}", e)))?;

    let message_type = value
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AlphaError::MalformedMessage("missing type field".to_string()))?
        .to_string();

    match message_type.as_str() {
        "ticker" => {
            let ticker: TickerEvent = serde_json::from_value(value)
                .map_err(|e| AlphaError::MalformedMessage(format!("bad ticker: {}", e)))?;
            convert_ticker(ticker)
        }
        "heartbeat" => Ok(FeedMessage::Heartbeat),
        "subscriptions" => Ok(FeedMessage::Subscriptions),
        "error" => {
            let error: FeedErrorEvent = serde_json::from_value(value)?;
            let detail = match error.reason {
                Some(reason) => format!("{}: {}", error.message, reason),
                None => error.message,
            };
            Ok(FeedMessage::Error(detail))
        }
        _ => Ok(FeedMessage::Other(message_type)),
    }
}

fn convert_ticker(ticker: TickerEvent) -> Result<FeedMessage> {
    let side = match ticker.side.as_deref() {
        Some("buy") => Side::Buy,
        Some("sell") => Side::Sell,
        Some(other) => {
            return Err(AlphaError::MalformedMessage(format!(
                "unknown side '{}'",
                other
            )))
        }
        None => {
            return Ok(FeedMessage::Snapshot {
                product_id: ticker.product_id,
            })
        }
    };

    let (price, size) = match side {
        Side::Buy => (ticker.best_bid.as_ref(), ticker.best_bid_size.as_ref()),
        Side::Sell => (ticker.best_ask.as_ref(), ticker.best_ask_size.as_ref()),
    };
    let price = price.or(ticker.price.as_ref());
    let size = size.or(ticker.last_size.as_ref());

    let exchange_timestamp = ticker
        .time
        .ok_or_else(|| AlphaError::MalformedMessage("ticker without time".to_string()))?;

    Ok(FeedMessage::Half(QuoteHalf {
        asset_id: ticker.product_id.to_uppercase(),
        side,
        price: parse_decimal("price", price)?,
        size: parse_decimal("size", size)?,
        exchange_timestamp,
    }))
}

fn parse_decimal(field: &str, raw: Option<&String>) -> Result<Decimal> {
    let raw = raw.ok_or_else(|| AlphaError::MalformedMessage(format!("missing {}", field)))?;
    raw.parse()
        .map_err(|e| AlphaError::MalformedMessage(format!("invalid {} '{}': {}", field, raw, e)))
}

/// WebSocket client for the ticker feed
pub struct CoinbaseFeedClient {
    /// WebSocket URL
    url: String,
    stream: Option<WsStream>,
}

impl CoinbaseFeedClient {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            stream: None,
        }
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[async_trait]
impl QuoteFeed for CoinbaseFeedClient {
    #[instrument(skip(self))]
    async fn connect(&mut self, asset_ids: &[String]) -> Result<()> {
        if let Some(mut previous) = self.stream.take() {
            let _ = previous.close(None).await;
        }

        info!("Connecting to Coinbase WebSocket: {}", self.url);
        let (mut ws_stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| AlphaError::WebSocketConnection(e.to_string()))?;

        let subscribe_msg = WsSubscribeMessage::subscribe(asset_ids);
        let msg_json = serde_json::to_string(&subscribe_msg)?;
        debug!("Sending subscription message: {}", msg_json);
        ws_stream.send(Message::Text(msg_json)).await?;

        info!(assets = asset_ids.len(), "WebSocket connection established");
        self.stream = Some(ws_stream);
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<String>> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(AlphaError::WebSocketConnection("not connected".to_string()));
        };

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Ping(data))) => {
                    debug!("Received Ping, sending Pong");
                    stream.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("WebSocket closed: {:?}", frame);
                    self.stream = None;
                    return Ok(None);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    self.stream = None;
                    return Err(e.into());
                }
                None => {
                    info!("WebSocket stream ended");
                    self.stream = None;
                    return Ok(None);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.close(None).await?;
        }
        Ok(())
    }

    fn feed_name(&self) -> &'static str {
        "coinbase-ticker"
    }
}
