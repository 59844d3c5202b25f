//! Common test utilities and fixtures
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use coinbase_alpha::common::backoff::BackoffConfig;
use coinbase_alpha::common::errors::{AlphaError, Result};
use coinbase_alpha::config::types::{
    PortfolioConfig, StrategyConfig, StreamConfig, TradeMode,
};
use coinbase_alpha::strategy::OrderIntent;
use coinbase_alpha::{
    BookEntry, BookLevel, BookSnapshot, BookSource, Notifier, OrderGateway, OrderOutcome, Quote,
    QuoteFeed, Side,
};

/// Fixed base time so document ids are reproducible
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap()
}

pub fn at_ms(offset_ms: i64) -> DateTime<Utc> {
    base_time() + chrono::Duration::milliseconds(offset_ms)
}

/// Fast, jitter-free backoff for tests
pub fn quick_backoff(attempts: u32) -> BackoffConfig {
    BackoffConfig::new(Duration::from_millis(10), Duration::from_millis(10), attempts).without_jitter()
}

// ============================================================================
// Feed frames
// ============================================================================

/// Ticker frame; `buy` carries the bid half, `sell` the ask half
pub fn ticker_frame(product: &str, side: Side, price: Decimal, offset_ms: i64) -> String {
    let (bid, ask) = match side {
        Side::Buy => (price, price + dec!(0.01)),
        Side::Sell => (price - dec!(0.01), price),
    };
    serde_json::json!({
        "type": "ticker",
        "sequence": 1000 + offset_ms,
        "product_id": product,
        "price": price.to_string(),
        "best_bid": bid.to_string(),
        "best_bid_size": "0.5",
        "best_ask": ask.to_string(),
        "best_ask_size": "0.25",
        "side": side.to_string(),
        "last_size": "0.01",
        "time": at_ms(offset_ms).to_rfc3339(),
    })
    .to_string()
}

pub fn bid_frame(product: &str, price: Decimal, offset_ms: i64) -> String {
    ticker_frame(product, Side::Buy, price, offset_ms)
}

pub fn ask_frame(product: &str, price: Decimal, offset_ms: i64) -> String {
    ticker_frame(product, Side::Sell, price, offset_ms)
}

pub const HEARTBEAT_FRAME: &str =
    r#"{"type":"heartbeat","sequence":90,"last_trade_id":20,"product_id":"BTC-USD","time":"2024-01-02T12:00:00.000000Z"}"#;

pub const MALFORMED_FRAME: &str = r#"{"type":"ticker","product_id":"BTC-USD","side":"buy""#;

// ============================================================================
// Scripted feed
// ============================================================================

/// One connection's worth of frames
#[derive(Debug, Clone)]
pub struct FeedSession {
    pub frames: Vec<String>,
    /// Close the stream after the frames; otherwise stay silent forever
    pub disconnect: bool,
}

impl FeedSession {
    pub fn then_disconnect(frames: Vec<String>) -> Self {
        Self {
            frames,
            disconnect: true,
        }
    }

    pub fn then_idle(frames: Vec<String>) -> Self {
        Self {
            frames,
            disconnect: false,
        }
    }
}

/// Feed replaying scripted sessions, one per connect
pub struct ScriptedFeed {
    sessions: VecDeque<FeedSession>,
    current: VecDeque<String>,
    disconnect: bool,
    connects: Arc<AtomicUsize>,
}

impl ScriptedFeed {
    pub fn new(sessions: Vec<FeedSession>) -> Self {
        Self {
            sessions: sessions.into(),
            current: VecDeque::new(),
            disconnect: false,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn connect_counter(&self) -> Arc<AtomicUsize> {
        self.connects.clone()
    }
}

#[async_trait]
impl QuoteFeed for ScriptedFeed {
    async fn connect(&mut self, _asset_ids: &[String]) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.sessions.pop_front() {
            Some(session) => {
                self.current = session.frames.into();
                self.disconnect = session.disconnect;
                Ok(())
            }
            None => Err(AlphaError::WebSocketConnection("no more sessions".to_string())),
        }
    }

    async fn next_frame(&mut self) -> Result<Option<String>> {
        if let Some(frame) = self.current.pop_front() {
            return Ok(Some(frame));
        }
        if self.disconnect {
            return Ok(None);
        }
        std::future::pending().await
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn feed_name(&self) -> &'static str {
        "scripted"
    }
}

// ============================================================================
// Book source
// ============================================================================

/// Book source answering with a fresh exchange sequence per call
#[derive(Default)]
pub struct FakeBookSource {
    sequence: AtomicU64,
    /// Errors returned, in order, before any snapshot
    failures: Mutex<VecDeque<AlphaError>>,
    calls: Mutex<HashMap<(String, BookLevel), usize>>,
    /// Keep returning the same exchange sequence
    frozen: bool,
}

impl FakeBookSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frozen() -> Self {
        Self {
            frozen: true,
            ..Self::default()
        }
    }

    pub fn failing_first(errors: Vec<AlphaError>) -> Self {
        Self {
            failures: Mutex::new(errors.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self, asset: &str, level: BookLevel) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&(asset.to_string(), level))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl BookSource for FakeBookSource {
    async fn fetch_book(&self, asset_id: &str, level: BookLevel) -> Result<BookSnapshot> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry((asset_id.to_string(), level))
            .or_insert(0) += 1;

        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let sequence = if self.frozen {
            1
        } else {
            self.sequence.fetch_add(1, Ordering::SeqCst) + 1
        };
        Ok(sample_book(asset_id, level, sequence, dec!(100.00), dec!(100.05)))
    }
}

pub fn sample_book(
    asset: &str,
    level: BookLevel,
    sequence: u64,
    bid: Decimal,
    ask: Decimal,
) -> BookSnapshot {
    BookSnapshot {
        asset_id: asset.to_string(),
        level,
        bids: vec![BookEntry::new(bid, dec!(1.5)), BookEntry::new(bid - dec!(0.05), dec!(3))],
        asks: vec![BookEntry::new(ask, dec!(0.8)), BookEntry::new(ask + dec!(0.05), dec!(2))],
        exchange_sequence: sequence,
        exchange_timestamp: base_time(),
        received_timestamp: Utc::now(),
    }
}

// ============================================================================
// Order gateway
// ============================================================================

/// Gateway replaying scripted status answers and recording every call
#[derive(Default)]
pub struct ScriptedGateway {
    submissions: Mutex<VecDeque<Result<OrderOutcome>>>,
    statuses: Mutex<VecDeque<Result<OrderOutcome>>>,
    pub submitted: Mutex<Vec<OrderIntent>>,
    pub status_queries: Mutex<Vec<String>>,
    pub cancels: Mutex<Vec<String>>,
    resting: bool,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_submit(self, outcome: Result<OrderOutcome>) -> Self {
        self.submissions.lock().unwrap().push_back(outcome);
        self
    }

    pub fn on_status(self, outcome: Result<OrderOutcome>) -> Self {
        self.statuses.lock().unwrap().push_back(outcome);
        self
    }

    /// Once the script runs out, every order rests open on the book
    pub fn resting(mut self) -> Self {
        self.resting = true;
        self
    }

    fn unscripted(&self) -> Result<OrderOutcome> {
        if self.resting {
            Ok(OrderOutcome::Open {
                exchange_order_id: "resting".to_string(),
            })
        } else {
            Ok(OrderOutcome::NotFound)
        }
    }

    pub fn submit_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl OrderGateway for ScriptedGateway {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderOutcome> {
        self.submitted.lock().unwrap().push(intent.clone());
        self.submissions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.unscripted())
    }

    async fn order_status(&self, client_order_id: &str) -> Result<OrderOutcome> {
        self.status_queries
            .lock()
            .unwrap()
            .push(client_order_id.to_string());
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.unscripted())
    }

    async fn cancel(&self, client_order_id: &str) -> Result<()> {
        self.cancels.lock().unwrap().push(client_order_id.to_string());
        Ok(())
    }

    fn gateway_name(&self) -> &'static str {
        "scripted"
    }
}

// ============================================================================
// Alerts
// ============================================================================

/// Notifier keeping every alert it is handed
#[derive(Default)]
pub struct RecordingNotifier {
    pub alerts: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .map(|(title, _)| title.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<()> {
        self.alerts
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
        Ok(())
    }
}

// ============================================================================
// Records and configuration
// ============================================================================

pub fn sample_quote(asset: &str, bid: Decimal, ask: Decimal, offset_ms: i64) -> Quote {
    Quote {
        asset_id: asset.to_string(),
        bid_price: bid,
        bid_size: dec!(1),
        ask_price: ask,
        ask_size: dec!(1),
        exchange_timestamp: at_ms(offset_ms),
        received_timestamp: at_ms(offset_ms + 5),
    }
}

pub fn stream_config(assets: &[&str], quote_interval_ms: u64) -> StreamConfig {
    StreamConfig {
        assets: assets.iter().map(|a| a.to_string()).collect(),
        quote_interval_ms,
        interval_overrides_ms: HashMap::new(),
        reconnect: quick_backoff(0),
        store_retry: quick_backoff(2),
    }
}

/// Buy when the ask drops 1% under the reference, sell 1% over the entry
pub fn strategy_config(reference_price: Option<Decimal>) -> StrategyConfig {
    StrategyConfig {
        tolerance: dec!(0.01),
        upside_factor: Decimal::ONE,
        downside_factor: Decimal::ONE,
        start_mode: Side::Buy,
        reference_price,
        size: dec!(0.5),
    }
}

pub fn paper_portfolio(id: &str, asset: &str) -> PortfolioConfig {
    PortfolioConfig {
        id: id.to_string(),
        asset: asset.to_string(),
        trade_mode: TradeMode::Paper,
        strategy: strategy_config(Some(dec!(100))),
    }
}

/// Sample configuration file
pub const CONFIG_TOML: &str = r#"
[stream]
assets = ["BTC-USD", "ETH-USD"]
quote_interval_ms = 1000

[stream.interval_overrides_ms]
ETH-USD = 500

[[poll.schedules]]
asset = "BTC-USD"
level = 1
interval_ms = 5000

[[poll.schedules]]
asset = "BTC-USD"
level = 2
interval_ms = 30000

[[portfolios]]
id = "btc-paper"
asset = "BTC-USD"
trade_mode = "paper"

[portfolios.strategy]
tolerance = "0.002"
size = "0.01"
start_mode = "buy"
reference_price = "42000"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use coinbase_alpha::coinbase::{parse_feed_message, FeedMessage};

    #[test]
    fn test_ticker_frame_parses_as_half() {
        match parse_feed_message(&bid_frame("btc-usd", dec!(100), 0)).unwrap() {
            FeedMessage::Half(half) => {
                assert_eq!(half.asset_id, "BTC-USD");
                assert_eq!(half.side, Side::Buy);
                assert_eq!(half.price, dec!(100));
            }
            other => panic!("expected a half, got {:?}", other),
        }
    }

    #[test]
    fn test_sample_book() {
        let book = sample_book("BTC-USD", BookLevel::Top50, 7, dec!(100), dec!(101));
        assert_eq!(book.best_bid().unwrap().price, dec!(100));
        assert_eq!(book.best_ask().unwrap().price, dec!(101));
        assert_eq!(book.document_id(), "btc-usd:2:7");
    }
}
