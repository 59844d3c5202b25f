//! Market data records shared by collectors, store, and executors

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Collection holding keyed strategy state documents
pub const STRATEGY_STATE_COLLECTION: &str = "strategy-state";

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// One half of a quote as carried by a single feed message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteHalf {
    pub asset_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub exchange_timestamp: DateTime<Utc>,
}

/// Merged best-bid/best-offer record for one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub asset_id: String,
    pub bid_price: Decimal,
    pub bid_size: Decimal,
    pub ask_price: Decimal,
    pub ask_size: Decimal,
    /// Later of the two halves' exchange timestamps
    pub exchange_timestamp: DateTime<Utc>,
    pub received_timestamp: DateTime<Utc>,
}

impl Quote {
    /// Merge a bid half and an ask half into a complete quote
    pub fn from_halves(bid: &QuoteHalf, ask: &QuoteHalf, received_timestamp: DateTime<Utc>) -> Self {
        Self {
            asset_id: bid.asset_id.clone(),
            bid_price: bid.price,
            bid_size: bid.size,
            ask_price: ask.price,
            ask_size: ask.size,
            exchange_timestamp: bid.exchange_timestamp.max(ask.exchange_timestamp),
            received_timestamp,
        }
    }

    /// Store document id; identical quotes map to the same id
    pub fn document_id(&self) -> String {
        format!(
            "{}@{}",
            self.asset_id.to_lowercase(),
            self.exchange_timestamp.timestamp_nanos_opt().unwrap_or_default()
        )
    }

    pub fn midpoint(&self) -> Decimal {
        (self.bid_price + self.ask_price) / Decimal::from(2)
    }

    pub fn spread(&self) -> Decimal {
        self.ask_price - self.bid_price
    }
}

/// Order book granularity as understood by the exchange's book endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BookLevel {
    /// Best bid and ask only
    Best = 1,
    /// Top 50 aggregated levels
    Top50 = 2,
    /// Full non-aggregated book
    Full = 3,
}

impl BookLevel {
    pub const ALL: [BookLevel; 3] = [BookLevel::Best, BookLevel::Top50, BookLevel::Full];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Collection prefix for snapshots at this level
    pub fn collection_prefix(self) -> &'static str {
        match self {
            BookLevel::Best => "book-best",
            BookLevel::Top50 => "book-50",
            BookLevel::Full => "book-full",
        }
    }
}

impl TryFrom<u8> for BookLevel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(BookLevel::Best),
            2 => Ok(BookLevel::Top50),
            3 => Ok(BookLevel::Full),
            other => Err(format!("book level must be 1, 2 or 3, got {}", other)),
        }
    }
}

impl From<BookLevel> for u8 {
    fn from(level: BookLevel) -> Self {
        level.as_u8()
    }
}

impl std::fmt::Display for BookLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// A single row in a book snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookEntry {
    pub price: Decimal,
    pub size: Decimal,
    /// Aggregated order count (levels 1 and 2)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_orders: Option<u64>,
    /// Individual order id (level 3)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

impl BookEntry {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self {
            price,
            size,
            num_orders: None,
            order_id: None,
        }
    }
}

/// Depth-limited view of an order book at one granularity level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub asset_id: String,
    pub level: BookLevel,
    /// Bids sorted by price descending
    pub bids: Vec<BookEntry>,
    /// Asks sorted by price ascending
    pub asks: Vec<BookEntry>,
    /// Exchange-assigned book sequence
    #[serde(default)]
    pub exchange_sequence: u64,
    pub exchange_timestamp: DateTime<Utc>,
    pub received_timestamp: DateTime<Utc>,
}

impl BookSnapshot {
    pub fn best_bid(&self) -> Option<&BookEntry> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&BookEntry> {
        self.asks.first()
    }

    pub fn document_id(&self) -> String {
        format!(
            "{}:{}:{}",
            self.asset_id.to_lowercase(),
            self.level,
            self.exchange_sequence
        )
    }
}

/// Notification of a newly committed document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection_name: String,
    pub document_id: String,
    pub commit_sequence: u64,
}

/// Collection receiving merged quotes for an asset
pub fn quote_collection(asset_id: &str) -> String {
    format!("ticker.{}", asset_id.to_lowercase())
}

/// Collection receiving book snapshots for an asset at a level
pub fn book_collection(asset_id: &str, level: BookLevel) -> String {
    format!("{}.{}", level.collection_prefix(), asset_id.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn half(side: Side, price: Decimal, secs: i64) -> QuoteHalf {
        QuoteHalf {
            asset_id: "BTC-USD".to_string(),
            side,
            price,
            size: dec!(1),
            exchange_timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_quote_takes_later_timestamp() {
        let bid = half(Side::Buy, dec!(100), 10);
        let ask = half(Side::Sell, dec!(101), 12);
        let quote = Quote::from_halves(&bid, &ask, Utc::now());

        assert_eq!(quote.exchange_timestamp, Utc.timestamp_opt(12, 0).unwrap());
        assert_eq!(quote.midpoint(), dec!(100.5));
        assert_eq!(quote.spread(), dec!(1));
    }

    #[test]
    fn test_book_level_serde() {
        assert_eq!(serde_json::to_string(&BookLevel::Top50).unwrap(), "2");
        let level: BookLevel = serde_json::from_str("3").unwrap();
        assert_eq!(level, BookLevel::Full);
        assert!(serde_json::from_str::<BookLevel>("4").is_err());
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(quote_collection("BTC-USD"), "ticker.btc-usd");
        assert_eq!(book_collection("ETH-USD", BookLevel::Best), "book-best.eth-usd");
        assert_eq!(book_collection("ETH-USD", BookLevel::Full), "book-full.eth-usd");
    }
}
