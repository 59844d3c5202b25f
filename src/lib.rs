//! CoinbaseAlpha Library
//!
//! Collects Coinbase Exchange quotes and order book snapshots into a
//! sequenced document store and drives one trading strategy state machine
//! per portfolio from the committed data.

pub mod coinbase;
pub mod common;
pub mod config;
pub mod pipeline;
pub mod store;
pub mod strategy;

// Re-export commonly used types
pub use coinbase::{CoinbaseFeedClient, CoinbaseOrderGateway, CoinbaseRestClient};
pub use common::errors::{AlphaError, Result};
pub use common::alerts::{AlertDispatcher, WebhookNotifier};
pub use common::traits::{BookSource, Notifier, OrderGateway, QuoteFeed};
pub use common::types::{
    BookEntry, BookLevel, BookSnapshot, ChangeEvent, Quote, QuoteHalf, Side,
};
pub use config::types::AppConfig;
pub use pipeline::{ChangeWatcher, CollectorStats, PollCollector, RateGate, StreamCollector};
pub use store::{DocumentStore, InMemoryStore, PgDocumentStore, StoredDocument};

// Strategy types
pub use strategy::{
    BoxedStrategy, Decision, ExecutorFactory, ExecutorHandle, MarketView, OrderIntent,
    OrderOutcome, PaperGateway, StrategyExecutor, StrategyPhase, StrategyState, Strategy,
    TargetPriceStrategy, TradeIntent,
};
