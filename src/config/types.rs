//! Configuration types

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::backoff::BackoffConfig;
use crate::common::errors::{AlphaError, Result};
use crate::common::types::{BookLevel, Side};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Coinbase endpoints and credentials
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Database configuration (optional, in-memory store when absent)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Streaming quote collector
    pub stream: StreamConfig,
    /// Polling book collector
    #[serde(default)]
    pub poll: PollConfig,
    /// Change watcher tuning
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Strategy executor tuning
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Portfolio to strategy bindings
    #[serde(default)]
    pub portfolios: Vec<PortfolioConfig>,
    /// Operator alerts
    #[serde(default)]
    pub alerts: AlertsConfig,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
}

/// Where operator alerts go; nothing is sent without a webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Endpoint receiving a JSON POST per alert
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Delivery timeout in seconds
    #[serde(default = "default_alert_timeout")]
    pub timeout_seconds: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_seconds: default_alert_timeout(),
        }
    }
}

impl AlertsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_alert_timeout() -> u64 {
    5
}

impl AppConfig {
    /// Check every startup invariant; the only place configuration errors surface
    pub fn validate(&self) -> Result<()> {
        if self.stream.assets.is_empty() {
            return Err(AlphaError::Configuration(
                "stream.assets must name at least one asset".to_string(),
            ));
        }
        if self.stream.quote_interval_ms == 0 {
            return Err(AlphaError::Configuration(
                "stream.quote_interval_ms must be positive".to_string(),
            ));
        }
        for (asset, interval) in &self.stream.interval_overrides_ms {
            if *interval == 0 {
                return Err(AlphaError::Configuration(format!(
                    "stream.interval_overrides_ms.{} must be positive",
                    asset
                )));
            }
        }

        let mut pairs = HashSet::new();
        for schedule in &self.poll.schedules {
            if schedule.interval_ms == 0 {
                return Err(AlphaError::Configuration(format!(
                    "poll interval for {} level {} must be positive",
                    schedule.asset, schedule.level
                )));
            }
            if !pairs.insert((schedule.asset.to_uppercase(), schedule.level)) {
                return Err(AlphaError::Configuration(format!(
                    "duplicate poll schedule for {} level {}",
                    schedule.asset, schedule.level
                )));
            }
        }

        if self.portfolios.is_empty() {
            return Err(AlphaError::Configuration(
                "at least one portfolio binding is required".to_string(),
            ));
        }
        let mut ids = HashSet::new();
        for portfolio in &self.portfolios {
            if portfolio.id.trim().is_empty() {
                return Err(AlphaError::Configuration(
                    "portfolio id must not be empty".to_string(),
                ));
            }
            if !ids.insert(portfolio.id.as_str()) {
                return Err(AlphaError::Configuration(format!(
                    "duplicate portfolio id {}",
                    portfolio.id
                )));
            }
            if !self
                .stream
                .assets
                .iter()
                .any(|a| a.eq_ignore_ascii_case(&portfolio.asset))
            {
                return Err(AlphaError::Configuration(format!(
                    "portfolio {} trades {} which is not in stream.assets",
                    portfolio.id, portfolio.asset
                )));
            }
            if portfolio.strategy.size <= Decimal::ZERO {
                return Err(AlphaError::Configuration(format!(
                    "portfolio {} strategy.size must be positive",
                    portfolio.id
                )));
            }
            if portfolio.strategy.tolerance < Decimal::ZERO {
                return Err(AlphaError::Configuration(format!(
                    "portfolio {} strategy.tolerance must not be negative",
                    portfolio.id
                )));
            }
            if portfolio.trade_mode == TradeMode::Live && self.exchange.credentials().is_none() {
                return Err(AlphaError::Configuration(format!(
                    "portfolio {} trades live but exchange credentials are missing",
                    portfolio.id
                )));
            }
        }

        if let Some(url) = &self.alerts.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(AlphaError::Configuration(format!(
                    "alerts.webhook_url must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }

        Ok(())
    }
}

/// Coinbase Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// API key for authenticated requests
    #[serde(default)]
    pub api_key: Option<String>,
    /// API secret for signing requests (base64)
    #[serde(default)]
    pub api_secret: Option<String>,
    /// API passphrase
    #[serde(default)]
    pub api_passphrase: Option<String>,
    /// Base URL for the REST API
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    /// WebSocket URL for the ticker feed
    #[serde(default = "default_ws_url")]
    pub websocket_url: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            api_passphrase: None,
            rest_url: default_rest_url(),
            websocket_url: default_ws_url(),
        }
    }
}

impl ExchangeConfig {
    /// Credentials when all three parts are present
    pub fn credentials(&self) -> Option<ApiCredentials> {
        match (&self.api_key, &self.api_secret, &self.api_passphrase) {
            (Some(key), Some(secret), Some(passphrase)) => Some(ApiCredentials::new(
                key.clone(),
                secret.clone(),
                passphrase.clone(),
            )),
            _ => None,
        }
    }
}

fn default_rest_url() -> String {
    "https://api.exchange.coinbase.com".to_string()
}

fn default_ws_url() -> String {
    "wss://ws-feed.exchange.coinbase.com".to_string()
}

/// Database configuration for the document store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_connection_timeout() -> u64 {
    30
}

/// Streaming quote collector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Assets (product ids) to subscribe to
    pub assets: Vec<String>,
    /// Minimum interval between persisted quotes per asset
    #[serde(default = "default_quote_interval")]
    pub quote_interval_ms: u64,
    /// Per-asset overrides of `quote_interval_ms`
    #[serde(default)]
    pub interval_overrides_ms: HashMap<String, u64>,
    /// Reconnect schedule after the feed drops
    #[serde(default = "default_reconnect")]
    pub reconnect: BackoffConfig,
    /// Retries for a failed quote append
    #[serde(default = "default_store_retry")]
    pub store_retry: BackoffConfig,
}

impl StreamConfig {
    pub fn quote_interval(&self) -> Duration {
        Duration::from_millis(self.quote_interval_ms)
    }

    pub fn interval_overrides(&self) -> HashMap<String, Duration> {
        self.interval_overrides_ms
            .iter()
            .map(|(asset, ms)| (asset.clone(), Duration::from_millis(*ms)))
            .collect()
    }
}

fn default_quote_interval() -> u64 {
    1000
}

fn default_reconnect() -> BackoffConfig {
    BackoffConfig::new(Duration::from_secs(1), Duration::from_secs(60), 0)
}

fn default_store_retry() -> BackoffConfig {
    BackoffConfig::new(Duration::from_millis(100), Duration::from_secs(2), 3)
}

/// Polling book collector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// One entry per (asset, level) pair
    #[serde(default)]
    pub schedules: Vec<PollSchedule>,
    /// Retries for a failed snapshot fetch before waiting for the next tick
    #[serde(default = "default_fetch_retry")]
    pub retry: BackoffConfig,
    /// Retries for a failed snapshot append
    #[serde(default = "default_store_retry")]
    pub store_retry: BackoffConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            schedules: Vec::new(),
            retry: default_fetch_retry(),
            store_retry: default_store_retry(),
        }
    }
}

fn default_fetch_retry() -> BackoffConfig {
    BackoffConfig::new(Duration::from_millis(250), Duration::from_secs(4), 3)
}

/// Polling frequency for one (asset, level) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSchedule {
    pub asset: String,
    pub level: BookLevel,
    pub interval_ms: u64,
}

impl PollSchedule {
    pub fn new(asset: impl Into<String>, level: BookLevel, interval: Duration) -> Self {
        Self {
            asset: asset.into(),
            level,
            interval_ms: interval.as_millis() as u64,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Change watcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// How often each watched collection is polled
    #[serde(default = "default_watch_interval")]
    pub poll_interval_ms: u64,
    /// Maximum documents fetched per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_watch_interval(),
            batch_size: default_batch_size(),
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_watch_interval() -> u64 {
    250
}

fn default_batch_size() -> usize {
    500
}

/// Strategy executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Capacity of each executor's pending change event queue
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Delay between order status checks while an order is open
    #[serde(default = "default_status_poll")]
    pub status_poll_interval_ms: u64,
    /// Cancel an order still open after this long
    #[serde(default = "default_order_timeout")]
    pub order_timeout_secs: u64,
    /// Status query retries when the outcome of a call is unknown
    #[serde(default = "default_reconcile")]
    pub reconcile: BackoffConfig,
    /// Retries for persisting a phase transition
    #[serde(default = "default_store_retry")]
    pub store_retry: BackoffConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            status_poll_interval_ms: default_status_poll(),
            order_timeout_secs: default_order_timeout(),
            reconcile: default_reconcile(),
            store_retry: default_store_retry(),
        }
    }
}

impl ExecutorConfig {
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.order_timeout_secs)
    }
}

fn default_queue_size() -> usize {
    1000
}

fn default_status_poll() -> u64 {
    1000
}

fn default_order_timeout() -> u64 {
    60
}

fn default_reconcile() -> BackoffConfig {
    BackoffConfig::new(Duration::from_millis(500), Duration::from_secs(10), 5)
}

/// Where orders for a portfolio go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    /// Simulated fills, no exchange orders
    #[default]
    Paper,
    /// Real orders through the authenticated REST API
    Live,
}

/// One portfolio bound to one strategy instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioConfig {
    pub id: String,
    /// Product id traded by this portfolio
    pub asset: String,
    #[serde(default)]
    pub trade_mode: TradeMode,
    pub strategy: StrategyConfig,
}

/// Parameters of the target-price strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Fractional move required before trading (0.001 = 0.1%)
    #[serde(default = "default_tolerance")]
    pub tolerance: Decimal,
    /// Multiplier on `tolerance` for the sell target
    #[serde(default = "default_factor")]
    pub upside_factor: Decimal,
    /// Multiplier on `tolerance` for the buy target
    #[serde(default = "default_factor")]
    pub downside_factor: Decimal,
    /// Side of the first trade when the portfolio has no history
    #[serde(default = "default_start_mode")]
    pub start_mode: Side,
    /// Price anchoring the first trade; the first observed price when absent
    #[serde(default)]
    pub reference_price: Option<Decimal>,
    /// Order size in base currency
    pub size: Decimal,
}

fn default_tolerance() -> Decimal {
    Decimal::new(1, 3)
}

fn default_factor() -> Decimal {
    Decimal::ONE
}

fn default_start_mode() -> Side {
    Side::Buy
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// API credentials for authenticated requests
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
}

impl ApiCredentials {
    pub fn new(api_key: String, api_secret: String, passphrase: String) -> Self {
        Self {
            api_key,
            api_secret,
            passphrase,
        }
    }
}
