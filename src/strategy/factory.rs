//! Builds one executor per configured portfolio and wires its event queue

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::coinbase::{CoinbaseOrderGateway, CoinbaseRestClient};
use crate::common::channels::create_change_channel;
use crate::common::errors::{AlphaError, Result};
use crate::common::traits::OrderGateway;
use crate::common::types::ChangeEvent;
use crate::config::types::{AppConfig, ExecutorConfig, PortfolioConfig, TradeMode, WatcherConfig};
use crate::pipeline::ChangeWatcher;
use crate::store::DocumentStore;
use crate::strategy::executor::StrategyExecutor;
use crate::strategy::paper::PaperGateway;
use crate::strategy::target_price::TargetPriceStrategy;

/// An executor together with the receiving end of its event queue
pub struct ExecutorHandle {
    pub executor: StrategyExecutor,
    pub events: mpsc::Receiver<ChangeEvent>,
}

pub struct ExecutorFactory {
    store: Arc<dyn DocumentStore>,
    executor_config: ExecutorConfig,
    live_gateway: Option<Arc<dyn OrderGateway>>,
    paper_gateway: Arc<dyn OrderGateway>,
    cancel: CancellationToken,
}

impl ExecutorFactory {
    pub fn new(store: Arc<dyn DocumentStore>, executor_config: ExecutorConfig) -> Self {
        Self {
            store,
            executor_config,
            live_gateway: None,
            paper_gateway: Arc::new(PaperGateway::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Factory for the application configuration, with a live gateway when credentials exist
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn DocumentStore>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut factory = Self::new(store, config.executor.clone()).with_cancellation(cancel);

        if let Some(credentials) = config.exchange.credentials() {
            let rest = CoinbaseRestClient::with_timeout(
                &config.exchange.rest_url,
                std::time::Duration::from_secs(config.settings.request_timeout_seconds),
            )?
            .with_credentials(credentials);
            factory = factory.with_live_gateway(Arc::new(CoinbaseOrderGateway::new(rest)?));
        }
        Ok(factory)
    }

    pub fn with_live_gateway(mut self, gateway: Arc<dyn OrderGateway>) -> Self {
        self.live_gateway = Some(gateway);
        self
    }

    pub fn with_paper_gateway(mut self, gateway: Arc<dyn OrderGateway>) -> Self {
        self.paper_gateway = gateway;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn gateway_for(&self, portfolio: &PortfolioConfig) -> Result<Arc<dyn OrderGateway>> {
        match portfolio.trade_mode {
            TradeMode::Paper => Ok(self.paper_gateway.clone()),
            TradeMode::Live => self.live_gateway.clone().ok_or_else(|| {
                AlphaError::Configuration(format!(
                    "portfolio '{}' trades live but no live gateway is configured",
                    portfolio.id
                ))
            }),
        }
    }

    /// Build and restore the executor for one portfolio
    pub async fn build(&self, portfolio: &PortfolioConfig) -> Result<StrategyExecutor> {
        let gateway = self.gateway_for(portfolio)?;
        let strategy = Box::new(TargetPriceStrategy::new(&portfolio.strategy));

        info!(
            portfolio = %portfolio.id,
            asset = %portfolio.asset,
            gateway = gateway.gateway_name(),
            "Building strategy executor"
        );

        let executor = StrategyExecutor::restore(
            portfolio.clone(),
            self.executor_config.clone(),
            self.store.clone(),
            gateway,
            strategy,
        )
        .await?;
        Ok(executor.with_cancellation(self.cancel.clone()))
    }

    /// Build one executor per portfolio
    pub async fn build_all(&self, portfolios: &[PortfolioConfig]) -> Result<Vec<StrategyExecutor>> {
        let mut executors = Vec::with_capacity(portfolios.len());
        for portfolio in portfolios {
            executors.push(self.build(portfolio).await?);
        }
        Ok(executors)
    }

    /// Create one watcher per watched collection and subscribe the executors
    ///
    /// Each executor resumes after the last sequence it evaluated in that
    /// collection; one with no history starts at the current head.
    pub async fn wire(
        &self,
        executors: Vec<StrategyExecutor>,
        watcher_config: &WatcherConfig,
    ) -> Result<(Vec<ChangeWatcher>, Vec<ExecutorHandle>)> {
        let mut watchers: BTreeMap<String, ChangeWatcher> = BTreeMap::new();
        let mut handles = Vec::with_capacity(executors.len());

        for executor in executors {
            let (tx, rx) = create_change_channel(self.executor_config.queue_size);
            for collection in executor.watched_collections() {
                let start = match executor.resume_sequence(collection) {
                    Some(sequence) => sequence,
                    None => self.store.head_sequence(collection).await?,
                };
                watchers
                    .entry(collection.clone())
                    .or_insert_with(|| {
                        ChangeWatcher::new(
                            self.store.clone(),
                            collection.clone(),
                            start,
                            watcher_config.clone(),
                        )
                    })
                    .subscribe_after(tx.clone(), start);
            }
            handles.push(ExecutorHandle {
                executor,
                events: rx,
            });
        }

        Ok((watchers.into_values().collect(), handles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::backoff::BackoffConfig;
    use crate::common::types::{Side, STRATEGY_STATE_COLLECTION};
    use crate::strategy::StrategyState;
    use crate::config::types::StrategyConfig;
    use crate::store::InMemoryStore;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::time::Duration;

    fn portfolio(id: &str, asset: &str, trade_mode: TradeMode) -> PortfolioConfig {
        PortfolioConfig {
            id: id.to_string(),
            asset: asset.to_string(),
            trade_mode,
            strategy: StrategyConfig {
                tolerance: dec!(0.001),
                upside_factor: dec!(1),
                downside_factor: dec!(1),
                start_mode: Side::Buy,
                reference_price: None,
                size: dec!(1),
            },
        }
    }

    fn executor_config() -> ExecutorConfig {
        ExecutorConfig {
            queue_size: 8,
            status_poll_interval_ms: 100,
            order_timeout_secs: 5,
            reconcile: BackoffConfig::new(Duration::from_millis(10), Duration::from_millis(50), 3),
            store_retry: BackoffConfig::new(Duration::from_millis(10), Duration::from_millis(50), 3),
        }
    }

    #[tokio::test]
    async fn test_builds_one_executor_per_portfolio() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
        let factory = ExecutorFactory::new(store, executor_config());

        let executors = factory
            .build_all(&[
                portfolio("a", "BTC-USD", TradeMode::Paper),
                portfolio("b", "ETH-USD", TradeMode::Paper),
            ])
            .await
            .unwrap();

        assert_eq!(executors.len(), 2);
        assert_eq!(executors[0].portfolio_id(), "a");
        assert_eq!(executors[1].watched_collections()[0], "ticker.eth-usd");
    }

    #[tokio::test]
    async fn test_live_portfolio_requires_gateway() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
        let factory = ExecutorFactory::new(store, executor_config());

        let result = factory.build(&portfolio("a", "BTC-USD", TradeMode::Live)).await;
        assert!(matches!(result, Err(AlphaError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_wire_shares_watchers_and_starts_at_head() {
        let memory = Arc::new(InMemoryStore::new());
        for i in 0..3 {
            memory
                .append("ticker.btc-usd", &i.to_string(), json!({}))
                .await
                .unwrap();
        }
        let store: Arc<dyn DocumentStore> = memory;
        let factory = ExecutorFactory::new(store, executor_config());

        let executors = factory
            .build_all(&[
                portfolio("a", "BTC-USD", TradeMode::Paper),
                portfolio("b", "BTC-USD", TradeMode::Paper),
            ])
            .await
            .unwrap();
        let (watchers, handles) = factory
            .wire(executors, &WatcherConfig::default())
            .await
            .unwrap();

        // ticker plus three book levels, shared by both portfolios
        assert_eq!(watchers.len(), 4);
        assert_eq!(handles.len(), 2);
        let ticker = watchers
            .iter()
            .find(|w| w.collection() == "ticker.btc-usd")
            .unwrap();
        assert_eq!(ticker.cursor(), 3);
        assert_eq!(ticker.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_wire_resumes_each_portfolio_at_its_own_sequence() {
        let memory = Arc::new(InMemoryStore::new());
        for i in 0..5 {
            memory
                .append("ticker.btc-usd", &i.to_string(), json!({}))
                .await
                .unwrap();
        }
        let mut restored = StrategyState::new("old");
        restored.mark_evaluated(&ChangeEvent {
            collection_name: "ticker.btc-usd".to_string(),
            document_id: "1".to_string(),
            commit_sequence: 2,
        });
        memory
            .upsert(
                STRATEGY_STATE_COLLECTION,
                "old",
                serde_json::to_value(&restored).unwrap(),
            )
            .await
            .unwrap();
        let store: Arc<dyn DocumentStore> = memory;
        let factory = ExecutorFactory::new(store, executor_config());

        let executors = factory
            .build_all(&[
                portfolio("old", "BTC-USD", TradeMode::Paper),
                portfolio("new", "BTC-USD", TradeMode::Paper),
            ])
            .await
            .unwrap();
        let (watchers, _handles) = factory
            .wire(executors, &WatcherConfig::default())
            .await
            .unwrap();

        let ticker = watchers
            .iter()
            .find(|w| w.collection() == "ticker.btc-usd")
            .unwrap();
        // the fresh portfolio is not replayed the older one's backlog
        assert_eq!(ticker.cursors(), vec![2, 5]);
    }
}
