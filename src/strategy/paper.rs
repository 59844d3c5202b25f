//! Paper trading gateway
//!
//! Fills every priced order immediately at its limit price and remembers the
//! outcome so status queries after a restart see the same result.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::info;

use crate::common::errors::Result;
use crate::common::traits::OrderGateway;
use crate::strategy::types::{Fill, OrderIntent, OrderOutcome};

#[derive(Debug, Default)]
pub struct PaperGateway {
    orders: DashMap<String, OrderOutcome>,
    next_order_id: AtomicU64,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of orders seen
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderOutcome> {
        if let Some(existing) = self.orders.get(&intent.client_order_id) {
            return Ok(existing.clone());
        }

        let outcome = match intent.limit_price {
            Some(price) => {
                let id = self.next_order_id.fetch_add(1, Ordering::Relaxed) + 1;
                OrderOutcome::Filled(Fill {
                    exchange_order_id: format!("paper-{}", id),
                    size: intent.size,
                    price,
                    filled_at: Utc::now(),
                })
            }
            None => OrderOutcome::Rejected {
                reason: "paper trading needs a limit price".to_string(),
            },
        };

        info!(
            portfolio = %intent.portfolio_id,
            side = %intent.side,
            size = %intent.size,
            outcome = ?outcome,
            "Paper order"
        );
        self.orders
            .insert(intent.client_order_id.clone(), outcome.clone());
        Ok(outcome)
    }

    async fn order_status(&self, client_order_id: &str) -> Result<OrderOutcome> {
        Ok(self
            .orders
            .get(client_order_id)
            .map(|o| o.clone())
            .unwrap_or(OrderOutcome::NotFound))
    }

    async fn cancel(&self, _client_order_id: &str) -> Result<()> {
        Ok(())
    }

    fn gateway_name(&self) -> &'static str {
        "paper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Side;
    use crate::strategy::types::TradeIntent;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_priced_orders_fill_at_limit() {
        let gateway = PaperGateway::new();
        let intent = OrderIntent::from_trade(
            "p1",
            "BTC-USD",
            TradeIntent::new(Side::Buy, dec!(2), "test").with_price(dec!(10)),
        );

        let outcome = gateway.submit(&intent).await.unwrap();
        match &outcome {
            OrderOutcome::Filled(fill) => {
                assert_eq!(fill.price, dec!(10));
                assert_eq!(fill.size, dec!(2));
            }
            other => panic!("Expected Filled, got {:?}", other),
        }

        assert_eq!(gateway.order_status(&intent.client_order_id).await.unwrap(), outcome);
        // resubmitting the same client order id does not trade twice
        assert_eq!(gateway.submit(&intent).await.unwrap(), outcome);
        assert_eq!(gateway.order_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_and_unpriced_orders() {
        let gateway = PaperGateway::new();
        assert_eq!(gateway.order_status("missing").await.unwrap(), OrderOutcome::NotFound);

        let intent = OrderIntent::from_trade("p1", "BTC-USD", TradeIntent::new(Side::Sell, dec!(1), "test"));
        assert!(matches!(
            gateway.submit(&intent).await.unwrap(),
            OrderOutcome::Rejected { .. }
        ));
    }
}
