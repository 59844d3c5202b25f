//! Live order gateway on top of the REST client

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use super::messages::{NewOrderRequest, OrderResponse};
use super::rest::CoinbaseRestClient;
use crate::common::errors::{AlphaError, Result};
use crate::common::traits::OrderGateway;
use crate::strategy::{Fill, OrderIntent, OrderOutcome};

/// Submits orders to Coinbase Exchange
#[derive(Debug, Clone)]
pub struct CoinbaseOrderGateway {
    rest: CoinbaseRestClient,
}

impl CoinbaseOrderGateway {
    /// Create a gateway; the client must carry credentials
    pub fn new(rest: CoinbaseRestClient) -> Result<Self> {
        if !rest.has_credentials() {
            return Err(AlphaError::Configuration(
                "live trading requires exchange API credentials".to_string(),
            ));
        }
        Ok(Self { rest })
    }
}

/// Unknown-outcome failures become recoverable gateway errors
fn classify(error: AlphaError) -> AlphaError {
    match error {
        AlphaError::Gateway { .. } => error,
        e if e.is_transient() => AlphaError::gateway(e.to_string(), true),
        e => AlphaError::gateway(e.to_string(), false),
    }
}

fn parse_amount(raw: Option<&str>) -> Decimal {
    raw.and_then(|v| v.parse().ok()).unwrap_or(Decimal::ZERO)
}

/// Translate an exchange order record into an outcome
pub fn outcome_from_response(response: &OrderResponse) -> OrderOutcome {
    match response.status.as_str() {
        "done" | "settled" => {
            let filled = parse_amount(response.filled_size.as_deref());
            let value = parse_amount(response.executed_value.as_deref());
            if filled > Decimal::ZERO {
                OrderOutcome::Filled(Fill {
                    exchange_order_id: response.id.clone(),
                    size: filled,
                    price: value / filled,
                    filled_at: Utc::now(),
                })
            } else {
                OrderOutcome::Rejected {
                    reason: response
                        .done_reason
                        .clone()
                        .unwrap_or_else(|| "done without fill".to_string()),
                }
            }
        }
        "rejected" => OrderOutcome::Rejected {
            reason: response
                .reject_reason
                .clone()
                .unwrap_or_else(|| "rejected".to_string()),
        },
        _ => OrderOutcome::Open {
            exchange_order_id: response.id.clone(),
        },
    }
}

#[async_trait]
impl OrderGateway for CoinbaseOrderGateway {
    #[instrument(skip(self, intent), fields(client_order_id = %intent.client_order_id))]
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderOutcome> {
        let request = NewOrderRequest {
            client_oid: intent.client_order_id.clone(),
            product_id: intent.asset_id.clone(),
            side: intent.side.to_string(),
            order_type: if intent.limit_price.is_some() {
                "limit".to_string()
            } else {
                "market".to_string()
            },
            size: intent.size.normalize().to_string(),
            price: intent.limit_price.map(|p| p.normalize().to_string()),
        };

        match self.rest.place_order(&request).await {
            Ok(response) => {
                info!(order_id = %response.id, status = %response.status, "Order accepted");
                Ok(outcome_from_response(&response))
            }
            // a 4xx other than auth and throttling means the exchange refused it
            Err(AlphaError::InvalidResponse(reason)) => {
                warn!(%reason, "Order rejected");
                Ok(OrderOutcome::Rejected { reason })
            }
            Err(e) => Err(classify(e)),
        }
    }

    #[instrument(skip(self))]
    async fn order_status(&self, client_order_id: &str) -> Result<OrderOutcome> {
        match self.rest.get_order_by_client_id(client_order_id).await {
            Ok(Some(response)) => Ok(outcome_from_response(&response)),
            Ok(None) => Ok(OrderOutcome::NotFound),
            Err(e) => Err(classify(e)),
        }
    }

    #[instrument(skip(self))]
    async fn cancel(&self, client_order_id: &str) -> Result<()> {
        self.rest
            .cancel_order_by_client_id(client_order_id)
            .await
            .map_err(classify)
    }

    fn gateway_name(&self) -> &'static str {
        "coinbase"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn response(status: &str) -> OrderResponse {
        OrderResponse {
            id: "ex-1".to_string(),
            client_oid: Some("c-1".to_string()),
            product_id: Some("BTC-USD".to_string()),
            status: status.to_string(),
            done_reason: None,
            reject_reason: None,
            filled_size: None,
            executed_value: None,
            settled: false,
        }
    }

    #[test]
    fn test_done_with_fill_is_filled() {
        let mut done = response("done");
        done.done_reason = Some("filled".to_string());
        done.filled_size = Some("0.5".to_string());
        done.executed_value = Some("10000".to_string());

        match outcome_from_response(&done) {
            OrderOutcome::Filled(fill) => {
                assert_eq!(fill.size, dec!(0.5));
                assert_eq!(fill.price, dec!(20000));
                assert_eq!(fill.exchange_order_id, "ex-1");
            }
            other => panic!("Expected Filled, got {:?}", other),
        }
    }

    #[test]
    fn test_canceled_without_fill_is_rejected() {
        let mut done = response("done");
        done.done_reason = Some("canceled".to_string());
        done.filled_size = Some("0".to_string());

        assert_eq!(
            outcome_from_response(&done),
            OrderOutcome::Rejected {
                reason: "canceled".to_string()
            }
        );
    }

    #[test]
    fn test_pending_is_open() {
        assert_eq!(
            outcome_from_response(&response("pending")),
            OrderOutcome::Open {
                exchange_order_id: "ex-1".to_string()
            }
        );
    }

    #[test]
    fn test_classify() {
        assert!(matches!(
            classify(AlphaError::TransientNetwork("503".to_string())),
            AlphaError::Gateway { recoverable: true, .. }
        ));
        assert!(matches!(
            classify(AlphaError::Authentication("bad key".to_string())),
            AlphaError::Gateway { recoverable: false, .. }
        ));
    }

    #[test]
    fn test_requires_credentials() {
        let rest = CoinbaseRestClient::new("https://api.exchange.coinbase.com").unwrap();
        assert!(matches!(
            CoinbaseOrderGateway::new(rest),
            Err(AlphaError::Configuration(_))
        ));
    }
}
