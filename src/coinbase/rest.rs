//! REST API client for Coinbase Exchange

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, instrument};

use super::auth::{generate_auth_headers, AuthHeaders};
use super::messages::*;
use crate::common::errors::{AlphaError, Result};
use crate::common::traits::BookSource;
use crate::common::types::{BookEntry, BookLevel, BookSnapshot};
use crate::config::types::ApiCredentials;

/// REST API client for Coinbase Exchange
#[derive(Debug, Clone)]
pub struct CoinbaseRestClient {
    /// HTTP client
    client: Client,
    /// Base URL for the REST API
    base_url: String,
    /// Optional API credentials for authenticated endpoints
    credentials: Option<ApiCredentials>,
}

impl CoinbaseRestClient {
    /// Create a new REST client (unauthenticated)
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    /// Create a new REST client with custom timeout
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("coinbase_alpha/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AlphaError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: None,
        })
    }

    /// Set API credentials for authenticated requests
    pub fn with_credentials(mut self, credentials: ApiCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    fn auth_headers(&self, method: &str, path: &str, body: &str) -> Result<AuthHeaders> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            AlphaError::Authentication("API credentials required for this endpoint".to_string())
        })?;
        generate_auth_headers(credentials, method, path, body)
    }

    /// Map a non-success response to an error
    async fn error_for_status(response: Response) -> AlphaError {
        let status = response.status();
        let retry_after_seconds = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or(body);

        match status {
            StatusCode::TOO_MANY_REQUESTS => AlphaError::RateLimit {
                message,
                retry_after_seconds,
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                AlphaError::Authentication(format!("Server returned status {}: {}", status, message))
            }
            s if s.is_server_error() => {
                AlphaError::TransientNetwork(format!("Server returned status {}: {}", status, message))
            }
            _ => AlphaError::InvalidResponse(format!(
                "Server returned status {}: {}",
                status, message
            )),
        }
    }

    // ========================================================================
    // Public Endpoints (No Authentication Required)
    // ========================================================================

    /// Get the order book of a product at a granularity level
    #[instrument(skip(self))]
    pub async fn get_product_book(&self, product_id: &str, level: BookLevel) -> Result<BookSnapshot> {
        let url = format!(
            "{}/products/{}/book?level={}",
            self.base_url,
            product_id,
            level.as_u8()
        );
        debug!("Fetching order book from: {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for_status(response).await);
        }

        let book_response: BookResponse = response.json().await?;
        convert_book_response(product_id, level, book_response)
    }

    // ========================================================================
    // Authenticated Endpoints
    // ========================================================================

    /// Place an order
    #[instrument(skip(self, order), fields(client_oid = %order.client_oid))]
    pub async fn place_order(&self, order: &NewOrderRequest) -> Result<OrderResponse> {
        let path = "/orders";
        let body = serde_json::to_string(order)?;
        let headers = self.auth_headers("POST", path, &body)?;

        let request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        let response = headers.apply_to_request(request).send().await?;

        if !response.status().is_success() {
            return Err(Self::error_for_status(response).await);
        }
        Ok(response.json().await?)
    }

    /// Look up an order by client order id; `None` when the exchange does not know it
    #[instrument(skip(self))]
    pub async fn get_order_by_client_id(&self, client_oid: &str) -> Result<Option<OrderResponse>> {
        let path = format!("/orders/client:{}", client_oid);
        let headers = self.auth_headers("GET", &path, "")?;

        let request = self.client.get(format!("{}{}", self.base_url, path));
        let response = headers.apply_to_request(request).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_for_status(response).await);
        }
        Ok(Some(response.json().await?))
    }

    /// Cancel an order by client order id
    ///
    /// An order the exchange no longer knows is treated as already gone.
    #[instrument(skip(self))]
    pub async fn cancel_order_by_client_id(&self, client_oid: &str) -> Result<()> {
        let path = format!("/orders/client:{}", client_oid);
        let headers = self.auth_headers("DELETE", &path, "")?;

        let request = self.client.delete(format!("{}{}", self.base_url, path));
        let response = headers.apply_to_request(request).send().await?;

        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }
        Err(Self::error_for_status(response).await)
    }
}

#[async_trait]
impl BookSource for CoinbaseRestClient {
    async fn fetch_book(&self, asset_id: &str, level: BookLevel) -> Result<BookSnapshot> {
        self.get_product_book(asset_id, level).await
    }
}

/// Convert API order book response to a snapshot
fn convert_book_response(
    product_id: &str,
    level: BookLevel,
    response: BookResponse,
) -> Result<BookSnapshot> {
    let bids = response
        .bids
        .into_iter()
        .map(|row| convert_row(level, row))
        .collect::<Result<Vec<_>>>()?;
    let asks = response
        .asks
        .into_iter()
        .map(|row| convert_row(level, row))
        .collect::<Result<Vec<_>>>()?;

    let received_timestamp = Utc::now();
    Ok(BookSnapshot {
        asset_id: product_id.to_uppercase(),
        level,
        bids,
        asks,
        exchange_sequence: response.sequence,
        exchange_timestamp: response.time.unwrap_or(received_timestamp),
        received_timestamp,
    })
}

fn convert_row(level: BookLevel, (price, size, extra): (String, String, serde_json::Value)) -> Result<BookEntry> {
    let price: Decimal = price
        .parse()
        .map_err(|e| AlphaError::InvalidResponse(format!("Invalid book price '{}': {}", price, e)))?;
    let size: Decimal = size
        .parse()
        .map_err(|e| AlphaError::InvalidResponse(format!("Invalid book size '{}': {}", size, e)))?;

    let mut entry = BookEntry::new(price, size);
    match level {
        BookLevel::Full => entry.order_id = extra.as_str().map(str::to_string),
        _ => entry.num_orders = extra.as_u64(),
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_client_creation() {
        let client = CoinbaseRestClient::new("https://api.exchange.coinbase.com");
        assert!(client.is_ok());
    }

    #[test]
    fn test_url_normalization() {
        let client = CoinbaseRestClient::new("https://api.exchange.coinbase.com/").unwrap();
        assert!(!client.base_url.ends_with('/'));
        assert!(!client.has_credentials());
    }

    #[test]
    fn test_convert_level_two_book() {
        let response: BookResponse = serde_json::from_str(
            r#"{"sequence": 42, "bids": [["100.5", "2", 3]], "asks": [["101", "1.5", 1]],
                "time": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let snapshot = convert_book_response("btc-usd", BookLevel::Top50, response).unwrap();

        assert_eq!(snapshot.asset_id, "BTC-USD");
        assert_eq!(snapshot.exchange_sequence, 42);
        assert_eq!(snapshot.best_bid().unwrap().price, dec!(100.5));
        assert_eq!(snapshot.best_bid().unwrap().num_orders, Some(3));
        assert_eq!(snapshot.best_ask().unwrap().size, dec!(1.5));
    }

    #[test]
    fn test_convert_level_three_book() {
        let response: BookResponse = serde_json::from_str(
            r#"{"sequence": 9, "bids": [["100.5", "2", "order-a"]], "asks": []}"#,
        )
        .unwrap();

        let snapshot = convert_book_response("BTC-USD", BookLevel::Full, response).unwrap();

        assert_eq!(snapshot.bids[0].order_id.as_deref(), Some("order-a"));
        assert_eq!(snapshot.bids[0].num_orders, None);
        assert_eq!(snapshot.exchange_timestamp, snapshot.received_timestamp);
    }

    #[test]
    fn test_convert_rejects_bad_price() {
        let response: BookResponse =
            serde_json::from_str(r#"{"sequence": 1, "bids": [["x", "2", 1]], "asks": []}"#).unwrap();
        assert!(matches!(
            convert_book_response("BTC-USD", BookLevel::Best, response),
            Err(AlphaError::InvalidResponse(_))
        ));
    }
}
