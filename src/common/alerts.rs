//! Operator alerts
//!
//! Collectors raise alerts when they start, when the feed connection drops
//! and when they turn degraded. Delivery runs on its own task and never holds
//! up ingestion; a failed delivery is logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::errors::{AlphaError, Result};
use super::traits::Notifier;

/// Fire-and-forget front for an optional [`Notifier`]
#[derive(Clone, Default)]
pub struct AlertDispatcher {
    notifier: Option<Arc<dyn Notifier>>,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier: Some(notifier),
        }
    }

    /// Dispatcher that only logs
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.notifier.is_some()
    }

    /// Queue an alert for delivery
    pub fn send(&self, title: &str, message: impl Into<String>) {
        let message = message.into();
        let Some(notifier) = self.notifier.clone() else {
            debug!(title, %message, "Alert not sent, no notifier configured");
            return;
        };

        let title = title.to_string();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&title, &message).await {
                warn!(%title, error = %e, "Alert delivery failed");
            }
        });
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    /// Chat webhooks render this field
    text: String,
    title: &'a str,
    message: &'a str,
    source: &'static str,
}

/// Posts alerts as JSON to an HTTP webhook
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("coinbase_alpha/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AlphaError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<()> {
        let payload = WebhookPayload {
            text: format!("{}: {}", title, message),
            title,
            message,
            source: "coinbase_alpha",
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = format!("Webhook returned status {}", status);
        if status.is_server_error() {
            Err(AlphaError::TransientNetwork(message))
        } else {
            Err(AlphaError::InvalidResponse(message))
        }
    }
}
