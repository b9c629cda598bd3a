//! Outbound delivery
//!
//! The delivery sink is the seam between the core and the messaging
//! platform: production posts to the Telegram Bot API, tests record in
//! memory. Both the immediate and the scheduled path go through the one
//! bounded-retry primitive here.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::error::DeliveryError;

/// Accepts (destination, rendered text) and either delivers it or reports
/// a delivery error.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn send(&self, destination: &str, text: &str) -> Result<(), DeliveryError>;
}

/// Sink posting to the Telegram Bot API `sendMessage` endpoint.
pub struct TelegramSink {
    client: reqwest::Client,
    credential: String,
}

impl TelegramSink {
    pub fn new(credential: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        TelegramSink { client, credential }
    }
}

#[async_trait]
impl DeliverySink for TelegramSink {
    async fn send(&self, destination: &str, text: &str) -> Result<(), DeliveryError> {
        let endpoint = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.credential
        );
        let response = self
            .client
            .post(&endpoint)
            .json(&json!({
                "chat_id": destination,
                "text": text,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DeliveryError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Retry parameters for `send_with_retry`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

/// Delivers with bounded exponential backoff. Exhaustion returns the last
/// error; there is no retry beyond `max_attempts`.
pub async fn send_with_retry(
    sink: &dyn DeliverySink,
    destination: &str,
    text: &str,
    policy: &RetryPolicy,
) -> Result<(), DeliveryError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match sink.send(destination, text).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < policy.max_attempts => {
                let backoff = policy.base_backoff * 2u32.saturating_pow(attempt - 1);
                warn!(
                    destination,
                    attempt,
                    error = %err,
                    "delivery attempt failed, backing off"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}
