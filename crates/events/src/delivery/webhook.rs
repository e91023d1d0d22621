//! Outbound webhook notifications with exponential-backoff retry.
//!
//! [`WebhookChannel`] POSTs every job event to a single configured URL.
//! Failed attempts are retried with exponential backoff (1 s, 2 s, 4 s)
//! before the notification is dropped.

use std::time::Duration;

use async_trait::async_trait;

use crate::channel::NotificationChannel;

/// Retry delays in seconds (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// WebhookChannel
// ---------------------------------------------------------------------------

/// Delivers job events to an external webhook endpoint.
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
    retry_delays: Vec<Duration>,
}

impl WebhookChannel {
    /// Create a channel targeting `url`.
    pub fn new(url: impl Into<String>) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
            retry_delays: RETRY_DELAYS_SECS.iter().map(|s| Duration::from_secs(*s)).collect(),
        })
    }

    /// Override the backoff schedule.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver a payload with retry.
    ///
    /// Returns `Ok(())` on the first successful attempt.
    pub async fn deliver(&self, body: &serde_json::Value) -> Result<(), WebhookError> {
        for (attempt, delay) in self.retry_delays.iter().enumerate() {
            match self.try_send(body).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        url = %self.url,
                        error = %e,
                        "Webhook delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(*delay).await;
                }
            }
        }

        // Final attempt after the last backoff.
        self.try_send(body).await
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, body: &serde_json::Value) -> Result<(), WebhookError> {
        let response = self.client.post(&self.url).json(body).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Wire envelope for an outbound notification.
pub fn envelope(owner_id: &str, event_name: &str, payload: &serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "ownerId": owner_id,
        "eventName": event_name,
        "payload": payload,
        "timestamp": chrono::Utc::now(),
    })
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, owner_id: &str, event_name: &str, payload: &serde_json::Value) {
        let body = envelope(owner_id, event_name, payload);
        if let Err(e) = self.deliver(&body).await {
            tracing::error!(
                url = %self.url,
                owner_id,
                event = event_name,
                error = %e,
                "Webhook delivery failed after all retries"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
