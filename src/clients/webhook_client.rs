//! Outbound delivery over a Discord-style webhook

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::{Value, json};
use tracing::{error, info};

use crate::errors::EnrichError;

#[async_trait]
pub trait Sink: Send + Sync {
    /// Single attempt. Any non-success status is an error.
    async fn deliver(&self, message: &str) -> Result<(), EnrichError>;
}

#[derive(Debug, Clone)]
pub struct WebhookSink {
    http: HttpClient,
    webhook_url: String,
}

impl WebhookSink {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            webhook_url: webhook_url.into(),
        }
    }
}

#[must_use]
pub fn create_webhook_payload(content: &str) -> Value {
    json!({ "content": content })
}

#[async_trait]
impl Sink for WebhookSink {
    async fn deliver(&self, message: &str) -> Result<(), EnrichError> {
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&create_webhook_payload(message))
            .send()
            .await
            .map_err(|e| EnrichError::DeliveryError(format!("webhook POST failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            error!(status = %status, body = %body_text, "Webhook POST rejected");
            return Err(EnrichError::DeliveryError(format!(
                "webhook returned {status}: {body_text}"
            )));
        }

        info!(status = %status, "Delivered to webhook");
        Ok(())
    }
}
