//! Google Cloud Pub/Sub subscription client over the REST API
//!
//! Uses synchronous pull. A nack is a `modifyAckDeadline` to zero seconds, which makes
//! the message immediately eligible for redelivery under the subscription's own
//! retry policy.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::config::PubSubConfig;
use crate::core::models::InboundMessage;
use crate::errors::EnrichError;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh metadata tokens this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Upper bound on a single pull; the server long-polls for a while when idle
const PULL_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn pull(&self, max_messages: usize) -> Result<Vec<InboundMessage>, EnrichError>;

    async fn ack(&self, ack_ids: &[String]) -> Result<(), EnrichError>;

    async fn nack(&self, ack_ids: &[String]) -> Result<(), EnrichError>;

    /// Verify the subscription is reachable. Used once at startup.
    async fn check(&self) -> Result<(), EnrichError>;
}

enum TokenSource {
    None,
    Static(String),
    Metadata(Mutex<Option<(String, Instant)>>),
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: PubsubMessage,
    delivery_attempt: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PubsubMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    message_id: String,
    publish_time: Option<DateTime<Utc>>,
}

pub struct PubSubClient {
    http: Client,
    subscription_url: String,
    token: TokenSource,
}

impl PubSubClient {
    pub fn new(config: &PubSubConfig) -> Self {
        let token = if config.emulator {
            TokenSource::None
        } else if let Some(token) = &config.access_token {
            TokenSource::Static(token.clone())
        } else {
            TokenSource::Metadata(Mutex::new(None))
        };

        Self {
            http: Client::builder()
                .timeout(PULL_REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            subscription_url: format!(
                "{}/v1/{}",
                config.endpoint.trim_end_matches('/'),
                config.subscription_path()
            ),
            token,
        }
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, EnrichError> {
        match &self.token {
            TokenSource::None => Ok(request),
            TokenSource::Static(token) => Ok(request.bearer_auth(token)),
            TokenSource::Metadata(cached) => {
                let mut guard = cached.lock().await;
                if let Some((token, expires_at)) = guard.as_ref()
                    && Instant::now() + TOKEN_REFRESH_MARGIN < *expires_at
                {
                    return Ok(request.bearer_auth(token));
                }

                let fresh: MetadataToken = self
                    .http
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                debug!(expires_in = fresh.expires_in, "Fetched Pub/Sub access token");

                let request = request.bearer_auth(&fresh.access_token);
                *guard = Some((
                    fresh.access_token,
                    Instant::now() + Duration::from_secs(fresh.expires_in),
                ));
                Ok(request)
            }
        }
    }

    async fn post_action(&self, action: &str, body: serde_json::Value) -> Result<reqwest::Response, EnrichError> {
        let request = self
            .http
            .post(format!("{}:{action}", self.subscription_url))
            .json(&body);
        let response = self.authorize(request).await?.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(EnrichError::QueueError(format!(
                "{action} returned {status}: {body_text}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl MessageSource for PubSubClient {
    async fn pull(&self, max_messages: usize) -> Result<Vec<InboundMessage>, EnrichError> {
        let response = self
            .post_action("pull", json!({ "maxMessages": max_messages }))
            .await?;
        let pulled: PullResponse = response
            .json()
            .await
            .map_err(|e| EnrichError::QueueError(format!("Failed to parse pull response: {e}")))?;

        Ok(pulled
            .received_messages
            .into_iter()
            .map(into_inbound)
            .collect())
    }

    async fn ack(&self, ack_ids: &[String]) -> Result<(), EnrichError> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        self.post_action("acknowledge", json!({ "ackIds": ack_ids }))
            .await
            .map(|_| ())
    }

    async fn nack(&self, ack_ids: &[String]) -> Result<(), EnrichError> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        self.post_action(
            "modifyAckDeadline",
            json!({ "ackIds": ack_ids, "ackDeadlineSeconds": 0 }),
        )
        .await
        .map(|_| ())
    }

    async fn check(&self) -> Result<(), EnrichError> {
        let request = self.http.get(&self.subscription_url);
        let response = self
            .authorize(request)
            .await
            .map_err(|e| EnrichError::ConnectError(e.to_string()))?
            .send()
            .await
            .map_err(|e| EnrichError::ConnectError(format!("Pub/Sub unreachable: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(EnrichError::ConnectError(format!(
                "subscription {} returned {}",
                self.subscription_url,
                response.status()
            )))
        }
    }
}

fn into_inbound(received: ReceivedMessage) -> InboundMessage {
    let payload = match BASE64.decode(received.message.data.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            // Left undecoded; the pipeline rejects it as malformed.
            warn!(
                message_id = %received.message.message_id,
                "Message data is not valid base64: {}",
                e
            );
            received.message.data.into_bytes()
        }
    };

    let message_id = if received.message.message_id.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        received.message.message_id
    };

    InboundMessage {
        ack_id: received.ack_id,
        message_id,
        payload,
        delivery_attempt: received.delivery_attempt.unwrap_or(1).max(1),
        publish_time: received.message.publish_time,
    }
}
