//! Per-message processing: decode, cache-aside resolve, deliver, decide ack.
//!
//! Only a decode failure is unconditionally rejected. Every other failure is absorbed
//! according to the configured [`FailurePolicy`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::clients::{ArtifactCache, Sink, TextGenerator};
use crate::core::config::{FailurePolicy, WorkerConfig};
use crate::core::models::{
    AckDecision, Artifact, ArtifactOrigin, DeliveryOutcome, InboundMessage, Request,
};
use crate::errors::EnrichError;
use crate::prompt::{MessageFormatter, PromptTemplate};

/// Bytes of a rejected payload echoed into the log
const MAX_LOGGED_PAYLOAD_BYTES: usize = 256;

/// Shared client handles, constructed once at startup.
#[derive(Clone)]
pub struct Collaborators {
    pub cache: Arc<dyn ArtifactCache>,
    pub generator: Arc<dyn TextGenerator>,
    /// `None` when no delivery destination is configured.
    pub sink: Option<Arc<dyn Sink>>,
}

#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    pub cache: Duration,
    pub generation: Duration,
    pub sink: Duration,
}

impl From<&WorkerConfig> for Deadlines {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            cache: config.cache_timeout,
            generation: config.generation_timeout,
            sink: config.sink_timeout,
        }
    }
}

pub struct Pipeline {
    collaborators: Collaborators,
    template: Arc<dyn PromptTemplate>,
    formatter: Arc<dyn MessageFormatter>,
    deadlines: Deadlines,
    policy: FailurePolicy,
}

impl Pipeline {
    pub fn new(
        collaborators: Collaborators,
        template: Arc<dyn PromptTemplate>,
        formatter: Arc<dyn MessageFormatter>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            collaborators,
            template,
            formatter,
            deadlines: Deadlines::from(config),
            policy: config.failure_policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Process one inbound message end to end.
    #[instrument(
        skip_all,
        fields(message_id = %message.message_id, attempt = message.delivery_attempt)
    )]
    pub async fn handle(&self, message: &InboundMessage) -> AckDecision {
        let request = match Request::decode(&message.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    payload = %payload_preview(&message.payload),
                    "Rejecting message: {}",
                    e
                );
                return AckDecision::Nack;
            }
        };

        info!(topic = %request.topic, "Processing request");

        let Some(artifact) = self.resolve(&request, message.delivery_attempt).await else {
            return AckDecision::Nack;
        };

        match self.deliver(&artifact).await {
            DeliveryOutcome::Delivered | DeliveryOutcome::Skipped => AckDecision::Ack,
            DeliveryOutcome::Failed(reason) => {
                self.decide_after_failure(message.delivery_attempt, "delivery", &reason)
            }
        }
    }

    /// Cache-aside lookup. `None` means the request should be redelivered.
    pub async fn resolve(&self, request: &Request, attempt: u32) -> Option<Artifact> {
        let topic = &request.topic;

        if let Some(text) = self.lookup(topic).await {
            info!(topic = %topic, "Using cached artifact");
            return Some(Artifact {
                topic: topic.clone(),
                text,
                origin: ArtifactOrigin::Cached,
            });
        }

        let generated = with_deadline(
            "text generation",
            self.deadlines.generation,
            self.collaborators.generator.generate(topic),
        )
        .await;

        match generated {
            Ok(text) => {
                self.store(topic, &text).await;
                info!(topic = %topic, "Generated artifact");
                Some(Artifact {
                    topic: topic.clone(),
                    text,
                    origin: ArtifactOrigin::Generated,
                })
            }
            Err(e) => self.fallback(topic, attempt, &e).await,
        }
    }

    async fn fallback(&self, topic: &str, attempt: u32, cause: &EnrichError) -> Option<Artifact> {
        let text = self.template.fallback_text().to_string();

        match self.policy {
            FailurePolicy::BestEffort => {
                error!(topic = %topic, "Generation failed, substituting fallback: {}", cause);
                self.store(topic, &text).await;
            }
            FailurePolicy::Retry { max_attempts } if attempt < max_attempts => {
                warn!(
                    topic = %topic,
                    attempt,
                    max_attempts,
                    "Generation failed, requesting redelivery: {}",
                    cause
                );
                return None;
            }
            FailurePolicy::Retry { max_attempts } => {
                error!(
                    topic = %topic,
                    attempt,
                    max_attempts,
                    "Generation failed on final attempt, dead-lettering with fallback: {}",
                    cause
                );
            }
        }

        Some(Artifact {
            topic: topic.to_string(),
            text,
            origin: ArtifactOrigin::Fallback,
        })
    }

    async fn lookup(&self, topic: &str) -> Option<String> {
        let result = with_deadline(
            "cache read",
            self.deadlines.cache,
            self.collaborators.cache.get(topic),
        )
        .await;

        match result {
            Ok(Some(text)) if text.is_empty() => {
                debug!(topic = %topic, "Ignoring empty cached value");
                None
            }
            Ok(hit) => hit,
            Err(e) => {
                warn!(topic = %topic, "Cache read failed, treating as miss: {}", e);
                None
            }
        }
    }

    async fn store(&self, topic: &str, text: &str) {
        let result = with_deadline(
            "cache write",
            self.deadlines.cache,
            self.collaborators.cache.put(topic, text),
        )
        .await;

        if let Err(e) = result {
            warn!(topic = %topic, "Cache write failed, continuing: {}", e);
        } else {
            debug!(topic = %topic, "Cached artifact");
        }
    }

    async fn deliver(&self, artifact: &Artifact) -> DeliveryOutcome {
        let Some(sink) = &self.collaborators.sink else {
            warn!(topic = %artifact.topic, "No delivery destination configured, skipping delivery");
            return DeliveryOutcome::Skipped;
        };

        let message = self.formatter.format(&artifact.topic, &artifact.text);
        match with_deadline("delivery", self.deadlines.sink, sink.deliver(&message)).await {
            Ok(()) => {
                info!(topic = %artifact.topic, origin = ?artifact.origin, "Delivered artifact");
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                error!(topic = %artifact.topic, "Delivery failed: {}", e);
                DeliveryOutcome::Failed(e.to_string())
            }
        }
    }

    fn decide_after_failure(&self, attempt: u32, stage: &str, reason: &str) -> AckDecision {
        match self.policy {
            FailurePolicy::BestEffort => AckDecision::Ack,
            FailurePolicy::Retry { max_attempts } if attempt < max_attempts => {
                warn!(attempt, max_attempts, stage, "Requesting redelivery: {}", reason);
                AckDecision::Nack
            }
            FailurePolicy::Retry { max_attempts } => {
                error!(
                    attempt,
                    max_attempts,
                    stage,
                    "Retry budget exhausted, dead-lettering: {}",
                    reason
                );
                AckDecision::Ack
            }
        }
    }
}

async fn with_deadline<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T, EnrichError>
where
    F: Future<Output = Result<T, EnrichError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| EnrichError::Timeout {
            operation,
            elapsed: limit,
        })?
}

fn payload_preview(payload: &[u8]) -> String {
    if payload.len() <= MAX_LOGGED_PAYLOAD_BYTES {
        return String::from_utf8_lossy(payload).into_owned();
    }
    format!(
        "{}... ({} bytes)",
        String::from_utf8_lossy(&payload[..MAX_LOGGED_PAYLOAD_BYTES]),
        payload.len()
    )
}
