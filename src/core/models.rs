use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::errors::EnrichError;

/// A message as handed over by the queue, before any decoding.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub ack_id: String,
    pub message_id: String,
    pub payload: Vec<u8>,
    /// 1 on first delivery. Queues that do not track attempts always report 1.
    pub delivery_attempt: u32,
    pub publish_time: Option<DateTime<Utc>>,
}

impl InboundMessage {
    pub fn new(ack_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        let ack_id = ack_id.into();
        Self {
            message_id: ack_id.clone(),
            ack_id,
            payload: payload.into(),
            delivery_attempt: 1,
            publish_time: None,
        }
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.delivery_attempt = attempt.max(1);
        self
    }
}

/// A decoded topic request.
///
/// `topic` is used verbatim as the cache key: two requests are the same iff their
/// topics are byte-identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Request {
    /// Decode `{"instruction": "<topic>"}`.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` for non-UTF-8 or non-JSON payloads, payloads that are not an
    /// object, and a missing, non-string, or blank `instruction`.
    pub fn decode(payload: &[u8]) -> Result<Self, EnrichError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| EnrichError::DecodeError(format!("payload is not UTF-8: {e}")))?;
        // Derived struct deserializers also accept sequences, so match the object by hand.
        let Value::Object(mut fields) = serde_json::from_str::<Value>(text)? else {
            return Err(EnrichError::DecodeError(
                "payload is not a JSON object".to_string(),
            ));
        };

        match fields.remove("instruction") {
            Some(Value::String(topic)) if !topic.trim().is_empty() => Ok(Self {
                topic,
                payload: payload.to_vec(),
            }),
            Some(Value::String(_)) => Err(EnrichError::DecodeError(
                "`instruction` is empty".to_string(),
            )),
            None | Some(Value::Null) => Err(EnrichError::DecodeError(
                "missing `instruction` field".to_string(),
            )),
            Some(_) => Err(EnrichError::DecodeError(
                "`instruction` is not a string".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOrigin {
    Cached,
    Generated,
    /// The sentinel text substituted after a generation failure.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub topic: String,
    pub text: String,
    pub origin: ArtifactOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// No destination configured.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Nack,
}
