//! Adapters for the worker's external collaborators

pub mod cache_client;
pub mod llm_client;
pub mod pubsub_client;
pub mod webhook_client;

pub use cache_client::{ArtifactCache, RedisCache};
pub use llm_client::{LlmClient, TextGenerator};
pub use pubsub_client::{MessageSource, PubSubClient};
pub use webhook_client::{Sink, WebhookSink};
