//! In-memory stand-ins for the worker's collaborators.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use enricher::clients::{ArtifactCache, MessageSource, Sink, TextGenerator};
use enricher::core::config::{FailurePolicy, WorkerConfig};
use enricher::core::models::InboundMessage;
use enricher::errors::EnrichError;
use enricher::prompt::Variant;
use enricher::worker::{Collaborators, Pipeline};

#[derive(Default)]
pub struct MemoryCache {
    pub entries: Mutex<HashMap<String, String>>,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub stall_reads: AtomicBool,
    pub stall_writes: AtomicBool,
}

impl MemoryCache {
    pub fn with_entry(key: &str, value: &str) -> Self {
        let cache = Self::default();
        cache
            .entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        cache
    }

    pub fn entry(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst) + self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, EnrichError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.stall_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(EnrichError::CacheError("connection refused".to_string()));
        }
        Ok(self.entry(key))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), EnrichError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EnrichError::CacheError("connection reset".to_string()));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), EnrichError> {
        Ok(())
    }
}

pub struct StubGenerator {
    reply: Result<String, String>,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
    pub topics: Mutex<Vec<String>>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl StubGenerator {
    pub fn replying(text: &str) -> Self {
        Self::new(Ok(text.to_string()))
    }

    pub fn failing(reason: &str) -> Self {
        Self::new(Err(reason.to_string()))
    }

    fn new(reply: Result<String, String>) -> Self {
        Self {
            reply,
            delay: None,
            calls: AtomicUsize::new(0),
            topics: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn generate(&self, topic: &str) -> Result<String, EnrichError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.topics.lock().unwrap().push(topic.to_string());

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        self.reply
            .clone()
            .map_err(EnrichError::GenerationError)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub delivered: Mutex<Vec<String>>,
    pub fail: AtomicBool,
    pub stall: AtomicBool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.fail.store(true, Ordering::SeqCst);
        sink
    }

    /// A sink whose deliveries never complete.
    pub fn stalled() -> Self {
        let sink = Self::default();
        sink.stall.store(true, Ordering::SeqCst);
        sink
    }

    pub fn messages(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn deliver(&self, message: &str) -> Result<(), EnrichError> {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.delivered.lock().unwrap().push(message.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(EnrichError::DeliveryError("webhook returned 500".to_string()));
        }
        Ok(())
    }
}

/// A queue that hands out its messages once and records how each was settled.
#[derive(Default)]
pub struct QueueSource {
    pending: Mutex<VecDeque<InboundMessage>>,
    pub acked: Mutex<Vec<String>>,
    pub nacked: Mutex<Vec<String>>,
    pub pulls: AtomicUsize,
    pub failing_pulls: AtomicUsize,
}

impl QueueSource {
    pub fn with_messages(messages: Vec<InboundMessage>) -> Self {
        let source = Self::default();
        source.pending.lock().unwrap().extend(messages);
        source
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn nacked(&self) -> Vec<String> {
        self.nacked.lock().unwrap().clone()
    }

    pub fn settled(&self) -> usize {
        self.acked.lock().unwrap().len() + self.nacked.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageSource for QueueSource {
    async fn pull(&self, max_messages: usize) -> Result<Vec<InboundMessage>, EnrichError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_pulls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EnrichError::QueueError("503 Service Unavailable".to_string()));
        }

        let mut pending = self.pending.lock().unwrap();
        let take = max_messages.min(pending.len());
        Ok(pending.drain(..take).collect())
    }

    async fn ack(&self, ack_ids: &[String]) -> Result<(), EnrichError> {
        self.acked.lock().unwrap().extend_from_slice(ack_ids);
        Ok(())
    }

    async fn nack(&self, ack_ids: &[String]) -> Result<(), EnrichError> {
        self.nacked.lock().unwrap().extend_from_slice(ack_ids);
        Ok(())
    }

    async fn check(&self) -> Result<(), EnrichError> {
        Ok(())
    }
}

pub fn message(ack_id: &str, payload: &str) -> InboundMessage {
    InboundMessage::new(ack_id, payload.as_bytes())
}

pub fn instruction(ack_id: &str, topic: &str) -> InboundMessage {
    let payload = serde_json::json!({ "instruction": topic }).to_string();
    InboundMessage::new(ack_id, payload.into_bytes())
}

pub fn test_config(policy: FailurePolicy) -> WorkerConfig {
    WorkerConfig {
        concurrency: 2,
        pull_batch_size: 10,
        poll_interval: Duration::from_millis(10),
        shutdown_grace: Duration::from_secs(5),
        cache_timeout: Duration::from_millis(200),
        generation_timeout: Duration::from_secs(2),
        sink_timeout: Duration::from_millis(200),
        failure_policy: policy,
    }
}

pub fn build_pipeline(
    cache: &Arc<MemoryCache>,
    generator: &Arc<StubGenerator>,
    sink: Option<&Arc<RecordingSink>>,
    variant: Variant,
    config: &WorkerConfig,
) -> Pipeline {
    let collaborators = Collaborators {
        cache: Arc::clone(cache) as Arc<dyn ArtifactCache>,
        generator: Arc::clone(generator) as Arc<dyn TextGenerator>,
        sink: sink.map(|s| Arc::clone(s) as Arc<dyn Sink>),
    };
    Pipeline::new(collaborators, Arc::new(variant), Arc::new(variant), config)
}

/// Poll `condition` every few milliseconds until it holds or `limit` elapses.
pub async fn wait_until<F: Fn() -> bool>(condition: F, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub mod http;
