//! Bounded worker pool fed by a [`MessageSource`].
//!
//! Semaphore permits gate both pulling and handling: a message is only pulled once a
//! permit is free for it, so at most `concurrency` messages are held un-settled.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, error, info, warn};

use super::pipeline::Pipeline;
use crate::clients::MessageSource;
use crate::core::config::WorkerConfig;
use crate::core::models::{AckDecision, InboundMessage};
use crate::errors::EnrichError;

#[derive(Debug, Default)]
pub struct WorkerStats {
    pub received: AtomicU64,
    pub acked: AtomicU64,
    pub nacked: AtomicU64,
    pub settle_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub received: u64,
    pub acked: u64,
    pub nacked: u64,
    pub settle_failures: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            nacked: self.nacked.load(Ordering::Relaxed),
            settle_failures: self.settle_failures.load(Ordering::Relaxed),
        }
    }
}

pub struct Worker {
    source: Arc<dyn MessageSource>,
    pipeline: Arc<Pipeline>,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
}

impl Worker {
    pub fn new(source: Arc<dyn MessageSource>, pipeline: Arc<Pipeline>, config: WorkerConfig) -> Self {
        Self {
            source,
            pipeline,
            config,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Consume until `shutdown` fires (or its sender is dropped), then give in-flight
    /// handlers the configured grace period before aborting them.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> StatsSnapshot {
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut in_flight: JoinSet<()> = JoinSet::new();

        info!(
            concurrency = self.config.concurrency,
            batch_size = self.config.pull_batch_size,
            "Worker started"
        );

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!("Message handler task failed: {}", e);
                }
            }

            let first = tokio::select! {
                _ = shutdown.recv() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let mut batch_permits = vec![first];
            while batch_permits.len() < self.config.pull_batch_size {
                match Arc::clone(&permits).try_acquire_owned() {
                    Ok(permit) => batch_permits.push(permit),
                    Err(_) => break,
                }
            }

            let pulled = tokio::select! {
                _ = shutdown.recv() => break,
                pulled = self.pull_with_retry(batch_permits.len()) => pulled,
            };

            match pulled {
                Ok(messages) if messages.is_empty() => {
                    drop(batch_permits);
                    if self.idle(&mut shutdown).await {
                        break;
                    }
                }
                Ok(mut messages) => {
                    if messages.len() > batch_permits.len() {
                        let surplus = messages.split_off(batch_permits.len());
                        warn!(count = surplus.len(), "Source returned more messages than requested");
                        self.release(surplus).await;
                    }
                    self.stats
                        .received
                        .fetch_add(messages.len() as u64, Ordering::Relaxed);
                    for (message, permit) in messages.into_iter().zip(batch_permits) {
                        self.dispatch(&mut in_flight, message, permit);
                    }
                }
                Err(e) => {
                    drop(batch_permits);
                    error!("Failed to pull messages: {}", e);
                    if self.idle(&mut shutdown).await {
                        break;
                    }
                }
            }
        }

        info!(in_flight = in_flight.len(), "Shutting down worker");
        self.drain(&mut in_flight).await;

        let snapshot = self.stats.snapshot();
        info!(?snapshot, "Worker stopped");
        snapshot
    }

    fn dispatch(&self, in_flight: &mut JoinSet<()>, message: InboundMessage, permit: OwnedSemaphorePermit) {
        let pipeline = Arc::clone(&self.pipeline);
        let source = Arc::clone(&self.source);
        let stats = Arc::clone(&self.stats);

        in_flight.spawn(async move {
            let _permit = permit;
            let decision = pipeline.handle(&message).await;
            settle(source.as_ref(), &stats, &message, decision).await;
        });
    }

    async fn pull_with_retry(&self, max_messages: usize) -> Result<Vec<InboundMessage>, EnrichError> {
        // 100ms, 200ms, 400ms before jitter
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(50)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(3);
        Retry::spawn(strategy, || self.source.pull(max_messages)).await
    }

    /// Returns `true` if shutdown was requested while idling.
    async fn idle(&self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        tokio::select! {
            _ = shutdown.recv() => true,
            () = tokio::time::sleep(self.config.poll_interval) => false,
        }
    }

    async fn release(&self, messages: Vec<InboundMessage>) {
        let ack_ids: Vec<String> = messages.into_iter().map(|m| m.ack_id).collect();
        if let Err(e) = self.source.nack(&ack_ids).await {
            warn!("Failed to release surplus messages: {}", e);
        }
    }

    async fn drain(&self, in_flight: &mut JoinSet<()>) {
        let grace = self.config.shutdown_grace;
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    error!("Message handler task failed: {}", e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = in_flight.len(),
                grace = ?grace,
                "Grace period elapsed, aborting in-flight messages; they will be redelivered"
            );
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
        }
    }
}

async fn settle(
    source: &dyn MessageSource,
    stats: &WorkerStats,
    message: &InboundMessage,
    decision: AckDecision,
) {
    let ack_ids = [message.ack_id.clone()];
    let result = match decision {
        AckDecision::Ack => source.ack(&ack_ids).await,
        AckDecision::Nack => source.nack(&ack_ids).await,
    };

    match result {
        Ok(()) => {
            let counter = match decision {
                AckDecision::Ack => &stats.acked,
                AckDecision::Nack => &stats.nacked,
            };
            counter.fetch_add(1, Ordering::Relaxed);
            debug!(message_id = %message.message_id, ?decision, "Settled message");
        }
        Err(e) => {
            stats.settle_failures.fetch_add(1, Ordering::Relaxed);
            error!(
                message_id = %message.message_id,
                ?decision,
                "Failed to settle message, it will be redelivered: {}",
                e
            );
        }
    }
}
