//! Process wiring: configuration, startup health checks, signal handling.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::pipeline::{Collaborators, Pipeline};
use super::runner::{StatsSnapshot, Worker};
use crate::clients::cache_client::{connection_url, redact_url};
use crate::clients::{LlmClient, MessageSource, PubSubClient, RedisCache, Sink, WebhookSink};
use crate::core::config::AppConfig;
use crate::errors::EnrichError;
use crate::prompt::{MessageFormatter, PromptTemplate, Variant};

/// Run the worker for `variant` until SIGINT/SIGTERM.
///
/// # Errors
///
/// `ConfigError` for missing or invalid configuration and `ConnectError` when Redis or
/// the subscription cannot be reached at startup. Both are fatal; nothing is retried.
pub async fn run(variant: Variant) -> Result<StatsSnapshot, EnrichError> {
    let config = AppConfig::from_env()?;
    run_with_config(variant, config).await
}

pub async fn run_with_config(variant: Variant, config: AppConfig) -> Result<StatsSnapshot, EnrichError> {
    info!(variant = variant.name(), "Starting enrichment worker");

    let redis_url = connection_url(&config.redis)?;
    info!(url = %redact_url(redis_url.as_str()), "Connecting to Redis");
    let cache = RedisCache::connect(&config.redis).await?;
    info!("Successfully connected to Redis");

    let source = PubSubClient::new(&config.pubsub);
    source.check().await?;
    info!(subscription = %config.pubsub.subscription_path(), "Listening for messages");

    let template: Arc<dyn PromptTemplate> = Arc::new(variant);
    let formatter: Arc<dyn MessageFormatter> = Arc::new(variant);

    let sink: Option<Arc<dyn Sink>> = match &config.discord_url {
        Some(url) => Some(Arc::new(WebhookSink::new(url.clone()))),
        None => {
            warn!("DISCORD_URL not set, artifacts will not be delivered");
            None
        }
    };

    let collaborators = Collaborators {
        cache: Arc::new(cache),
        generator: Arc::new(LlmClient::new(&config.llm, Arc::clone(&template))),
        sink,
    };
    let pipeline = Pipeline::new(collaborators, template, formatter, &config.worker);
    info!(policy = ?pipeline.policy(), "Pipeline ready");

    let worker = Worker::new(Arc::new(source), Arc::new(pipeline), config.worker.clone());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    let stats = worker.run(shutdown_rx).await;
    info!("Stopped listening");
    Ok(stats)
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
