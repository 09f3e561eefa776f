//! Enricher - queue-driven workers that turn a topic into a short generated text and
//! forward it to a chat webhook.
//!
//! Two variants share one pipeline and differ only in prompt and message format:
//! motorcycle-brand facts and jokes.
//!
//! # Architecture
//!
//! The system uses:
//! - Google Cloud Pub/Sub (REST pull) as the inbound at-least-once source
//! - Redis as a cache-aside store keyed by the raw topic string
//! - An OpenAI-compatible completions server (e.g. llama.cpp) for generation
//! - A Discord-style webhook as the outbound sink
//! - Tokio for the async runtime and the bounded worker pool
//!
//! # Example
//!
//! ```no_run
//! use enricher::prompt::Variant;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Set up structured logging
//!     enricher::setup_logging();
//!
//!     // Reads GCP_PROJECT_ID, PUBSUB_SUBSCRIPTION_ID, REDIS_HOST, ... from the environment
//!     // and runs until SIGINT/SIGTERM.
//!     let stats = enricher::worker::run(Variant::MotorcycleFacts).await?;
//!     println!("acked {} messages", stats.acked);
//!
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod clients;
pub mod core;
pub mod errors;
pub mod prompt;
pub mod worker;

/// Configure structured JSON logging.
///
/// The level comes from `RUST_LOG` and defaults to `info`. Calling this more than once is
/// harmless; later calls leave the first subscriber in place.
///
/// # Example
///
/// ```
/// enricher::setup_logging();
/// ```
pub fn setup_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
