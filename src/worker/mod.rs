//! Message consumption: per-message pipeline, worker pool, and process bootstrap

pub mod bootstrap;
pub mod pipeline;
pub mod runner;

pub use bootstrap::run;
pub use pipeline::{Collaborators, Pipeline};
pub use runner::{StatsSnapshot, Worker, WorkerStats};
