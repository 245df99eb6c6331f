//! Weather Ingestion Service
//!
//! Fetches current weather for a fixed city catalog from a third-party API
//! on demand, under a client-side rate limit, and records one measurement
//! per city against a caller-supplied request id.
//!
//! Features:
//! - Per-run permit pool plus fixed launch pacing
//! - Cooperative fan-out of one fetch per city
//! - Collect-all or fail-fast failure policy
//! - Progress reporting while a run is in flight
//! - Postgres (sqlx) or in-memory persistence
//! - HTTP trigger/progress API and Prometheus metrics

pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod progress;
pub mod rate_limiter;
pub mod schemas;
pub mod service;
pub mod sources;
pub mod storage;

pub use catalog::CityCatalog;
pub use config::Config;
pub use error::{IngestionError, Result};
pub use pipeline::{FailurePolicy, IngestionPipeline, PipelineConfig, RunReport};
pub use progress::Progress;
pub use rate_limiter::{RateLimitConfig, RunRateLimiter};
pub use service::IngestionService;
