//! Ingestion orchestrator
//!
//! Runs one ingestion for one request id:
//! 1. create the parent request row (duplicates abort before any fetch)
//! 2. launch one fetch worker per catalog city, in catalog order, each
//!    gated by the run's rate limiter
//! 3. wait for every launched worker to settle
//!
//! All workers of a run are driven cooperatively by the run's own future
//! (a `FuturesUnordered` polled alongside the launch loop), so a run is a
//! single task on the runtime and never spawns per-city tasks. The only
//! shared mutable state is the limiter's permit pool and the store.

pub mod worker;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::catalog::CityCatalog;
use crate::config::Config;
use crate::error::{IngestionError, Result};
use crate::metrics;
use crate::rate_limiter::{RateLimitConfig, RunRateLimiter};
use crate::schemas::validate_request_id;
use crate::sources::WeatherSource;
use crate::storage::MeasurementStore;

use worker::{run_worker, WorkerOutcome};

type InFlight = FuturesUnordered<BoxFuture<'static, WorkerOutcome>>;

// ============================================
// PIPELINE CONFIGURATION
// ============================================

/// What a run does when a city fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Wait for every worker, report failures per city
    #[default]
    CollectAll,
    /// Launch every city, then return the first worker error; workers still
    /// in flight finish detached
    FailFast,
}

impl FromStr for FailurePolicy {
    type Err = IngestionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "collect_all" => Ok(Self::CollectAll),
            "fail_fast" => Ok(Self::FailFast),
            _ => Err(IngestionError::ConfigError(config::ConfigError::Message(
                format!("Unknown failure policy: {}", s),
            ))),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CollectAll => write!(f, "collect_all"),
            Self::FailFast => write!(f, "fail_fast"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineConfig {
    pub rate_limit: RateLimitConfig,
    pub failure_policy: FailurePolicy,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            rate_limit: config.rate_limit_config(),
            failure_policy: config.failure_policy()?,
        })
    }
}

// ============================================
// RUN REPORT
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityFailure {
    pub city_id: i64,
    pub kind: String,
    pub error: String,
}

impl CityFailure {
    fn new(city_id: i64, error: &IngestionError) -> Self {
        Self {
            city_id,
            kind: error.kind().to_string(),
            error: error.to_string(),
        }
    }
}

/// Outcome of a run whose workers all settled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub request_id: String,
    pub policy: FailurePolicy,
    pub total_cities: usize,
    pub launched: usize,
    pub succeeded: usize,
    pub failures: Vec<CityFailure>,
    pub elapsed_ms: u64,
}

impl RunReport {
    /// Every catalog city produced a measurement
    pub fn is_complete(&self) -> bool {
        self.succeeded == self.total_cities
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

/// Tally of settled workers
struct Settled {
    policy: FailurePolicy,
    succeeded: usize,
    failures: Vec<CityFailure>,
    /// First error under fail-fast, held until every city has been launched
    first_error: Option<IngestionError>,
}

impl Settled {
    fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            succeeded: 0,
            failures: Vec::new(),
            first_error: None,
        }
    }

    fn record(&mut self, outcome: WorkerOutcome) {
        match outcome.result {
            Ok(_) => self.succeeded += 1,
            Err(e) => match self.policy {
                FailurePolicy::FailFast => {
                    if self.first_error.is_none() {
                        self.first_error = Some(e);
                    }
                }
                FailurePolicy::CollectAll => {
                    self.failures.push(CityFailure::new(outcome.city_id, &e));
                }
            },
        }
    }
}

// ============================================
// PIPELINE
// ============================================

/// Fetch-and-persist orchestrator for the city catalog
pub struct IngestionPipeline {
    catalog: CityCatalog,
    source: Arc<dyn WeatherSource>,
    store: Arc<dyn MeasurementStore>,
    config: PipelineConfig,
    /// Owns workers left running after a fail-fast return
    detached: TaskTracker,
}

impl IngestionPipeline {
    pub fn new(
        catalog: CityCatalog,
        source: Arc<dyn WeatherSource>,
        store: Arc<dyn MeasurementStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            catalog,
            source,
            store,
            config,
            detached: TaskTracker::new(),
        }
    }

    pub fn catalog(&self) -> &CityCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn MeasurementStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Tracker holding in-flight workers abandoned by fail-fast runs
    ///
    /// Close and wait on it to let their writes land before exiting.
    pub fn detached(&self) -> &TaskTracker {
        &self.detached
    }

    /// Runs one ingestion to completion
    pub async fn run(&self, request_id: &str) -> Result<RunReport> {
        self.run_with_cancel(request_id, CancellationToken::new()).await
    }

    /// Runs one ingestion; cancelling `cancel` stops further launches
    ///
    /// Workers already launched are still awaited before `Cancelled` is
    /// returned, so their writes are settled when this returns. A worker
    /// failure never stops launching; under fail-fast it is returned once
    /// the whole catalog has been launched.
    #[instrument(skip(self, cancel), fields(run_id = tracing::field::Empty))]
    pub async fn run_with_cancel(
        &self,
        request_id: &str,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        validate_request_id(request_id)?;

        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::Span::current().record("run_id", run_id.as_str());
        let started = Instant::now();

        // Constraint violations propagate untouched: no fetch happens for a duplicate id
        let request = self.store.create_request(request_id).await?;
        let request_id: Arc<str> = Arc::from(request.request_id.as_str());

        let limiter = RunRateLimiter::new(self.config.rate_limit, cancel);

        info!(
            cities = self.catalog.len(),
            rate_limit = self.config.rate_limit.rate_limit,
            pacing = ?limiter.pacing_interval(),
            policy = %self.config.failure_policy,
            "Starting ingestion run"
        );

        let mut in_flight: InFlight = FuturesUnordered::new();
        let mut settled = Settled::new(self.config.failure_policy);
        let mut launched = 0usize;
        let mut interrupted = None;

        for city_id in self.catalog.iter() {
            let permit = match drive(&mut in_flight, &mut settled, limiter.acquire()).await {
                Ok(permit) => permit,
                Err(e) => {
                    interrupted = Some(e);
                    break;
                }
            };

            debug!(city_id, in_flight = limiter.in_flight(), "Launching fetch");
            let worker = run_worker(
                self.source.clone(),
                self.store.clone(),
                request_id.clone(),
                city_id,
                permit,
            )
            .instrument(tracing::debug_span!("fetch", city_id));
            in_flight.push(worker.boxed());
            launched += 1;

            if let Err(e) = drive(&mut in_flight, &mut settled, limiter.pace()).await {
                interrupted = Some(e);
                break;
            }
        }

        match interrupted {
            Some(IngestionError::Cancelled) => {
                warn!(
                    launched,
                    remaining = self.catalog.len() - launched,
                    "Run cancelled, waiting for launched fetches"
                );
                while let Some(outcome) = in_flight.next().await {
                    settled.record(outcome);
                }
                metrics::record_run(IngestionError::Cancelled.kind());
                return Err(IngestionError::Cancelled);
            }
            Some(e) => {
                abandon(in_flight, &request_id, &self.detached);
                metrics::record_run(e.kind());
                return Err(e);
            }
            None => {
                if let Err(e) = drain(in_flight, &mut settled, &request_id, &self.detached).await {
                    metrics::record_run(e.kind());
                    return Err(e);
                }
            }
        }

        let report = RunReport {
            run_id,
            request_id: request_id.to_string(),
            policy: self.config.failure_policy,
            total_cities: self.catalog.len(),
            launched,
            succeeded: settled.succeeded,
            failures: settled.failures,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        if report.failures.is_empty() {
            metrics::record_run(metrics::OUTCOME_SUCCESS);
            info!(
                succeeded = report.succeeded,
                elapsed = ?report.elapsed(),
                "Ingestion run completed"
            );
        } else {
            metrics::record_run("partial");
            warn!(
                succeeded = report.succeeded,
                failed = report.failures.len(),
                elapsed = ?report.elapsed(),
                "Ingestion run completed with failures"
            );
        }

        Ok(report)
    }
}

/// Awaits `wait` while continuing to drive in-flight workers
async fn drive<F, T>(in_flight: &mut InFlight, settled: &mut Settled, wait: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::pin!(wait);

    loop {
        tokio::select! {
            biased;
            Some(outcome) = in_flight.next(), if !in_flight.is_empty() => {
                settled.record(outcome);
            }
            result = &mut wait => return result,
        }
    }
}

/// Waits for every remaining worker
///
/// Under fail-fast the first failure stops the wait and the rest are abandoned.
async fn drain(
    mut in_flight: InFlight,
    settled: &mut Settled,
    request_id: &Arc<str>,
    detached: &TaskTracker,
) -> Result<()> {
    loop {
        if let Some(e) = settled.first_error.take() {
            abandon(in_flight, request_id, detached);
            return Err(e);
        }
        match in_flight.next().await {
            Some(outcome) => settled.record(outcome),
            None => return Ok(()),
        }
    }
}

/// Lets in-flight workers finish on their own after a fail-fast return
fn abandon(mut in_flight: InFlight, request_id: &Arc<str>, detached: &TaskTracker) {
    if in_flight.is_empty() {
        return;
    }

    warn!(
        request_id = %request_id,
        orphaned = in_flight.len(),
        "Returning early, in-flight fetches continue unobserved"
    );

    detached.spawn(async move {
        while let Some(outcome) = in_flight.next().await {
            debug!(
                city_id = outcome.city_id,
                ok = outcome.result.is_ok(),
                "Orphaned fetch settled"
            );
        }
    });
}
