//! Trigger and progress interface
//!
//! `start_ingestion` hands a run to the runtime and returns at once; the
//! caller never waits for, or sees, per-city failures. Runs are tracked so
//! shutdown can cancel pending launches and wait for them to settle.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn, Instrument};

use crate::error::{IngestionError, Result};
use crate::pipeline::IngestionPipeline;
use crate::progress::{self, Progress};
use crate::schemas::validate_request_id;

/// Acknowledgment returned by `start_ingestion`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub message: String,
    pub request_id: String,
}

#[derive(Clone)]
pub struct IngestionService {
    pipeline: Arc<IngestionPipeline>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl IngestionService {
    pub fn new(pipeline: Arc<IngestionPipeline>) -> Self {
        Self {
            pipeline,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn pipeline(&self) -> &Arc<IngestionPipeline> {
        &self.pipeline
    }

    /// Begins an ingestion run in the background
    pub fn start_ingestion(&self, request_id: &str) -> Result<Ack> {
        validate_request_id(request_id)?;

        if self.shutdown.is_cancelled() {
            return Err(IngestionError::Cancelled);
        }

        let pipeline = self.pipeline.clone();
        let cancel = self.shutdown.child_token();
        let id = request_id.to_string();
        let span = tracing::info_span!("ingestion", request_id = %id);

        self.tracker.spawn(
            async move {
                match pipeline.run_with_cancel(&id, cancel).await {
                    Ok(report) if report.failures.is_empty() => {
                        info!(succeeded = report.succeeded, "Background run finished");
                    }
                    Ok(report) => {
                        warn!(
                            succeeded = report.succeeded,
                            failed = report.failures.len(),
                            "Background run finished incomplete"
                        );
                    }
                    Err(IngestionError::Cancelled) => {
                        warn!("Background run cancelled by shutdown");
                    }
                    Err(e) => {
                        error!(error = %e, kind = e.kind(), "Background run failed");
                    }
                }
            }
            .instrument(span),
        );

        info!(request_id = %request_id, "Ingestion dispatched");

        Ok(Ack {
            message: "ingestion started".to_string(),
            request_id: request_id.to_string(),
        })
    }

    /// Reads current progress for a request
    pub async fn get_progress(&self, request_id: &str) -> Result<Progress> {
        progress::get_progress(
            self.pipeline.store().as_ref(),
            self.pipeline.catalog().len(),
            request_id,
        )
        .await
    }

    /// Number of runs still executing
    pub fn active_runs(&self) -> usize {
        self.tracker.len()
    }

    /// Cancels pending launches and waits for every run to settle
    ///
    /// Workers a fail-fast run left behind are waited for too, so their
    /// writes land before this returns.
    pub async fn shutdown(&self) {
        info!(active_runs = self.active_runs(), "Shutting down ingestion service...");

        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        let detached = self.pipeline.detached();
        detached.close();
        detached.wait().await;

        info!("Ingestion service stopped");
    }
}
