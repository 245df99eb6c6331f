//! Persistence sink for ingestion runs
//!
//! The pipeline only needs create semantics plus a uniqueness constraint on
//! the request id; everything else here serves the progress read path and
//! administration.

mod memory;
mod postgres;

use async_trait::async_trait;

use crate::error::Result;
use crate::schemas::{IngestionRequest, Measurement, NewMeasurement};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Durable store for requests and their measurements
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    /// Creates the parent record. Fails with `DuplicateRequest` if the id exists.
    async fn create_request(&self, request_id: &str) -> Result<IngestionRequest>;

    async fn find_request(&self, request_id: &str) -> Result<Option<IngestionRequest>>;

    /// Writes one measurement. Fails with `NotFound` if the owning request is gone.
    async fn insert_measurement(&self, measurement: NewMeasurement) -> Result<Measurement>;

    async fn count_measurements(&self, request_id: &str) -> Result<u64>;

    async fn list_measurements(&self, request_id: &str) -> Result<Vec<Measurement>>;

    /// Deletes a request and, by cascade, its measurements
    async fn delete_request(&self, request_id: &str) -> Result<bool>;
}
