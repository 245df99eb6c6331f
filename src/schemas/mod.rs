//! Data model for ingestion runs
//!
//! An `IngestionRequest` owns the `Measurement` rows written by its run;
//! deleting the request cascades to them.

pub mod ingestion_request;
pub mod measurement;

pub use ingestion_request::*;
pub use measurement::*;
