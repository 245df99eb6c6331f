//! In-process store
//!
//! Used when no database is configured and as the sink in tests. Enforces
//! the same uniqueness and cascade rules as the Postgres schema.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::MeasurementStore;
use crate::error::{IngestionError, Result};
use crate::schemas::{IngestionRequest, Measurement, NewMeasurement};

#[derive(Debug, Default)]
struct State {
    requests: HashMap<String, IngestionRequest>,
    measurements: Vec<Measurement>,
    next_request_id: i64,
    next_measurement_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total measurement rows across all requests
    pub fn measurement_total(&self) -> usize {
        self.state.read().measurements.len()
    }

    /// Total request rows
    pub fn request_total(&self) -> usize {
        self.state.read().requests.len()
    }
}

#[async_trait]
impl MeasurementStore for MemoryStore {
    async fn create_request(&self, request_id: &str) -> Result<IngestionRequest> {
        let mut state = self.state.write();

        if state.requests.contains_key(request_id) {
            return Err(IngestionError::DuplicateRequest(request_id.to_string()));
        }

        state.next_request_id += 1;
        let request = IngestionRequest {
            id: state.next_request_id,
            request_id: request_id.to_string(),
            created_at: Utc::now(),
        };
        state.requests.insert(request_id.to_string(), request.clone());

        Ok(request)
    }

    async fn find_request(&self, request_id: &str) -> Result<Option<IngestionRequest>> {
        Ok(self.state.read().requests.get(request_id).cloned())
    }

    async fn insert_measurement(&self, measurement: NewMeasurement) -> Result<Measurement> {
        let mut state = self.state.write();

        if !state.requests.contains_key(&measurement.request_id) {
            return Err(IngestionError::NotFound(measurement.request_id));
        }

        state.next_measurement_id += 1;
        let row = measurement.into_measurement(state.next_measurement_id);
        state.measurements.push(row.clone());

        Ok(row)
    }

    async fn count_measurements(&self, request_id: &str) -> Result<u64> {
        let state = self.state.read();
        let count = state
            .measurements
            .iter()
            .filter(|m| m.request_id == request_id)
            .count();

        Ok(count as u64)
    }

    async fn list_measurements(&self, request_id: &str) -> Result<Vec<Measurement>> {
        let state = self.state.read();

        Ok(state
            .measurements
            .iter()
            .filter(|m| m.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn delete_request(&self, request_id: &str) -> Result<bool> {
        let mut state = self.state.write();

        if state.requests.remove(request_id).is_none() {
            return Ok(false);
        }
        state.measurements.retain(|m| m.request_id != request_id);

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(request_id: &str, city_id: i64) -> NewMeasurement {
        NewMeasurement {
            request_id: request_id.to_string(),
            city_id,
            temperature_celsius: 25.0,
            humidity: 60.0,
        }
    }

    #[tokio::test]
    async fn test_duplicate_request_rejected() {
        let store = MemoryStore::new();

        store.create_request("run-1").await.unwrap();
        let second = store.create_request("run-1").await;

        assert!(matches!(second, Err(IngestionError::DuplicateRequest(id)) if id == "run-1"));
        assert_eq!(store.request_total(), 1);
    }

    #[tokio::test]
    async fn test_measurement_requires_parent() {
        let store = MemoryStore::new();

        let result = store.insert_measurement(reading("missing", 1)).await;
        assert!(matches!(result, Err(IngestionError::NotFound(_))));
        assert_eq!(store.measurement_total(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_cities_allowed() {
        let store = MemoryStore::new();
        store.create_request("run-1").await.unwrap();

        store.insert_measurement(reading("run-1", 100)).await.unwrap();
        store.insert_measurement(reading("run-1", 100)).await.unwrap();

        assert_eq!(store.count_measurements("run-1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = MemoryStore::new();
        store.create_request("run-1").await.unwrap();
        store.create_request("run-2").await.unwrap();
        store.insert_measurement(reading("run-1", 100)).await.unwrap();
        store.insert_measurement(reading("run-2", 100)).await.unwrap();

        assert!(store.delete_request("run-1").await.unwrap());
        assert!(!store.delete_request("run-1").await.unwrap());

        assert!(store.find_request("run-1").await.unwrap().is_none());
        assert_eq!(store.count_measurements("run-1").await.unwrap(), 0);
        assert_eq!(store.list_measurements("run-2").await.unwrap().len(), 1);
    }
}
