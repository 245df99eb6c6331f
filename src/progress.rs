//! Progress of an ingestion run
//!
//! Read-only: counts the measurements already written for a request and
//! divides by the catalog size. No coordination with the running pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{IngestionError, Result};
use crate::storage::MeasurementStore;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub progress_percent: f64,
}

/// `completed / total * 100`, rounded to two decimals
pub fn progress_percent(completed: u64, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }

    let percent = completed as f64 / total as f64 * 100.0;
    (percent * 100.0).round() / 100.0
}

/// Computes progress for `request_id` against a catalog of `catalog_size` cities
pub async fn get_progress(
    store: &dyn MeasurementStore,
    catalog_size: usize,
    request_id: &str,
) -> Result<Progress> {
    if store.find_request(request_id).await?.is_none() {
        return Err(IngestionError::NotFound(request_id.to_string()));
    }

    let completed = store.count_measurements(request_id).await?;

    Ok(Progress {
        progress_percent: progress_percent(completed, catalog_size),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::NewMeasurement;
    use crate::storage::MemoryStore;

    #[test]
    fn test_rounding() {
        assert_eq!(progress_percent(0, 3), 0.0);
        assert_eq!(progress_percent(1, 3), 33.33);
        assert_eq!(progress_percent(2, 3), 66.67);
        assert_eq!(progress_percent(3, 3), 100.0);
        assert_eq!(progress_percent(1, 8), 12.5);
    }

    #[tokio::test]
    async fn test_unknown_request() {
        let store = MemoryStore::new();

        let result = get_progress(&store, 3, "unknown-id").await;
        assert!(matches!(result, Err(IngestionError::NotFound(id)) if id == "unknown-id"));
    }

    #[tokio::test]
    async fn test_partial_progress() {
        let store = MemoryStore::new();
        store.create_request("run-1").await.unwrap();

        let progress = get_progress(&store, 4, "run-1").await.unwrap();
        assert_eq!(progress.progress_percent, 0.0);

        store
            .insert_measurement(NewMeasurement {
                request_id: "run-1".to_string(),
                city_id: 100,
                temperature_celsius: 25.0,
                humidity: 60.0,
            })
            .await
            .unwrap();

        let progress = get_progress(&store, 4, "run-1").await.unwrap();
        assert_eq!(progress.progress_percent, 25.0);
        assert_eq!(
            serde_json::to_value(progress).unwrap(),
            serde_json::json!({"progress_percent": 25.0})
        );
    }
}
