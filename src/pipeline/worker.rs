//! Fetch worker
//!
//! One worker per city: one request to the weather source, then one
//! measurement write. Nothing is written when either step fails.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::Result;
use crate::metrics::{self, InFlightGuard};
use crate::rate_limiter::LaunchPermit;
use crate::schemas::{Measurement, NewMeasurement};
use crate::sources::WeatherSource;
use crate::storage::MeasurementStore;

/// Settled result of one worker
#[derive(Debug)]
pub struct WorkerOutcome {
    pub city_id: i64,
    pub result: Result<Measurement>,
}

/// Fetches current conditions for one city and persists them
pub async fn fetch_and_store(
    source: &dyn WeatherSource,
    store: &dyn MeasurementStore,
    request_id: &str,
    city_id: i64,
) -> Result<Measurement> {
    let conditions = source.current_conditions(city_id).await?;

    let measurement = store
        .insert_measurement(NewMeasurement {
            request_id: request_id.to_string(),
            city_id,
            temperature_celsius: conditions.temperature_celsius,
            humidity: conditions.humidity,
        })
        .await?;

    debug!(
        request_id = %request_id,
        city_id,
        temperature_celsius = measurement.temperature_celsius,
        humidity = measurement.humidity,
        "Measurement stored"
    );

    Ok(measurement)
}

/// Runs one worker while holding its launch permit
pub(crate) async fn run_worker(
    source: Arc<dyn WeatherSource>,
    store: Arc<dyn MeasurementStore>,
    request_id: Arc<str>,
    city_id: i64,
    permit: LaunchPermit,
) -> WorkerOutcome {
    let _in_flight = InFlightGuard::new();
    let started = Instant::now();

    let result = fetch_and_store(source.as_ref(), store.as_ref(), &request_id, city_id).await;

    let outcome = match &result {
        Ok(_) => {
            metrics::record_measurement_written();
            metrics::OUTCOME_SUCCESS
        }
        Err(e) => {
            warn!(
                request_id = %request_id,
                city_id,
                source = source.name(),
                error = %e,
                "City fetch failed"
            );
            e.kind()
        }
    };
    metrics::record_fetch(outcome, started.elapsed().as_secs_f64());

    drop(permit);
    WorkerOutcome { city_id, result }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestionError;
    use crate::sources::CurrentConditions;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;

    struct FixedSource(Option<CurrentConditions>);

    #[async_trait]
    impl WeatherSource for FixedSource {
        async fn current_conditions(&self, city_id: i64) -> Result<CurrentConditions> {
            self.0.ok_or(IngestionError::HttpStatus { city_id, status: 503 })
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_success_writes_one_row() {
        let store = MemoryStore::new();
        store.create_request("run-1").await.unwrap();
        let source = FixedSource(Some(CurrentConditions {
            temperature_celsius: 25.0,
            humidity: 60.0,
        }));

        let row = fetch_and_store(&source, &store, "run-1", 100).await.unwrap();

        assert_eq!(row.city_id, 100);
        assert_eq!(row.temperature_celsius, 25.0);
        assert_eq!(row.humidity, 60.0);
        assert_eq!(store.count_measurements("run-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failure_writes_nothing() {
        let store = MemoryStore::new();
        store.create_request("run-1").await.unwrap();

        let result = fetch_and_store(&FixedSource(None), &store, "run-1", 100).await;

        assert!(matches!(
            result,
            Err(IngestionError::HttpStatus { city_id: 100, status: 503 })
        ));
        assert_eq!(store.measurement_total(), 0);
    }
}
