//! Postgres-backed store

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info, instrument};

use super::MeasurementStore;
use crate::error::{IngestionError, Result};
use crate::schemas::{IngestionRequest, Measurement, NewMeasurement};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Store backed by a sqlx connection pool
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    /// Connects to the database
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("Connecting to database...");

        let db = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Storage initialized");

        Ok(Self { db })
    }

    pub fn from_pool(db: PgPool) -> Self {
        Self { db }
    }

    /// Applies the embedded schema migrations
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.db).await?;
        info!("Database migrations applied");
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

#[async_trait]
impl MeasurementStore for PgStore {
    async fn create_request(&self, request_id: &str) -> Result<IngestionRequest> {
        let result = sqlx::query_as::<_, IngestionRequest>(
            r#"
            INSERT INTO ingestion_requests (request_id, created_at)
            VALUES ($1, NOW())
            RETURNING id, request_id, created_at
            "#,
        )
        .bind(request_id)
        .fetch_one(&self.db)
        .await;

        match result {
            Ok(request) => {
                debug!(request_id = %request_id, "Created ingestion request");
                Ok(request)
            }
            Err(e) if is_unique_violation(&e) => {
                Err(IngestionError::DuplicateRequest(request_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_request(&self, request_id: &str) -> Result<Option<IngestionRequest>> {
        let request = sqlx::query_as::<_, IngestionRequest>(
            "SELECT id, request_id, created_at FROM ingestion_requests WHERE request_id = $1",
        )
        .bind(request_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(request)
    }

    async fn insert_measurement(&self, measurement: NewMeasurement) -> Result<Measurement> {
        let result = sqlx::query_as::<_, Measurement>(
            r#"
            INSERT INTO measurements (request_id, city_id, temperature_celsius, humidity)
            VALUES ($1, $2, $3, $4)
            RETURNING id, request_id, city_id, temperature_celsius, humidity
            "#,
        )
        .bind(&measurement.request_id)
        .bind(measurement.city_id)
        .bind(measurement.temperature_celsius)
        .bind(measurement.humidity)
        .fetch_one(&self.db)
        .await;

        match result {
            Ok(row) => Ok(row),
            Err(e) if is_foreign_key_violation(&e) => {
                Err(IngestionError::NotFound(measurement.request_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn count_measurements(&self, request_id: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM measurements WHERE request_id = $1")
                .bind(request_id)
                .fetch_one(&self.db)
                .await?;

        Ok(count.max(0) as u64)
    }

    async fn list_measurements(&self, request_id: &str) -> Result<Vec<Measurement>> {
        let rows = sqlx::query_as::<_, Measurement>(
            r#"
            SELECT id, request_id, city_id, temperature_celsius, humidity
            FROM measurements
            WHERE request_id = $1
            ORDER BY id
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }

    async fn delete_request(&self, request_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ingestion_requests WHERE request_id = $1")
            .bind(request_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
