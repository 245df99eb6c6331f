//! Error types for the weather ingestion service

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Request id already exists: {0}")]
    DuplicateRequest(String),

    #[error("Weather API returned HTTP {status} for city {city_id}")]
    HttpStatus {
        city_id: i64,
        status: u16,
    },

    #[error("Malformed weather response for city {city_id}: {reason}")]
    MalformedResponse {
        city_id: i64,
        reason: String,
    },

    #[error("Request id not found: {0}")]
    NotFound(String),

    #[error("Weather API timed out after {timeout:?} for city {city_id}")]
    Timeout {
        city_id: i64,
        timeout: Duration,
    },

    #[error("Invalid request id: {0}")]
    InvalidRequestId(String),

    #[error("Ingestion cancelled")]
    Cancelled,

    #[error("Catalog error: {0}")]
    CatalogError(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl IngestionError {
    /// Short label used for metrics and run reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateRequest(_) => "duplicate_request",
            Self::HttpStatus { .. } => "http_status",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::NotFound(_) => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::InvalidRequestId(_) => "invalid_request_id",
            Self::Cancelled => "cancelled",
            Self::CatalogError(_) => "catalog",
            Self::HttpError(_) => "http",
            Self::JsonError(_) => "json",
            Self::DatabaseError(_) => "database",
            Self::MigrateError(_) => "migrate",
            Self::ConfigError(_) => "config",
            Self::IoError(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_message() {
        let err = IngestionError::HttpStatus { city_id: 200, status: 500 };
        assert_eq!(err.to_string(), "Weather API returned HTTP 500 for city 200");
        assert_eq!(err.kind(), "http_status");
    }

    #[test]
    fn test_timeout_message() {
        let err = IngestionError::Timeout {
            city_id: 7,
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "Weather API timed out after 5s for city 7");
    }
}
