//! IngestionRequest Schema
//!
//! Parent record of one ingestion run, keyed by the caller-supplied id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IngestionError, Result};

/// Maximum length of a caller-supplied request id (column width)
pub const MAX_REQUEST_ID_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct IngestionRequest {
    pub id: i64,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
}

/// Checks a caller-supplied request id before any work is started
pub fn validate_request_id(request_id: &str) -> Result<()> {
    if request_id.trim().is_empty() {
        return Err(IngestionError::InvalidRequestId(
            "request id must not be empty".to_string(),
        ));
    }

    if request_id.chars().count() > MAX_REQUEST_ID_LEN {
        return Err(IngestionError::InvalidRequestId(format!(
            "request id must be at most {} characters",
            MAX_REQUEST_ID_LEN
        )));
    }

    Ok(())
}
