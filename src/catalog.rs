//! City Catalog
//!
//! The fixed, ordered list of external city identifiers fetched on every
//! ingestion run. Built once at start and shared read-only afterwards.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::error::{IngestionError, Result};

/// Immutable ordered set of city ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityCatalog {
    city_ids: Arc<[i64]>,
}

impl CityCatalog {
    /// Creates a catalog, preserving the given order
    pub fn new(city_ids: impl Into<Vec<i64>>) -> Result<Self> {
        let city_ids = city_ids.into();
        if city_ids.is_empty() {
            return Err(IngestionError::CatalogError(
                "city catalog must contain at least one city".to_string(),
            ));
        }

        Ok(Self {
            city_ids: city_ids.into(),
        })
    }

    /// Loads a catalog from a JSON file holding an array of integers
    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        let city_ids: Vec<i64> = serde_json::from_str(&contents)?;

        info!(
            path = %path.display(),
            cities = city_ids.len(),
            "Loaded city catalog"
        );

        Self::new(city_ids)
    }

    pub fn len(&self) -> usize {
        self.city_ids.len()
    }

    /// Always false for a constructed catalog
    pub fn is_empty(&self) -> bool {
        self.city_ids.is_empty()
    }

    /// City ids in catalog order
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.city_ids.iter().copied()
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.city_ids
    }
}
