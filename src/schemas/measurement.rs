//! Measurement Schema
//!
//! One weather reading for one city, written by a fetch worker.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Measurement {
    pub id: i64,
    pub request_id: String,
    pub city_id: i64,
    pub temperature_celsius: f64,
    /// Percentage; not range-checked
    pub humidity: f64,
}

/// Measurement before it has been assigned a storage id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMeasurement {
    pub request_id: String,
    pub city_id: i64,
    pub temperature_celsius: f64,
    pub humidity: f64,
}

impl NewMeasurement {
    pub fn into_measurement(self, id: i64) -> Measurement {
        Measurement {
            id,
            request_id: self.request_id,
            city_id: self.city_id,
            temperature_celsius: self.temperature_celsius,
            humidity: self.humidity,
        }
    }
}
