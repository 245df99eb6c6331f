//! Weather data sources
//!
//! The fetch worker talks to the external API through the `WeatherSource`
//! trait so the pipeline can be driven by any provider.

pub mod openweather;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Readings extracted from one successful API response
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub temperature_celsius: f64,
    pub humidity: f64,
}

/// Trait for current-conditions providers
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Issues one request for one city
    async fn current_conditions(&self, city_id: i64) -> Result<CurrentConditions>;

    /// Gets the source name
    fn name(&self) -> &str;
}

pub use openweather::{OpenWeatherConfig, OpenWeatherSource};
