//! OpenWeatherMap current weather source
//!
//! `GET <base_url>?id=<city_id>&appid=<api_key>&units=metric`, reading
//! `main.temp` and `main.humidity` from the body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{CurrentConditions, WeatherSource};
use crate::error::{IngestionError, Result};

pub const DEFAULT_API_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

#[derive(Debug, Clone)]
pub struct OpenWeatherConfig {
    pub base_url: Url,
    pub api_key: String,
    /// Per-request deadline. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// User agent string
    pub user_agent: String,
}

impl OpenWeatherConfig {
    pub fn new(base_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            base_url,
            api_key: api_key.into(),
            request_timeout: None,
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("weather-ingestion/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CurrentWeatherResponse {
    main: MainReadings,
}

#[derive(Debug, Deserialize)]
struct MainReadings {
    temp: f64,
    humidity: f64,
}

/// OpenWeatherMap client
#[derive(Debug, Clone)]
pub struct OpenWeatherSource {
    client: Client,
    base_url: Url,
    api_key: String,
    request_timeout: Option<Duration>,
}

impl OpenWeatherSource {
    pub fn new(config: OpenWeatherConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url,
            api_key: config.api_key,
            request_timeout: config.request_timeout,
        })
    }

    /// Maps transport failures, keeping the API key out of the error text
    fn transport_error(&self, city_id: i64, err: reqwest::Error) -> IngestionError {
        match self.request_timeout {
            Some(timeout) if err.is_timeout() => IngestionError::Timeout { city_id, timeout },
            _ => IngestionError::HttpError(err.without_url()),
        }
    }
}

/// Extracts readings from a response body
pub fn parse_current_conditions(city_id: i64, body: &str) -> Result<CurrentConditions> {
    let response: CurrentWeatherResponse =
        serde_json::from_str(body).map_err(|e| IngestionError::MalformedResponse {
            city_id,
            reason: e.to_string(),
        })?;

    Ok(CurrentConditions {
        temperature_celsius: response.main.temp,
        humidity: response.main.humidity,
    })
}

#[async_trait]
impl WeatherSource for OpenWeatherSource {
    async fn current_conditions(&self, city_id: i64) -> Result<CurrentConditions> {
        let city = city_id.to_string();

        debug!(
            city_id,
            url = %self.base_url,
            "Requesting current weather"
        );

        let mut request = self.client.get(self.base_url.clone()).query(&[
            ("id", city.as_str()),
            ("appid", self.api_key.as_str()),
            ("units", "metric"),
        ]);
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(city_id, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestionError::HttpStatus {
                city_id,
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(city_id, e))?;

        parse_current_conditions(city_id, &body)
    }

    fn name(&self) -> &str {
        "openweather"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_response() {
        let body = r#"{
            "coord": {"lon": -56.1674, "lat": -34.8335},
            "weather": [{"id": 800, "main": "Clear"}],
            "main": {"temp": 25.0, "feels_like": 24.6, "pressure": 1015, "humidity": 60},
            "id": 3441575,
            "name": "Montevideo"
        }"#;

        let conditions = parse_current_conditions(3441575, body).unwrap();
        assert_eq!(conditions.temperature_celsius, 25.0);
        assert_eq!(conditions.humidity, 60.0);
    }

    #[test]
    fn test_parse_missing_main() {
        let result = parse_current_conditions(100, r#"{"cod": 200, "name": "Nowhere"}"#);
        assert!(matches!(
            result,
            Err(IngestionError::MalformedResponse { city_id: 100, .. })
        ));
    }

    #[test]
    fn test_parse_wrong_type() {
        let result = parse_current_conditions(100, r#"{"main": {"temp": "hot", "humidity": 60}}"#);
        assert!(matches!(result, Err(IngestionError::MalformedResponse { .. })));
    }

    #[test]
    fn test_source_creation() {
        let config = OpenWeatherConfig::new(Url::parse(DEFAULT_API_URL).unwrap(), "key");
        let source = OpenWeatherSource::new(config).unwrap();
        assert_eq!(source.name(), "openweather");
        assert_eq!(source.base_url.as_str(), DEFAULT_API_URL);
    }
}
