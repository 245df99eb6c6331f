//! Configuration for the weather ingestion service

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::catalog::CityCatalog;
use crate::error::{IngestionError, Result};
use crate::pipeline::FailurePolicy;
use crate::rate_limiter::RateLimitConfig;
use crate::sources::openweather::{OpenWeatherConfig, DEFAULT_API_URL};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Weather API
    #[serde(default = "default_weather_api_url")]
    pub weather_api_url: String,
    pub weather_api_key: Option<String>,

    // City catalog
    #[serde(default)]
    pub city_ids: Vec<i64>,
    pub city_catalog_path: Option<PathBuf>,

    // Rate limiting
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_rate_limit_period")]
    pub rate_limit_period_secs: u64,

    // Per-fetch timeout (unset = wait indefinitely)
    pub request_timeout_secs: Option<u64>,

    #[serde(default = "default_failure_policy")]
    pub failure_policy: String,

    // Database
    pub database_url: Option<String>,
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    // HTTP API
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_weather_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_rate_limit() -> u32 {
    60 // requests per period
}

fn default_rate_limit_period() -> u64 {
    60
}

fn default_failure_policy() -> String {
    "collect_all".to_string()
}

fn default_database_max_connections() -> u32 {
    5
}

fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn invalid(message: impl Into<String>) -> IngestionError {
    IngestionError::ConfigError(config::ConfigError::Message(message.into()))
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file
        dotenvy::dotenv().ok();

        // Build config from environment
        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("city_ids"),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.weather_api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(invalid("WEATHER_API_KEY is required"));
        }

        self.api_url()?;
        self.failure_policy()?;
        self.listen_addr()?;

        if self.rate_limit == 0 {
            return Err(invalid("RATE_LIMIT must be greater than zero"));
        }
        if self.rate_limit_period_secs == 0 {
            return Err(invalid("RATE_LIMIT_PERIOD_SECS must be greater than zero"));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(invalid("REQUEST_TIMEOUT_SECS must be greater than zero when set"));
        }
        if self.city_ids.is_empty() && self.city_catalog_path.is_none() {
            return Err(invalid("either CITY_IDS or CITY_CATALOG_PATH must be set"));
        }

        Ok(())
    }

    pub fn api_url(&self) -> Result<Url> {
        Url::parse(&self.weather_api_url)
            .map_err(|e| invalid(format!("invalid WEATHER_API_URL: {}", e)))
    }

    pub fn failure_policy(&self) -> Result<FailurePolicy> {
        self.failure_policy.parse()
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .map_err(|e| invalid(format!("invalid LISTEN_ADDR: {}", e)))
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            rate_limit: self.rate_limit,
            period: Duration::from_secs(self.rate_limit_period_secs),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Overrides the per-fetch timeout, rounded up to whole seconds (at least 1)
    pub fn set_request_timeout(&mut self, timeout: Duration) {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self.request_timeout_secs = Some(secs.max(1));
    }

    /// Builds the catalog; `CITY_IDS` wins over `CITY_CATALOG_PATH`
    pub async fn load_catalog(&self) -> Result<CityCatalog> {
        if !self.city_ids.is_empty() {
            return CityCatalog::new(self.city_ids.clone());
        }

        match self.city_catalog_path {
            Some(ref path) => CityCatalog::from_json_file(path).await,
            None => Err(IngestionError::CatalogError(
                "no city catalog configured".to_string(),
            )),
        }
    }

    pub fn open_weather_config(&self) -> Result<OpenWeatherConfig> {
        let mut source = OpenWeatherConfig::new(
            self.api_url()?,
            self.weather_api_key.clone().unwrap_or_default(),
        );
        source.request_timeout = self.request_timeout();
        Ok(source)
    }

    /// Checks if a database is configured
    pub fn has_database(&self) -> bool {
        self.database_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            weather_api_url: default_weather_api_url(),
            weather_api_key: Some("test-key".to_string()),
            city_ids: vec![100, 200, 300],
            city_catalog_path: None,
            rate_limit: default_rate_limit(),
            rate_limit_period_secs: default_rate_limit_period(),
            request_timeout_secs: None,
            failure_policy: default_failure_policy(),
            database_url: None,
            database_max_connections: default_database_max_connections(),
            listen_addr: default_listen_addr(),
        }
    }

    #[test]
    fn test_default_values() {
        let config = base_config();

        assert_eq!(config.weather_api_url, "https://api.openweathermap.org/data/2.5/weather");
        assert_eq!(config.rate_limit_config().pacing_interval(), Duration::from_secs(1));
        assert_eq!(config.failure_policy().unwrap(), FailurePolicy::CollectAll);
        assert!(config.request_timeout().is_none());
        assert!(!config.has_database());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_key() {
        let config = Config {
            weather_api_key: None,
            ..base_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_rate = Config {
            rate_limit: 0,
            ..base_config()
        };
        assert!(zero_rate.validate().is_err());

        let bad_url = Config {
            weather_api_url: "not a url".to_string(),
            ..base_config()
        };
        assert!(bad_url.validate().is_err());

        let bad_policy = Config {
            failure_policy: "sometimes".to_string(),
            ..base_config()
        };
        assert!(bad_policy.validate().is_err());

        let no_catalog = Config {
            city_ids: vec![],
            ..base_config()
        };
        assert!(no_catalog.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_catalog_prefers_inline_ids() {
        let config = Config {
            city_catalog_path: Some(PathBuf::from("/does/not/exist.json")),
            ..base_config()
        };

        let catalog = config.load_catalog().await.unwrap();
        assert_eq!(catalog.as_slice(), &[100, 200, 300]);
    }

    #[test]
    fn test_set_request_timeout_rounds_up() {
        let mut config = base_config();

        config.set_request_timeout(Duration::from_millis(1500));
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(2)));

        config.set_request_timeout(Duration::from_secs(10));
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(10)));

        config.set_request_timeout(Duration::from_millis(1));
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(1)));

        config.set_request_timeout(Duration::ZERO);
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_open_weather_config_carries_timeout() {
        let config = Config {
            request_timeout_secs: Some(5),
            ..base_config()
        };

        let source = config.open_weather_config().unwrap();
        assert_eq!(source.request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(source.api_key, "test-key");
    }
}
