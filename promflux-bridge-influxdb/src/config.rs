//! Configuration for the InfluxDB bridge.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use promflux_common::config::duration;
use promflux_common::{BridgeConfig, Error, LoggingConfig, Result};

/// Scrape interval used when none (or zero) is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default InfluxDB HTTP port.
pub const DEFAULT_INFLUXDB_PORT: u16 = 8086;

/// Default bucket name.
pub const DEFAULT_INFLUXDB_DATABASE: &str = "my-bucket";

/// Environment variable overriding the configured InfluxDB token.
pub const INFLUXDB_TOKEN_ENV: &str = "INFLUXDB_TOKEN";

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxBridgeConfig {
    /// Metrics location: an `http(s)://` URL or a local file path.
    pub metrics: String,

    /// Measurement name for written points.
    pub measurement: String,

    /// Name of a scraped field holding the point timestamp (Unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Scrape interval (humantime, e.g. "30s", "5m"). Zero or absent means one hour.
    #[serde(default, with = "duration::option")]
    pub interval: Option<Duration>,

    /// Timeout for fetching the metrics endpoint. Transport default when absent.
    #[serde(default, with = "duration::option")]
    pub scrape_timeout: Option<Duration>,

    /// Skip writes whose timestamp is not newer than the last written one.
    #[serde(default)]
    pub avoid_duplicate: bool,

    /// Tags attached to every point.
    #[serde(default)]
    pub const_tags: BTreeMap<String, String>,

    /// InfluxDB connection settings. Required.
    #[serde(default)]
    pub influxdb: Option<InfluxDbConfig>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// InfluxDB connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxDbConfig {
    /// Server host name, or a base URL with scheme.
    pub server: String,

    /// HTTP port (default: 8086).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bucket (database) name (default: "my-bucket").
    #[serde(default = "default_database")]
    pub database: String,

    /// Organization owning the bucket.
    #[serde(default)]
    pub organization: String,

    /// API token. Overridden by `INFLUXDB_TOKEN` when set.
    #[serde(default, skip_serializing)]
    pub token: String,

    /// Request timeout. Transport default when absent.
    #[serde(default, with = "duration::option")]
    pub timeout: Option<Duration>,
}

fn default_port() -> u16 {
    DEFAULT_INFLUXDB_PORT
}

fn default_database() -> String {
    DEFAULT_INFLUXDB_DATABASE.to_string()
}

impl InfluxBridgeConfig {
    /// Effective scrape interval.
    pub fn effective_interval(&self) -> Duration {
        match self.interval {
            Some(interval) if !interval.is_zero() => interval,
            _ => DEFAULT_INTERVAL,
        }
    }

    /// The InfluxDB section; validation guarantees it is present.
    pub fn influxdb(&self) -> Result<&InfluxDbConfig> {
        self.influxdb
            .as_ref()
            .ok_or_else(|| Error::validation("No InfluxDB server specified"))
    }
}

impl InfluxDbConfig {
    /// Apply the `INFLUXDB_TOKEN` override and fill empty defaults.
    pub fn resolved(&self) -> Self {
        self.resolved_with_env(std::env::var(INFLUXDB_TOKEN_ENV).ok())
    }

    fn resolved_with_env(&self, env_token: Option<String>) -> Self {
        let mut config = self.clone();
        if let Some(token) = env_token.filter(|t| !t.is_empty()) {
            config.token = token;
        }
        if config.database.is_empty() {
            config.database = default_database();
        }
        if config.port == 0 {
            config.port = DEFAULT_INFLUXDB_PORT;
        }
        config
    }
}

impl BridgeConfig for InfluxBridgeConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<()> {
        if self.metrics.trim().is_empty() {
            return Err(Error::validation("metrics location must not be empty"));
        }

        if self.measurement.is_empty() {
            return Err(Error::validation("measurement must not be empty"));
        }

        if self.timestamp.as_deref() == Some("") {
            return Err(Error::validation(
                "timestamp field name must not be empty when set",
            ));
        }

        for (key, value) in &self.const_tags {
            if key.is_empty() || value.is_empty() {
                return Err(Error::validation(format!(
                    "const_tags entries need a non-empty name and value (got '{}' = '{}')",
                    key, value
                )));
            }
        }

        let influxdb = self.influxdb()?;
        if influxdb.server.trim().is_empty() {
            return Err(Error::validation("influxdb.server must not be empty"));
        }

        Ok(())
    }
}
