//! Configuration loading and shared configuration sections.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Trait for bridge configuration types.
///
/// Implement this trait for a bridge's configuration struct to get
/// loading, validation, and access to the common logging section.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use promflux_common::{BridgeConfig, LoggingConfig};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyBridgeConfig {
///     pub logging: LoggingConfig,
///     pub target: String,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn validate(&self) -> Result<()> {
///         if self.target.is_empty() {
///             return Err(Error::validation("target must not be empty"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(Error::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }

    /// Parse and validate configuration from a JSON5 string.
    fn parse(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

/// Serde helpers for humantime durations such as `"30s"` or `"1h 30m"`.
pub mod duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime_format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text).map_err(serde::de::Error::custom)
    }

    /// Parse a duration, treating a bare `"0"` as zero.
    pub fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        if text == "0" {
            return Ok(Duration::ZERO);
        }
        humantime::parse_duration(text).map_err(|e| format!("invalid duration '{}': {}", text, e))
    }

    fn humantime_format(value: &Duration) -> String {
        humantime::format_duration(*value).to_string()
    }

    /// Same as the parent module, for `Option<Duration>` fields.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            let text = Option::<String>::deserialize(deserializer)?;
            text.map(|t| super::parse(&t).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
