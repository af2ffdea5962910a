use thiserror::Error;

/// Common error type for promflux components.
///
/// Every variant is a startup-time failure: a bridge that hits one of these
/// never reaches its scrape loop.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }
}

impl From<json5::Error> for Error {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

/// Result type alias using promflux's Error.
pub type Result<T> = std::result::Result<T, Error>;
