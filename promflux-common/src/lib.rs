//! promflux Common Library
//!
//! This crate provides shared types and utilities for promflux metric bridges:
//!
//! - [`point`] - Sink-facing data model (`Point`, `FieldValue`) and line protocol rendering
//! - [`config`] - Configuration loading (JSON5 format) and the [`BridgeConfig`] trait
//! - [`args`] - Common CLI arguments
//! - [`runner`] - Bridge lifecycle (logging, workers, shutdown)
//! - [`error`] - Error types

pub mod args;
pub mod config;
pub mod error;
pub mod point;
pub mod runner;

// Re-export commonly used types at the crate root
pub use args::BridgeArgs;
pub use config::{BridgeConfig, LogFormat, LoggingConfig};
pub use error::{Error, Result};
pub use point::{FieldValue, Point};
pub use runner::BridgeRunner;

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
///
/// # Example
///
/// ```ignore
/// use promflux_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
