//! Metrics source: an HTTP endpoint or a local file.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

use crate::parser::{MetricFamilies, ParseError, parse_text};

/// Errors from one scrape. All of them skip the current cycle only.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to {url} failed with HTTP {status}")]
    HttpStatus { url: String, status: StatusCode },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid metrics from {location}: {source}")]
    Parse {
        location: String,
        #[source]
        source: ParseError,
    },
}

/// Where metrics are read from.
#[derive(Debug, Clone)]
pub enum MetricsSource {
    /// An `http://` or `https://` endpoint fetched with GET.
    Http { url: String, client: reqwest::Client },
    /// A file in the exposition format (e.g. a node_exporter textfile).
    File { path: PathBuf },
}

impl MetricsSource {
    /// Build a source from a configured location.
    ///
    /// Locations with an `http://` or `https://` scheme are fetched over HTTP,
    /// anything else is treated as a file path.
    pub fn from_location(location: &str, timeout: Option<Duration>) -> Result<Self, SourceError> {
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            let mut builder = reqwest::Client::builder();
            if let Some(timeout) = timeout {
                builder = builder.timeout(timeout);
            }
            let client = builder.build().map_err(|source| SourceError::Http {
                url: location.to_string(),
                source,
            })?;
            Ok(Self::Http {
                url: location.to_string(),
                client,
            })
        } else {
            Ok(Self::File {
                path: PathBuf::from(location),
            })
        }
    }

    /// Human-readable location for logs.
    pub fn location(&self) -> String {
        match self {
            Self::Http { url, .. } => url.clone(),
            Self::File { path } => path.display().to_string(),
        }
    }

    /// Fetch the raw exposition text.
    pub async fn fetch(&self) -> Result<String, SourceError> {
        match self {
            Self::Http { url, client } => {
                let http_err = |source| SourceError::Http {
                    url: url.clone(),
                    source,
                };

                let response = client.get(url).send().await.map_err(http_err)?;
                if !response.status().is_success() {
                    return Err(SourceError::HttpStatus {
                        url: url.clone(),
                        status: response.status(),
                    });
                }
                response.text().await.map_err(http_err)
            }
            Self::File { path } => {
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| SourceError::Io {
                        path: path.display().to_string(),
                        source,
                    })
            }
        }
    }

    /// Fetch and parse the metric families.
    pub async fn scrape(&self) -> Result<MetricFamilies, SourceError> {
        let text = self.fetch().await?;
        parse_text(&text).map_err(|source| SourceError::Parse {
            location: self.location(),
            source,
        })
    }
}
