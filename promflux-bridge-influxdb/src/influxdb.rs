//! InfluxDB sink over the v2 HTTP API.

use std::future::Future;

use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use promflux_common::Point;

use crate::config::InfluxDbConfig;

/// Errors talking to the sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink could not be reached or reported itself unhealthy at startup.
    #[error("Cannot connect to InfluxDB at {url}: {message}")]
    Connect { url: String, message: String },

    /// A write was rejected or did not reach the server.
    #[error("Writing to bucket '{bucket}' failed: {message}")]
    Write { bucket: String, message: String },

    /// A point without fields cannot be written.
    #[error("point for measurement '{0}' has no fields")]
    EmptyPoint(String),

    /// The point's timestamp is outside the nanosecond range.
    #[error("timestamp {0} cannot be written with nanosecond precision")]
    TimestampOutOfRange(chrono::DateTime<chrono::Utc>),

    /// A bucket lookup or creation call failed.
    #[error("{0}")]
    Provision(String),
}

/// Destination for points.
pub trait PointSink {
    /// Submit one point. Resolves once the sink accepted or rejected it.
    fn write(&self, point: &Point) -> impl Future<Output = Result<(), SinkError>> + Send;
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BucketsResponse {
    #[serde(default)]
    buckets: Vec<NamedResource>,
}

#[derive(Debug, Deserialize)]
struct OrgsResponse {
    #[serde(default)]
    orgs: Vec<NamedResource>,
}

#[derive(Debug, Deserialize)]
struct NamedResource {
    id: String,
    name: String,
}

/// InfluxDB client bound to one organization and bucket.
#[derive(Debug, Clone)]
pub struct InfluxClient {
    client: reqwest::Client,
    base_url: Url,
    config: InfluxDbConfig,
}

impl InfluxClient {
    /// Build the client without contacting the server.
    ///
    /// `config` is used as given; call [`InfluxDbConfig::resolved`] first to
    /// apply the token override and defaults.
    pub fn new(config: InfluxDbConfig) -> Result<Self, SinkError> {
        let base_url = base_url(&config)?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| SinkError::Connect {
            url: base_url.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// Connect: resolve config, check health, and make sure the bucket exists.
    ///
    /// A failed health check is fatal. Bucket provisioning is best effort,
    /// since InfluxDB 1.x has no bucket API.
    pub async fn connect(config: &InfluxDbConfig) -> Result<Self, SinkError> {
        let client = Self::new(config.resolved())?;
        client.check_health().await?;

        info!(
            url = %client.base_url,
            bucket = %client.config.database,
            organization = %client.config.organization,
            "Connected to InfluxDB"
        );

        if let Err(e) = client.ensure_bucket().await {
            warn!(
                bucket = %client.config.database,
                "Cannot verify database, maybe InfluxDB v1 is used? Please make sure it exists."
            );
            debug!(error = %e, "Bucket provisioning failed");
        }

        Ok(client)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn bucket(&self) -> &str {
        &self.config.database
    }

    /// API endpoint below the base URL, keeping any path prefix of `server`.
    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let joined = format!("{}{}", self.base_url.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        url
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.token.is_empty() {
            request
        } else {
            request.header(
                reqwest::header::AUTHORIZATION,
                format!("Token {}", self.config.token),
            )
        }
    }

    /// Query `/health`.
    pub async fn check_health(&self) -> Result<(), SinkError> {
        let connect_err = |message: String| SinkError::Connect {
            url: self.base_url.to_string(),
            message,
        };

        let response = self
            .client
            .get(self.endpoint("/health"))
            .send()
            .await
            .map_err(|e| connect_err(format!("Cannot get health status: {}", e)))?;

        let status = response.status();
        let health: Option<HealthResponse> = response.json().await.ok();

        match health {
            Some(health) if health.status == "fail" => Err(connect_err(format!(
                "Database not healthy: {}",
                health.message.unwrap_or_default()
            ))),
            _ if !status.is_success() => {
                Err(connect_err(format!("health check returned HTTP {}", status)))
            }
            _ => Ok(()),
        }
    }

    /// Create the bucket if it does not exist yet.
    pub async fn ensure_bucket(&self) -> Result<(), SinkError> {
        debug!(bucket = %self.config.database, "Checking if the bucket needs to be created");

        let mut url = self.endpoint("/api/v2/buckets");
        url.query_pairs_mut().append_pair("name", &self.config.database);
        let buckets: BucketsResponse = self.get_json(url, "finding bucket").await?;
        if buckets.buckets.iter().any(|b| b.name == self.config.database) {
            return Ok(());
        }

        let mut url = self.endpoint("/api/v2/orgs");
        url.query_pairs_mut()
            .append_pair("org", &self.config.organization);
        let orgs: OrgsResponse = self.get_json(url, "finding organization").await?;
        let org = orgs
            .orgs
            .iter()
            .find(|o| o.name == self.config.organization)
            .ok_or_else(|| {
                SinkError::Provision(format!(
                    "organization '{}' not found",
                    self.config.organization
                ))
            })?;

        let body = json!({
            "orgID": org.id,
            "name": self.config.database,
            "retentionRules": [],
        });
        let response = self
            .authorized(self.client.post(self.endpoint("/api/v2/buckets")))
            .json(&body)
            .send()
            .await
            .map_err(|e| SinkError::Provision(format!("creating bucket: {}", e)))?;
        check_status(response, "creating bucket").await?;

        info!(
            bucket = %self.config.database,
            organization = %self.config.organization,
            "Created bucket"
        );
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        what: &str,
    ) -> Result<T, SinkError> {
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| SinkError::Provision(format!("{}: {}", what, e)))?;
        let response = check_status(response, what).await?;
        response
            .json()
            .await
            .map_err(|e| SinkError::Provision(format!("{}: {}", what, e)))
    }

    async fn write_point(&self, point: &Point) -> Result<(), SinkError> {
        if point.fields.is_empty() {
            return Err(SinkError::EmptyPoint(point.measurement.clone()));
        }
        let body = point
            .to_line_protocol()
            .ok_or(SinkError::TimestampOutOfRange(point.timestamp))?;

        let write_err = |message: String| SinkError::Write {
            bucket: self.config.database.clone(),
            message,
        };

        let mut url = self.endpoint("/api/v2/write");
        url.query_pairs_mut()
            .append_pair("org", &self.config.organization)
            .append_pair("bucket", &self.config.database)
            .append_pair("precision", "ns");

        let response = self
            .authorized(self.client.post(url))
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| write_err(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        Err(write_err(format!("HTTP {}: {}", status, detail.trim())))
    }
}

impl PointSink for InfluxClient {
    fn write(&self, point: &Point) -> impl Future<Output = Result<(), SinkError>> + Send {
        self.write_point(point)
    }
}

async fn check_status(
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, SinkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    let reason = if status == StatusCode::NOT_FOUND {
        "endpoint not found".to_string()
    } else {
        detail.trim().to_string()
    };
    Err(SinkError::Provision(format!(
        "{}: HTTP {}: {}",
        what, status, reason
    )))
}

/// Base URL from the configured server and port.
///
/// A bare host becomes `http://<server>:<port>`. A server with a scheme is
/// used as given, with the port added when the URL has none.
fn base_url(config: &InfluxDbConfig) -> Result<Url, SinkError> {
    let server = config.server.trim().trim_end_matches('/');
    let invalid = |e: &dyn std::fmt::Display| SinkError::Connect {
        url: server.to_string(),
        message: format!("invalid server address: {}", e),
    };

    if server.contains("://") {
        let mut url = Url::parse(server).map_err(|e| invalid(&e))?;
        if url.port().is_none() {
            url.set_port(Some(config.port))
                .map_err(|_| invalid(&"cannot set port"))?;
        }
        Ok(url)
    } else {
        Url::parse(&format!("http://{}:{}", server, config.port)).map_err(|e| invalid(&e))
    }
}
