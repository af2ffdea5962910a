//! Scrape cycle and the interval loop driving it.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use promflux_common::Point;

use crate::config::InfluxBridgeConfig;
use crate::flatten::flatten;
use crate::guard::{DuplicateGuard, GuardDecision};
use crate::influxdb::{InfluxClient, PointSink, SinkError};
use crate::parser::latest_timestamp_ms;
use crate::source::{MetricsSource, SourceError};
use crate::timestamp::resolve_timestamp;

/// Failures that stop the bridge before its first cycle.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] promflux_common::Error),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A point was written.
    Written {
        timestamp: DateTime<Utc>,
        fields: usize,
    },
    /// The timestamp did not advance; nothing was written.
    Duplicate {
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },
    /// Fetching or parsing the metrics failed; nothing was written.
    ScrapeFailed,
    /// No sample survived flattening; nothing was written.
    Empty,
    /// The sink rejected the point.
    WriteFailed,
}

/// Counters across cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles: u64,
    pub written: u64,
    pub duplicates: u64,
    pub failed: u64,
}

/// Runs scrape cycles against one source and one sink.
///
/// All state carried between cycles lives here: the duplicate guard and the
/// cycle counters.
pub struct Scheduler<S> {
    source: MetricsSource,
    sink: S,
    measurement: String,
    timestamp_field: Option<String>,
    const_tags: BTreeMap<String, String>,
    interval: Duration,
    guard: DuplicateGuard,
    stats: CycleStats,
}

impl Scheduler<InfluxClient> {
    /// Build the source and connect to InfluxDB.
    ///
    /// Fails when the sink is unreachable or unhealthy; the loop must not start then.
    pub async fn connect(config: &InfluxBridgeConfig) -> Result<Self, StartupError> {
        let source = MetricsSource::from_location(&config.metrics, config.scrape_timeout)?;
        let sink = InfluxClient::connect(config.influxdb()?).await?;
        Ok(Self::new(config, source, sink))
    }
}

impl<S: PointSink> Scheduler<S> {
    pub fn new(config: &InfluxBridgeConfig, source: MetricsSource, sink: S) -> Self {
        Self {
            source,
            sink,
            measurement: config.measurement.clone(),
            timestamp_field: config.timestamp.clone(),
            const_tags: config.const_tags.clone(),
            interval: config.effective_interval(),
            guard: DuplicateGuard::new(config.avoid_duplicate),
            stats: CycleStats::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn guard(&self) -> &DuplicateGuard {
        &self.guard
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run cycles until `token` is cancelled.
    ///
    /// The first cycle starts immediately. Each following one starts one
    /// interval after the previous cycle finished; cancellation is observed
    /// between cycles.
    pub async fn run(&mut self, token: CancellationToken) {
        info!(
            source = %self.source.location(),
            measurement = %self.measurement,
            interval = ?self.interval,
            avoid_duplicate = self.guard.is_enabled(),
            "Starting scrape loop"
        );

        while !token.is_cancelled() {
            self.run_cycle().await;

            debug!(interval = ?self.interval, "Sleeping until next scrape");
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(
            cycles = self.stats.cycles,
            written = self.stats.written,
            duplicates = self.stats.duplicates,
            failed = self.stats.failed,
            "Scrape loop stopped"
        );
    }

    /// Run exactly one scrape, flatten, resolve, guard, write cycle.
    ///
    /// Never fails: every step error is logged and reported as the outcome.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.stats.cycles += 1;
        let outcome = self.cycle().await;
        match outcome {
            CycleOutcome::Written { .. } => self.stats.written += 1,
            CycleOutcome::Duplicate { .. } => self.stats.duplicates += 1,
            CycleOutcome::ScrapeFailed | CycleOutcome::Empty | CycleOutcome::WriteFailed => {
                self.stats.failed += 1
            }
        }
        outcome
    }

    async fn cycle(&mut self) -> CycleOutcome {
        let families = match self.source.scrape().await {
            Ok(families) => families,
            Err(e) => {
                error!(source = %self.source.location(), error = %e, "Could not load metrics");
                return CycleOutcome::ScrapeFailed;
            }
        };

        if let Some(exposed_ms) = latest_timestamp_ms(&families) {
            debug!(
                exposed_ms,
                "Ignoring exposition timestamps, the point gets one resolved timestamp"
            );
        }

        let (fields, skipped) = flatten(&families);
        if fields.is_empty() {
            warn!(
                families = families.len(),
                skipped = skipped.len(),
                "No usable samples, nothing to write"
            );
            return CycleOutcome::Empty;
        }

        let timestamp = resolve_timestamp(&fields, self.timestamp_field.as_deref(), Utc::now());

        if let GuardDecision::Duplicate { last } = self.guard.check(timestamp) {
            debug!(%timestamp, %last, "Skipped, timestamp is not newer than the last write");
            return CycleOutcome::Duplicate { timestamp, last };
        }

        let field_count = fields.len();
        let point = Point::new(&self.measurement, timestamp)
            .with_tags(self.const_tags.clone())
            .with_fields(fields);

        debug!(
            measurement = %point.measurement,
            tags = ?point.tags,
            fields = field_count,
            %timestamp,
            "Writing point"
        );

        match self.sink.write(&point).await {
            Ok(()) => {
                self.guard.record_written(timestamp);
                CycleOutcome::Written {
                    timestamp,
                    fields: field_count,
                }
            }
            Err(e) => {
                error!(error = %e, "Write failed");
                CycleOutcome::WriteFailed
            }
        }
    }
}
