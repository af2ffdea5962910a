//! Bridge from Prometheus metrics to InfluxDB.
//!
//! Periodically scrapes a Prometheus text exposition (HTTP endpoint or file),
//! flattens every sample into one field of a single point, and writes that
//! point to an InfluxDB bucket.
//!
//! # Cycle
//!
//! ```text
//! source ──> parser ──> flatten ──> timestamp ──> guard ──> influxdb
//!  (GET/read)  (families)  (fields)   (field/now)  (dedupe)   (write)
//! ```
//!
//! # Field keys
//!
//! ```text
//! node_load1 0.42                -> node_load1
//! foo{a="1",b="x"} 7             -> foo_a:1_b:x
//! ```

pub mod config;
pub mod flatten;
pub mod guard;
pub mod influxdb;
pub mod parser;
pub mod scheduler;
pub mod source;
pub mod timestamp;

pub use config::InfluxBridgeConfig;
pub use influxdb::{InfluxClient, PointSink, SinkError};
pub use scheduler::{CycleOutcome, CycleStats, Scheduler, StartupError};
pub use source::{MetricsSource, SourceError};
