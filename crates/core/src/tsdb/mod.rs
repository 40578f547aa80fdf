//! Time-series path: sample buffering, batching, and the store backend.

mod influx;
mod line_protocol;
mod writer;

pub use influx::InfluxBackend;
pub use line_protocol::encode_sample;
pub use writer::{TimeSeriesWriter, WriterConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use domain::models::Metrics;

/// One validated telemetry message bound for the time-series store.
/// Tags are `factory_id` and `device_id`; every metric key becomes a
/// numeric field.
#[derive(Debug, Clone)]
pub struct Sample {
    pub factory_id: i64,
    pub device_id: i64,
    pub fields: Metrics,
    pub timestamp: DateTime<Utc>,
}

/// Most recent stored value of one field for a device, as returned by a
/// windowed last-value query.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestPoint {
    pub field: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum TsdbError {
    /// I/O-level failure; the batch will be retried.
    #[error("time-series write failed: {0}")]
    Transient(String),

    /// The store rejected the batch itself; retrying cannot help.
    #[error("time-series write rejected: {0}")]
    Rejected(String),
}

impl TsdbError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TsdbError::Transient(_))
    }
}

/// Narrow interface over the time-series store. The production
/// implementation talks to InfluxDB (line protocol in, Flux out); tests
/// substitute in-memory captures.
#[async_trait]
pub trait TimeSeriesBackend: Send + Sync {
    /// Write a newline-separated batch of line-protocol points.
    async fn write_lines(&self, lines: &str) -> Result<(), TsdbError>;

    /// Latest value per field for one device within the window. Backs
    /// the live-KPI read; the hot write path never calls this.
    async fn latest_points(
        &self,
        factory_id: i64,
        device_id: i64,
        window: Duration,
    ) -> Result<Vec<LatestPoint>, TsdbError>;
}
