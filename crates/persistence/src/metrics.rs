//! Relational store metrics.
//!
//! The ingestion hot path budgets a few seconds per relational operation;
//! per-query timings feed a histogram keyed by query name, and anything
//! that blows past the slow threshold is logged so a contended device row
//! or cooldown upsert shows up before the deadline does.

use metrics::{counter, gauge, histogram};
use sqlx::PgPool;
use std::time::{Duration, Instant};
use tracing::warn;

/// Queries slower than this are logged; well under the 5 s relational
/// deadline so there is time to act on the warning.
const SLOW_QUERY: Duration = Duration::from_secs(1);

/// Record one query's duration against its name.
pub fn record_query_duration(query_name: &str, duration: Duration) {
    histogram!(
        "relational_query_duration_seconds",
        "query" => query_name.to_string()
    )
    .record(duration.as_secs_f64());
    if duration > SLOW_QUERY {
        counter!("relational_slow_queries_total", "query" => query_name.to_string()).increment(1);
        warn!(
            query = query_name,
            elapsed_ms = duration.as_millis() as u64,
            "slow relational query"
        );
    }
}

/// Snapshot the pool into gauges. Called periodically; a pool pinned at
/// `max_connections` under telemetry load is the first sign the
/// coordinator needs fewer workers or the store needs help.
pub fn record_pool_metrics(pool: &PgPool) {
    let size = pool.size() as usize;
    let idle = pool.num_idle();
    let active = size.saturating_sub(idle);

    gauge!("relational_pool_connections_active").set(active as f64);
    gauge!("relational_pool_connections_idle").set(idle as f64);
    gauge!("relational_pool_connections_total").set(size as f64);
}

/// Times one named query from construction to `record`.
///
/// Usage:
/// ```ignore
/// let timer = QueryTimer::new("find_device_by_key");
/// let result = sqlx::query_as::<_, DeviceEntity>(...).fetch_optional(&pool).await;
/// timer.record();
/// result
/// ```
pub struct QueryTimer {
    query_name: String,
    start: Instant,
}

impl QueryTimer {
    pub fn new(query_name: impl Into<String>) -> Self {
        Self {
            query_name: query_name.into(),
            start: Instant::now(),
        }
    }

    /// Record the elapsed duration to metrics.
    pub fn record(self) {
        record_query_duration(&self.query_name, self.start.elapsed());
    }
}
