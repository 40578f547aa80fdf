//! Device staleness and factory health derivations.
//!
//! Everything here is computed on demand from `last_seen` timestamps and
//! active alert counts; nothing is stored.

use chrono::{DateTime, Duration, Utc};

use crate::models::FactorySummary;

/// A device is online iff it reported within this window.
pub const ONLINE_WINDOW_MINUTES: i64 = 10;

/// Default freshness threshold for live KPI values.
pub const DEFAULT_KPI_STALENESS_SECS: i64 = 60;

/// Whether a device counts as online at `now`.
pub fn is_online(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_seen {
        Some(seen) => now - seen <= Duration::minutes(ONLINE_WINDOW_MINUTES),
        None => false,
    }
}

/// Whether a KPI sample taken at `sampled_at` is stale at `now`.
pub fn is_stale(sampled_at: DateTime<Utc>, now: DateTime<Utc>, threshold_secs: i64) -> bool {
    now - sampled_at > Duration::seconds(threshold_secs)
}

/// Factory health score: start at 100, subtract 5 per active critical
/// alert, 2 per active high alert, 1 per offline device, clamped to
/// [0, 100].
pub fn health_score(critical_alerts: i64, high_alerts: i64, offline_devices: i64) -> u8 {
    let score = 100 - 5 * critical_alerts - 2 * high_alerts - offline_devices;
    score.clamp(0, 100) as u8
}

/// Assemble the factory summary from raw counts.
pub fn summarize(
    total_devices: i64,
    active_devices: i64,
    online_devices: i64,
    active_alerts: i64,
    critical_alerts: i64,
    high_alerts: i64,
) -> FactorySummary {
    let offline_devices = active_devices - online_devices;
    FactorySummary {
        total_devices,
        active_devices,
        online_devices,
        offline_devices,
        active_alerts,
        critical_alerts,
        high_alerts,
        health_score: health_score(critical_alerts, high_alerts, offline_devices),
    }
}
