//! Dashboard read models (derived, never stored).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Factory-level operational summary, derived on demand from device and
/// alert state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorySummary {
    pub total_devices: i64,
    pub active_devices: i64,
    pub online_devices: i64,
    pub offline_devices: i64,
    pub active_alerts: i64,
    pub critical_alerts: i64,
    pub high_alerts: i64,
    pub health_score: u8,
}

/// Most recent value of one KPI parameter. Values older than the
/// staleness threshold are kept for display but flagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveKpi {
    pub parameter_key: String,
    pub display_name: String,
    pub unit: Option<String>,
    pub value: f64,
    pub sampled_at: DateTime<Utc>,
    pub is_stale: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_serialization() {
        let summary = FactorySummary {
            total_devices: 10,
            active_devices: 9,
            online_devices: 7,
            offline_devices: 2,
            active_alerts: 3,
            critical_alerts: 1,
            high_alerts: 1,
            health_score: 91,
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"health_score\":91"));
        assert!(json.contains("\"offline_devices\":2"));
    }
}
