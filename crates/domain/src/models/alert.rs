//! Alert and cooldown domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rule::Severity;

/// A triggered incident. `resolved_at IS NULL` means the alert is active
/// and counts against the factory health score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub factory_id: i64,
    pub rule_id: i64,
    pub device_id: i64,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub severity: Severity,
    pub message: String,
    /// The metrics that satisfied the rule, as received.
    pub telemetry_snapshot: serde_json::Value,
    pub notification_sent: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields of an alert about to be persisted.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub factory_id: i64,
    pub rule_id: i64,
    pub device_id: i64,
    pub triggered_at: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    pub telemetry_snapshot: serde_json::Value,
}

/// Last firing time per `(rule, device)`; at most one row per pair.
/// Doubles as the commit marker for alert creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCooldown {
    pub rule_id: i64,
    pub device_id: i64,
    pub last_triggered: DateTime<Utc>,
}

impl RuleCooldown {
    /// Whether a rule with the given cooldown may fire again at `now`.
    pub fn expired(&self, cooldown_minutes: i32, now: DateTime<Utc>) -> bool {
        now - self.last_triggered >= chrono::Duration::minutes(cooldown_minutes as i64)
    }
}
