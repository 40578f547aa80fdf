//! Alert and cooldown entities (database row mappings).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use domain::models::Severity;

/// Database row mapping for the alerts table.
#[derive(Debug, Clone, FromRow)]
pub struct AlertEntity {
    pub id: i64,
    pub factory_id: i64,
    pub rule_id: i64,
    pub device_id: i64,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub severity: String,
    pub message: String,
    pub telemetry_snapshot: serde_json::Value,
    pub notification_sent: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AlertEntity> for domain::models::Alert {
    type Error = String;

    fn try_from(entity: AlertEntity) -> Result<Self, Self::Error> {
        let severity: Severity = entity.severity.parse()?;
        Ok(Self {
            id: entity.id,
            factory_id: entity.factory_id,
            rule_id: entity.rule_id,
            device_id: entity.device_id,
            triggered_at: entity.triggered_at,
            resolved_at: entity.resolved_at,
            severity,
            message: entity.message,
            telemetry_snapshot: entity.telemetry_snapshot,
            notification_sent: entity.notification_sent,
            created_at: entity.created_at,
        })
    }
}

/// Database row mapping for the rule_cooldowns table.
#[derive(Debug, Clone, FromRow)]
pub struct RuleCooldownEntity {
    pub rule_id: i64,
    pub device_id: i64,
    pub last_triggered: DateTime<Utc>,
}

impl From<RuleCooldownEntity> for domain::models::RuleCooldown {
    fn from(entity: RuleCooldownEntity) -> Self {
        Self {
            rule_id: entity.rule_id,
            device_id: entity.device_id,
            last_triggered: entity.last_triggered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_entity_to_domain() {
        let entity = AlertEntity {
            id: 1,
            factory_id: 1,
            rule_id: 7,
            device_id: 5,
            triggered_at: Utc::now(),
            resolved_at: None,
            severity: "critical".to_string(),
            message: "Rule 'Overheat' triggered".to_string(),
            telemetry_snapshot: serde_json::json!({"spindle_temp": 82.5}),
            notification_sent: false,
            created_at: Utc::now(),
        };
        let alert: domain::models::Alert = entity.try_into().unwrap();
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.resolved_at.is_none());
    }

    #[test]
    fn test_cooldown_entity_to_domain() {
        let now = Utc::now();
        let entity = RuleCooldownEntity {
            rule_id: 7,
            device_id: 5,
            last_triggered: now,
        };
        let cooldown: domain::models::RuleCooldown = entity.into();
        assert_eq!(cooldown.rule_id, 7);
        assert_eq!(cooldown.last_triggered, now);
    }
}
