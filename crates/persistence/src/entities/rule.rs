//! Rule entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use domain::models::{
    ConditionNode, NotificationChannels, Rule, RuleScope, ScheduleConfig, ScheduleType, Severity,
};

/// Database row mapping for the rules table, with the device list from
/// rule_devices aggregated into `device_ids`.
#[derive(Debug, Clone, FromRow)]
pub struct RuleWithDevicesEntity {
    pub id: i64,
    pub factory_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub scope: String,
    pub conditions: serde_json::Value,
    pub cooldown_minutes: i32,
    pub is_active: bool,
    pub schedule_type: String,
    pub schedule_config: Option<serde_json::Value>,
    pub severity: String,
    pub notification_channels: Option<serde_json::Value>,
    pub device_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RuleWithDevicesEntity> for Rule {
    type Error = String;

    fn try_from(entity: RuleWithDevicesEntity) -> Result<Self, Self::Error> {
        let scope: RuleScope = entity.scope.parse()?;
        let schedule_type: ScheduleType = entity.schedule_type.parse()?;
        let severity: Severity = entity.severity.parse()?;
        let conditions: ConditionNode = serde_json::from_value(entity.conditions)
            .map_err(|e| format!("invalid conditions for rule {}: {}", entity.id, e))?;
        let schedule_config: Option<ScheduleConfig> = entity
            .schedule_config
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| format!("invalid schedule_config for rule {}: {}", entity.id, e))?;
        let notification_channels: NotificationChannels = entity
            .notification_channels
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| format!("invalid notification_channels for rule {}: {}", entity.id, e))?
            .unwrap_or_default();

        Ok(Rule {
            id: entity.id,
            factory_id: entity.factory_id,
            name: entity.name,
            description: entity.description,
            scope,
            conditions,
            cooldown_minutes: entity.cooldown_minutes,
            is_active: entity.is_active,
            schedule_type,
            schedule_config,
            severity,
            notification_channels,
            device_ids: entity.device_ids,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        })
    }
}
