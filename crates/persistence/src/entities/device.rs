//! Device entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database row mapping for the devices table.
#[derive(Debug, Clone, FromRow)]
pub struct DeviceEntity {
    pub id: i64,
    pub factory_id: i64,
    pub device_key: String,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub region: Option<String>,
    pub is_active: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DeviceEntity> for domain::models::Device {
    fn from(entity: DeviceEntity) -> Self {
        Self {
            id: entity.id,
            factory_id: entity.factory_id,
            device_key: entity.device_key,
            name: entity.name,
            manufacturer: entity.manufacturer,
            model: entity.model,
            region: entity.region,
            is_active: entity.is_active,
            last_seen: entity.last_seen,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_entity_to_domain() {
        let entity = DeviceEntity {
            id: 5,
            factory_id: 1,
            device_key: "M01".to_string(),
            name: None,
            manufacturer: None,
            model: None,
            region: None,
            is_active: true,
            last_seen: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let device: domain::models::Device = entity.clone().into();
        assert_eq!(device.id, 5);
        assert_eq!(device.factory_id, 1);
        assert_eq!(device.device_key, "M01");
        assert!(device.last_seen.is_none());
    }
}
