//! Device parameter entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use domain::models::DataType;

/// Database row mapping for the device_parameters table.
#[derive(Debug, Clone, FromRow)]
pub struct DeviceParameterEntity {
    pub id: i64,
    pub factory_id: i64,
    pub device_id: i64,
    pub parameter_key: String,
    pub display_name: Option<String>,
    pub unit: Option<String>,
    pub data_type: String,
    pub is_kpi_selected: bool,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DeviceParameterEntity> for domain::models::DeviceParameter {
    type Error = String;

    fn try_from(entity: DeviceParameterEntity) -> Result<Self, Self::Error> {
        let data_type: DataType = entity.data_type.parse()?;
        Ok(Self {
            id: entity.id,
            factory_id: entity.factory_id,
            device_id: entity.device_id,
            parameter_key: entity.parameter_key,
            display_name: entity.display_name,
            unit: entity.unit,
            data_type,
            is_kpi_selected: entity.is_kpi_selected,
            discovered_at: entity.discovered_at,
            updated_at: entity.updated_at,
        })
    }
}
