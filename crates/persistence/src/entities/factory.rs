//! Factory entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database row mapping for the factories table.
#[derive(Debug, Clone, FromRow)]
pub struct FactoryEntity {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<FactoryEntity> for domain::models::Factory {
    fn from(entity: FactoryEntity) -> Self {
        Self {
            id: entity.id,
            slug: entity.slug,
            name: entity.name,
            timezone: entity.timezone,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_entity_to_domain() {
        let entity = FactoryEntity {
            id: 1,
            slug: "vpc".to_string(),
            name: "VPC Plant".to_string(),
            timezone: "Asia/Kolkata".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let factory: domain::models::Factory = entity.clone().into();
        assert_eq!(factory.id, entity.id);
        assert_eq!(factory.slug, "vpc");
        assert_eq!(factory.timezone, "Asia/Kolkata");
    }
}
