//! Factory repository for database operations.

use sqlx::PgPool;

use crate::entities::FactoryEntity;
use crate::metrics::QueryTimer;

/// Repository for factory-related database operations.
///
/// Factory is the tenant root: lookups here are how a `factory_id` enters
/// the system from a topic slug, so there is no further isolation
/// predicate to apply.
#[derive(Clone)]
pub struct FactoryRepository {
    pool: PgPool,
}

impl FactoryRepository {
    /// Creates a new FactoryRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve a factory by its URL slug.
    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<FactoryEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_factory_by_slug");
        let result = sqlx::query_as::<_, FactoryEntity>(
            r#"
            SELECT id, slug, name, timezone, created_at, updated_at
            FROM factories
            WHERE slug = $1
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Find a factory by id.
    pub async fn find_by_id(&self, factory_id: i64) -> Result<Option<FactoryEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_factory_by_id");
        let result = sqlx::query_as::<_, FactoryEntity>(
            r#"
            SELECT id, slug, name, timezone, created_at, updated_at
            FROM factories
            WHERE id = $1
            "#,
        )
        .bind(factory_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Create a factory. Slugs are unique; a duplicate surfaces as a
    /// database error for the caller to map.
    pub async fn create(
        &self,
        slug: &str,
        name: &str,
        timezone: &str,
    ) -> Result<FactoryEntity, sqlx::Error> {
        let timer = QueryTimer::new("create_factory");
        let result = sqlx::query_as::<_, FactoryEntity>(
            r#"
            INSERT INTO factories (slug, name, timezone, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING id, slug, name, timezone, created_at, updated_at
            "#,
        )
        .bind(slug)
        .bind(name)
        .bind(timezone)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }
}
