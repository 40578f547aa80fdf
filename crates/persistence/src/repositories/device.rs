//! Device repository for database operations.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::entities::DeviceEntity;
use crate::metrics::QueryTimer;

/// Repository for device-related database operations.
#[derive(Clone)]
pub struct DeviceRepository {
    pool: PgPool,
}

impl DeviceRepository {
    /// Creates a new DeviceRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a device by its key within a factory.
    pub async fn find_by_key(
        &self,
        factory_id: i64,
        device_key: &str,
    ) -> Result<Option<DeviceEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_device_by_key");
        let result = sqlx::query_as::<_, DeviceEntity>(
            r#"
            SELECT id, factory_id, device_key, name, manufacturer, model, region,
                   is_active, last_seen, created_at, updated_at
            FROM devices
            WHERE factory_id = $1 AND device_key = $2
            "#,
        )
        .bind(factory_id)
        .bind(device_key)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Find a device by id within a factory. A device that exists under a
    /// different factory is reported as absent.
    pub async fn find_by_id(
        &self,
        factory_id: i64,
        device_id: i64,
    ) -> Result<Option<DeviceEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_device_by_id");
        let result = sqlx::query_as::<_, DeviceEntity>(
            r#"
            SELECT id, factory_id, device_key, name, manufacturer, model, region,
                   is_active, last_seen, created_at, updated_at
            FROM devices
            WHERE factory_id = $1 AND id = $2
            "#,
        )
        .bind(factory_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Auto-register a device on first sighting.
    ///
    /// Returns `None` when another worker won the insert race; the caller
    /// re-reads to obtain the existing row. This keeps exactly one device
    /// row per `(factory_id, device_key)` under concurrent ingestion.
    pub async fn insert_if_absent(
        &self,
        factory_id: i64,
        device_key: &str,
    ) -> Result<Option<DeviceEntity>, sqlx::Error> {
        let timer = QueryTimer::new("insert_device_if_absent");
        let result = sqlx::query_as::<_, DeviceEntity>(
            r#"
            INSERT INTO devices (factory_id, device_key, is_active, created_at, updated_at)
            VALUES ($1, $2, true, NOW(), NOW())
            ON CONFLICT (factory_id, device_key) DO NOTHING
            RETURNING id, factory_id, device_key, name, manufacturer, model, region,
                      is_active, last_seen, created_at, updated_at
            "#,
        )
        .bind(factory_id)
        .bind(device_key)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Advance `last_seen` for a device. `GREATEST` keeps the column
    /// monotonically non-decreasing regardless of flush order.
    pub async fn update_last_seen(
        &self,
        factory_id: i64,
        device_id: i64,
        seen_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        let timer = QueryTimer::new("update_device_last_seen");
        sqlx::query(
            r#"
            UPDATE devices
            SET last_seen = GREATEST(COALESCE(last_seen, $3), $3)
            WHERE factory_id = $1 AND id = $2
            "#,
        )
        .bind(factory_id)
        .bind(device_id)
        .bind(seen_at)
        .execute(&self.pool)
        .await?;
        timer.record();
        Ok(())
    }

    /// Deactivate a device (soft delete). Returns the number of rows
    /// affected (0 if the device is absent or already inactive).
    pub async fn deactivate(
        &self,
        factory_id: i64,
        device_id: i64,
    ) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("deactivate_device");
        let result = sqlx::query(
            r#"
            UPDATE devices
            SET is_active = false, updated_at = NOW()
            WHERE factory_id = $1 AND id = $2 AND is_active = true
            "#,
        )
        .bind(factory_id)
        .bind(device_id)
        .execute(&self.pool)
        .await?;
        timer.record();
        Ok(result.rows_affected())
    }

    /// Device counts for the factory summary: total, active, and online
    /// (active with `last_seen` after the given threshold).
    pub async fn count_for_summary(
        &self,
        factory_id: i64,
        online_after: DateTime<Utc>,
    ) -> Result<(i64, i64, i64), sqlx::Error> {
        let timer = QueryTimer::new("count_devices_for_summary");
        let counts: (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE is_active) AS active,
                COUNT(*) FILTER (WHERE is_active AND last_seen > $2) AS online
            FROM devices
            WHERE factory_id = $1
            "#,
        )
        .bind(factory_id)
        .bind(online_after)
        .fetch_one(&self.pool)
        .await?;
        timer.record();
        Ok(counts)
    }
}
