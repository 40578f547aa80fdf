//! Device parameter repository for database operations.

use sqlx::PgPool;

use crate::entities::DeviceParameterEntity;
use crate::metrics::QueryTimer;
use domain::models::DataType;

/// Repository for device parameter database operations.
#[derive(Clone)]
pub struct ParameterRepository {
    pool: PgPool,
}

impl ParameterRepository {
    /// Creates a new ParameterRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent discovery upsert: insert the parameter if absent, do
    /// nothing on conflict. Returns true when this call created the row.
    ///
    /// Safe under concurrent writers: the unique index on
    /// `(device_id, parameter_key)` guarantees exactly one row no matter
    /// how many coordinator workers race on the same key.
    pub async fn insert_if_absent(
        &self,
        factory_id: i64,
        device_id: i64,
        parameter_key: &str,
        display_name: &str,
        data_type: DataType,
    ) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("insert_parameter_if_absent");
        let result = sqlx::query(
            r#"
            INSERT INTO device_parameters
                (factory_id, device_id, parameter_key, display_name, data_type,
                 is_kpi_selected, discovered_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, true, NOW(), NOW())
            ON CONFLICT (device_id, parameter_key) DO NOTHING
            "#,
        )
        .bind(factory_id)
        .bind(device_id)
        .bind(parameter_key)
        .bind(display_name)
        .bind(data_type.as_str())
        .execute(&self.pool)
        .await?;
        timer.record();
        Ok(result.rows_affected() == 1)
    }

    /// All parameter keys known for a device.
    pub async fn list_keys(
        &self,
        factory_id: i64,
        device_id: i64,
    ) -> Result<Vec<String>, sqlx::Error> {
        let timer = QueryTimer::new("list_parameter_keys");
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT parameter_key
            FROM device_parameters
            WHERE factory_id = $1 AND device_id = $2
            ORDER BY parameter_key
            "#,
        )
        .bind(factory_id)
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;
        timer.record();
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// All parameters of a device, KPI-selected first.
    pub async fn list_for_device(
        &self,
        factory_id: i64,
        device_id: i64,
    ) -> Result<Vec<DeviceParameterEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_parameters_for_device");
        let result = sqlx::query_as::<_, DeviceParameterEntity>(
            r#"
            SELECT id, factory_id, device_id, parameter_key, display_name, unit,
                   data_type, is_kpi_selected, discovered_at, updated_at
            FROM device_parameters
            WHERE factory_id = $1 AND device_id = $2
            ORDER BY is_kpi_selected DESC, parameter_key ASC
            "#,
        )
        .bind(factory_id)
        .bind(device_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }
}
