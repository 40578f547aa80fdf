//! Alert and cooldown repository for database operations.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::entities::{AlertEntity, RuleCooldownEntity};
use crate::metrics::QueryTimer;
use domain::models::NewAlert;

/// Repository for alert and rule-cooldown database operations.
#[derive(Clone)]
pub struct AlertRepository {
    pool: PgPool,
}

impl AlertRepository {
    /// Creates a new AlertRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Read the cooldown row for a `(rule, device)` pair.
    ///
    /// The pair is already factory-scoped: rule ids only reach this method
    /// through the factory-bound candidate query.
    pub async fn get_cooldown(
        &self,
        rule_id: i64,
        device_id: i64,
    ) -> Result<Option<RuleCooldownEntity>, sqlx::Error> {
        let timer = QueryTimer::new("get_rule_cooldown");
        let result = sqlx::query_as::<_, RuleCooldownEntity>(
            r#"
            SELECT rule_id, device_id, last_triggered
            FROM rule_cooldowns
            WHERE rule_id = $1 AND device_id = $2
            "#,
        )
        .bind(rule_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Persist an alert and advance the cooldown marker atomically.
    ///
    /// Both writes share one short transaction, so either the alert and
    /// the cooldown update are both visible or neither is. On redelivery
    /// of the same trigger, the caller's cooldown check against the
    /// committed row suppresses the duplicate.
    pub async fn create_with_cooldown(
        &self,
        alert: &NewAlert,
    ) -> Result<AlertEntity, sqlx::Error> {
        let timer = QueryTimer::new("create_alert_with_cooldown");
        let mut tx = self.pool.begin().await?;

        let entity = sqlx::query_as::<_, AlertEntity>(
            r#"
            INSERT INTO alerts
                (factory_id, rule_id, device_id, triggered_at, severity, message,
                 telemetry_snapshot, notification_sent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, false, NOW())
            RETURNING id, factory_id, rule_id, device_id, triggered_at, resolved_at,
                      severity, message, telemetry_snapshot, notification_sent, created_at
            "#,
        )
        .bind(alert.factory_id)
        .bind(alert.rule_id)
        .bind(alert.device_id)
        .bind(alert.triggered_at)
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(&alert.telemetry_snapshot)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO rule_cooldowns (rule_id, device_id, last_triggered)
            VALUES ($1, $2, $3)
            ON CONFLICT (rule_id, device_id) DO UPDATE SET
                last_triggered = EXCLUDED.last_triggered
            "#,
        )
        .bind(alert.rule_id)
        .bind(alert.device_id)
        .bind(alert.triggered_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        timer.record();
        Ok(entity)
    }

    /// Find one alert by id within a factory.
    pub async fn find_by_id(
        &self,
        factory_id: i64,
        alert_id: i64,
    ) -> Result<Option<AlertEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_alert_by_id");
        let result = sqlx::query_as::<_, AlertEntity>(
            r#"
            SELECT id, factory_id, rule_id, device_id, triggered_at, resolved_at,
                   severity, message, telemetry_snapshot, notification_sent, created_at
            FROM alerts
            WHERE factory_id = $1 AND id = $2
            "#,
        )
        .bind(factory_id)
        .bind(alert_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Resolve an alert. Returns rows affected (0 if absent, foreign, or
    /// already resolved).
    pub async fn resolve(&self, factory_id: i64, alert_id: i64) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("resolve_alert");
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET resolved_at = NOW()
            WHERE factory_id = $1 AND id = $2 AND resolved_at IS NULL
            "#,
        )
        .bind(factory_id)
        .bind(alert_id)
        .execute(&self.pool)
        .await?;
        timer.record();
        Ok(result.rows_affected())
    }

    /// Mark the notification for an alert as sent.
    pub async fn mark_notification_sent(
        &self,
        factory_id: i64,
        alert_id: i64,
    ) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("mark_alert_notification_sent");
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET notification_sent = true
            WHERE factory_id = $1 AND id = $2
            "#,
        )
        .bind(factory_id)
        .bind(alert_id)
        .execute(&self.pool)
        .await?;
        timer.record();
        Ok(result.rows_affected())
    }

    /// Active alert counts for the factory summary: total active, active
    /// critical, active high.
    pub async fn count_active(
        &self,
        factory_id: i64,
    ) -> Result<(i64, i64, i64), sqlx::Error> {
        let timer = QueryTimer::new("count_active_alerts");
        let counts: (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) AS active,
                COUNT(*) FILTER (WHERE severity = 'critical') AS critical,
                COUNT(*) FILTER (WHERE severity = 'high') AS high
            FROM alerts
            WHERE factory_id = $1 AND resolved_at IS NULL
            "#,
        )
        .bind(factory_id)
        .fetch_one(&self.pool)
        .await?;
        timer.record();
        Ok(counts)
    }

    /// Alerts of one device in a time range, newest first.
    pub async fn list_for_device(
        &self,
        factory_id: i64,
        device_id: i64,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AlertEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_alerts_for_device");
        let result = sqlx::query_as::<_, AlertEntity>(
            r#"
            SELECT id, factory_id, rule_id, device_id, triggered_at, resolved_at,
                   severity, message, telemetry_snapshot, notification_sent, created_at
            FROM alerts
            WHERE factory_id = $1 AND device_id = $2 AND triggered_at >= $3
            ORDER BY triggered_at DESC
            LIMIT $4
            "#,
        )
        .bind(factory_id)
        .bind(device_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }
}
