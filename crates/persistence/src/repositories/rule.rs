//! Rule repository for database operations.

use sqlx::PgPool;

use crate::entities::RuleWithDevicesEntity;
use crate::metrics::QueryTimer;
use domain::models::{CreateRuleRequest, Rule};

/// Repository for rule-related database operations.
#[derive(Clone)]
pub struct RuleRepository {
    pool: PgPool,
}

const RULE_COLUMNS: &str = r#"
    r.id, r.factory_id, r.name, r.description, r.scope, r.conditions,
    r.cooldown_minutes, r.is_active, r.schedule_type, r.schedule_config,
    r.severity, r.notification_channels, r.created_at, r.updated_at
"#;

impl RuleRepository {
    /// Creates a new RuleRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Candidate rules for a `(factory, device)` pair: active rules that
    /// are global, or device-scoped and listing this device.
    ///
    /// Device-scoped rules with an empty device list never match, so a
    /// legacy row that predates validation cannot fire.
    pub async fn candidates_for_device(
        &self,
        factory_id: i64,
        device_id: i64,
    ) -> Result<Vec<Rule>, sqlx::Error> {
        let timer = QueryTimer::new("candidate_rules_for_device");
        let query = format!(
            r#"
            SELECT {RULE_COLUMNS},
                   COALESCE(
                       ARRAY_AGG(rd.device_id) FILTER (WHERE rd.device_id IS NOT NULL),
                       '{{}}'
                   ) AS device_ids
            FROM rules r
            LEFT JOIN rule_devices rd ON rd.rule_id = r.id
            WHERE r.factory_id = $1
              AND r.is_active = true
              AND (
                  r.scope = 'global'
                  OR EXISTS (
                      SELECT 1 FROM rule_devices x
                      WHERE x.rule_id = r.id AND x.device_id = $2
                  )
              )
            GROUP BY r.id
            ORDER BY r.id
            "#
        );
        let entities = sqlx::query_as::<_, RuleWithDevicesEntity>(&query)
            .bind(factory_id)
            .bind(device_id)
            .fetch_all(&self.pool)
            .await?;
        timer.record();

        entities
            .into_iter()
            .map(|e| Rule::try_from(e).map_err(|msg| sqlx::Error::Decode(msg.into())))
            .collect()
    }

    /// Find one rule by id within a factory.
    pub async fn find_by_id(
        &self,
        factory_id: i64,
        rule_id: i64,
    ) -> Result<Option<Rule>, sqlx::Error> {
        let timer = QueryTimer::new("find_rule_by_id");
        let query = format!(
            r#"
            SELECT {RULE_COLUMNS},
                   COALESCE(
                       ARRAY_AGG(rd.device_id) FILTER (WHERE rd.device_id IS NOT NULL),
                       '{{}}'
                   ) AS device_ids
            FROM rules r
            LEFT JOIN rule_devices rd ON rd.rule_id = r.id
            WHERE r.factory_id = $1 AND r.id = $2
            GROUP BY r.id
            "#
        );
        let entity = sqlx::query_as::<_, RuleWithDevicesEntity>(&query)
            .bind(factory_id)
            .bind(rule_id)
            .fetch_optional(&self.pool)
            .await?;
        timer.record();

        entity
            .map(|e| Rule::try_from(e).map_err(|msg| sqlx::Error::Decode(msg.into())))
            .transpose()
    }

    /// Create a rule with its device associations in one transaction.
    ///
    /// The request is assumed validated (`CreateRuleRequest::validate`);
    /// device ids that do not belong to the factory are rejected by the
    /// membership check so a rule can never reference foreign devices.
    pub async fn create(
        &self,
        factory_id: i64,
        request: &CreateRuleRequest,
    ) -> Result<Rule, sqlx::Error> {
        let timer = QueryTimer::new("create_rule");
        let mut tx = self.pool.begin().await?;

        if !request.device_ids.is_empty() {
            let owned: (i64,) = sqlx::query_as(
                r#"
                SELECT COUNT(*)
                FROM devices
                WHERE factory_id = $1 AND id = ANY($2)
                "#,
            )
            .bind(factory_id)
            .bind(&request.device_ids)
            .fetch_one(&mut *tx)
            .await?;
            if owned.0 != request.device_ids.len() as i64 {
                return Err(sqlx::Error::Decode(
                    "rule references devices outside the factory".into(),
                ));
            }
        }

        let conditions = serde_json::to_value(&request.conditions)
            .map_err(|e| sqlx::Error::Decode(e.into()))?;
        let schedule_config = request
            .schedule_config
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;
        let channels = serde_json::to_value(request.notification_channels)
            .map_err(|e| sqlx::Error::Decode(e.into()))?;

        let (rule_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO rules
                (factory_id, name, description, scope, conditions, cooldown_minutes,
                 is_active, schedule_type, schedule_config, severity,
                 notification_channels, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, true, $7, $8, $9, $10, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(factory_id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.scope.as_str())
        .bind(&conditions)
        .bind(request.cooldown_minutes)
        .bind(request.schedule_type.as_str())
        .bind(&schedule_config)
        .bind(request.severity.as_str())
        .bind(&channels)
        .fetch_one(&mut *tx)
        .await?;

        for device_id in &request.device_ids {
            sqlx::query(
                r#"
                INSERT INTO rule_devices (rule_id, device_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(rule_id)
            .bind(device_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        timer.record();

        self.find_by_id(factory_id, rule_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Toggle a rule's active flag. Returns rows affected.
    pub async fn set_active(
        &self,
        factory_id: i64,
        rule_id: i64,
        is_active: bool,
    ) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("set_rule_active");
        let result = sqlx::query(
            r#"
            UPDATE rules
            SET is_active = $3, updated_at = NOW()
            WHERE factory_id = $1 AND id = $2
            "#,
        )
        .bind(factory_id)
        .bind(rule_id)
        .bind(is_active)
        .execute(&self.pool)
        .await?;
        timer.record();
        Ok(result.rows_affected())
    }

    /// Delete a rule. Join rows and cooldowns cascade.
    pub async fn delete(&self, factory_id: i64, rule_id: i64) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("delete_rule");
        let result = sqlx::query(
            r#"
            DELETE FROM rules
            WHERE factory_id = $1 AND id = $2
            "#,
        )
        .bind(factory_id)
        .bind(rule_id)
        .execute(&self.pool)
        .await?;
        timer.record();
        Ok(result.rows_affected())
    }
}
