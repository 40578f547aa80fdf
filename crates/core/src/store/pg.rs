//! Postgres implementations of the store interfaces.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;

use crate::error::IngestError;
use domain::models::{
    Alert, DataType, Device, DeviceParameter, Factory, NewAlert, Rule, RuleCooldown,
};
use persistence::repositories::{
    AlertRepository, DeviceRepository, FactoryRepository, ParameterRepository, RuleRepository,
};

/// Apply the relational-operation deadline; a timeout is a transient
/// store failure like any other I/O error.
async fn with_deadline<T, F>(deadline: Duration, op: F) -> Result<T, IngestError>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(deadline, op).await {
        Ok(result) => result.map_err(IngestError::from),
        Err(_) => Err(IngestError::TransientStore(
            "relational operation timed out".to_string(),
        )),
    }
}

/// Production MetadataStore over the persistence repositories.
#[derive(Clone)]
pub struct PgMetadataStore {
    factories: FactoryRepository,
    devices: DeviceRepository,
    parameters: ParameterRepository,
    op_deadline: Duration,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool, op_deadline: Duration) -> Self {
        Self {
            factories: FactoryRepository::new(pool.clone()),
            devices: DeviceRepository::new(pool.clone()),
            parameters: ParameterRepository::new(pool),
            op_deadline,
        }
    }
}

#[async_trait]
impl super::MetadataStore for PgMetadataStore {
    async fn factory_by_slug(&self, slug: &str) -> Result<Option<Factory>, IngestError> {
        let entity = with_deadline(self.op_deadline, self.factories.find_by_slug(slug)).await?;
        Ok(entity.map(Into::into))
    }

    async fn factory_by_id(&self, factory_id: i64) -> Result<Option<Factory>, IngestError> {
        let entity = with_deadline(self.op_deadline, self.factories.find_by_id(factory_id)).await?;
        Ok(entity.map(Into::into))
    }

    async fn device_by_key(
        &self,
        factory_id: i64,
        device_key: &str,
    ) -> Result<Option<Device>, IngestError> {
        let entity = with_deadline(
            self.op_deadline,
            self.devices.find_by_key(factory_id, device_key),
        )
        .await?;
        Ok(entity.map(Into::into))
    }

    async fn create_device_if_absent(
        &self,
        factory_id: i64,
        device_key: &str,
    ) -> Result<Option<Device>, IngestError> {
        let entity = with_deadline(
            self.op_deadline,
            self.devices.insert_if_absent(factory_id, device_key),
        )
        .await?;
        Ok(entity.map(Into::into))
    }

    async fn parameter_keys(
        &self,
        factory_id: i64,
        device_id: i64,
    ) -> Result<Vec<String>, IngestError> {
        with_deadline(
            self.op_deadline,
            self.parameters.list_keys(factory_id, device_id),
        )
        .await
    }

    async fn kpi_parameters(
        &self,
        factory_id: i64,
        device_id: i64,
    ) -> Result<Vec<DeviceParameter>, IngestError> {
        let entities = with_deadline(
            self.op_deadline,
            self.parameters.list_for_device(factory_id, device_id),
        )
        .await?;
        entities
            .into_iter()
            .filter(|e| e.is_kpi_selected)
            .map(|e| {
                DeviceParameter::try_from(e)
                    .map_err(|msg: String| IngestError::PermanentStore(msg))
            })
            .collect()
    }

    async fn insert_parameter_if_absent(
        &self,
        factory_id: i64,
        device_id: i64,
        parameter_key: &str,
        display_name: &str,
        data_type: DataType,
    ) -> Result<bool, IngestError> {
        with_deadline(
            self.op_deadline,
            self.parameters.insert_if_absent(
                factory_id,
                device_id,
                parameter_key,
                display_name,
                data_type,
            ),
        )
        .await
    }

    async fn update_last_seen(
        &self,
        factory_id: i64,
        device_id: i64,
        seen_at: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        with_deadline(
            self.op_deadline,
            self.devices.update_last_seen(factory_id, device_id, seen_at),
        )
        .await
    }
}

/// Production AlertStore over the persistence repositories.
#[derive(Clone)]
pub struct PgAlertStore {
    factories: FactoryRepository,
    rules: RuleRepository,
    alerts: AlertRepository,
    op_deadline: Duration,
}

impl PgAlertStore {
    pub fn new(pool: PgPool, op_deadline: Duration) -> Self {
        Self {
            factories: FactoryRepository::new(pool.clone()),
            rules: RuleRepository::new(pool.clone()),
            alerts: AlertRepository::new(pool),
            op_deadline,
        }
    }
}

#[async_trait]
impl super::AlertStore for PgAlertStore {
    async fn candidate_rules(
        &self,
        factory_id: i64,
        device_id: i64,
    ) -> Result<Vec<Rule>, IngestError> {
        with_deadline(
            self.op_deadline,
            self.rules.candidates_for_device(factory_id, device_id),
        )
        .await
    }

    async fn factory_timezone(&self, factory_id: i64) -> Result<Option<String>, IngestError> {
        let entity = with_deadline(self.op_deadline, self.factories.find_by_id(factory_id)).await?;
        Ok(entity.map(|f| f.timezone))
    }

    async fn cooldown(
        &self,
        rule_id: i64,
        device_id: i64,
    ) -> Result<Option<RuleCooldown>, IngestError> {
        let entity =
            with_deadline(self.op_deadline, self.alerts.get_cooldown(rule_id, device_id)).await?;
        Ok(entity.map(Into::into))
    }

    async fn create_alert_with_cooldown(&self, alert: &NewAlert) -> Result<Alert, IngestError> {
        let entity =
            with_deadline(self.op_deadline, self.alerts.create_with_cooldown(alert)).await?;
        entity
            .try_into()
            .map_err(|msg: String| IngestError::PermanentStore(msg))
    }
}
