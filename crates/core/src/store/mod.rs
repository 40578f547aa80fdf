//! Narrow store interfaces of the hot path.
//!
//! The coordinator and the alerting worker talk to the relational store
//! through these traits; `pg` provides the production implementations
//! over the persistence repositories, tests substitute in-memory ones.
//! Every method that touches a factory-owned table takes `factory_id`
//! explicitly.

mod pg;

pub use pg::{PgAlertStore, PgMetadataStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::IngestError;
use domain::models::{
    Alert, DataType, Device, DeviceParameter, Factory, NewAlert, Rule, RuleCooldown,
};

/// Identity and discovery operations used by the ingestion pipeline.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn factory_by_slug(&self, slug: &str) -> Result<Option<Factory>, IngestError>;

    async fn factory_by_id(&self, factory_id: i64) -> Result<Option<Factory>, IngestError>;

    async fn device_by_key(
        &self,
        factory_id: i64,
        device_key: &str,
    ) -> Result<Option<Device>, IngestError>;

    /// Insert a device on first sighting; `None` means another writer won
    /// the race and the caller should re-read.
    async fn create_device_if_absent(
        &self,
        factory_id: i64,
        device_key: &str,
    ) -> Result<Option<Device>, IngestError>;

    async fn parameter_keys(
        &self,
        factory_id: i64,
        device_id: i64,
    ) -> Result<Vec<String>, IngestError>;

    /// KPI-selected parameters of a device, with display metadata. Backs
    /// the live-KPI read model.
    async fn kpi_parameters(
        &self,
        factory_id: i64,
        device_id: i64,
    ) -> Result<Vec<DeviceParameter>, IngestError>;

    /// Idempotent parameter upsert; returns true when the row was created
    /// by this call.
    async fn insert_parameter_if_absent(
        &self,
        factory_id: i64,
        device_id: i64,
        parameter_key: &str,
        display_name: &str,
        data_type: DataType,
    ) -> Result<bool, IngestError>;

    async fn update_last_seen(
        &self,
        factory_id: i64,
        device_id: i64,
        seen_at: DateTime<Utc>,
    ) -> Result<(), IngestError>;
}

/// Rule and alert operations used by the alerting worker.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn candidate_rules(
        &self,
        factory_id: i64,
        device_id: i64,
    ) -> Result<Vec<Rule>, IngestError>;

    async fn factory_timezone(&self, factory_id: i64) -> Result<Option<String>, IngestError>;

    async fn cooldown(
        &self,
        rule_id: i64,
        device_id: i64,
    ) -> Result<Option<RuleCooldown>, IngestError>;

    /// Persist the alert and advance the cooldown marker atomically.
    async fn create_alert_with_cooldown(&self, alert: &NewAlert) -> Result<Alert, IngestError>;
}
