//! Common test utilities for integration tests.
//!
//! Provides an in-memory implementation of the store interfaces plus a
//! wired-up pipeline harness, so the ingestion and alerting paths can be
//! exercised end to end without Postgres, Redis or a broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};

use domain::models::{
    Alert, DataType, Device, DeviceParameter, Factory, NewAlert, Rule, RuleCooldown,
};
use factoryops_core::cache::{IdentityCache, IdentityCacheConfig, InMemoryCache};
use factoryops_core::discovery::ParameterDiscovery;
use factoryops_core::error::IngestError;
use factoryops_core::ingest::{LastSeenTracker, Pipeline, PipelineConfig};
use factoryops_core::queue::InMemoryQueue;
use factoryops_core::store::{AlertStore, MetadataStore};
use factoryops_core::tsdb::Sample;

/// A stored parameter row.
#[derive(Debug, Clone)]
pub struct ParameterRow {
    pub factory_id: i64,
    pub device_id: i64,
    pub parameter_key: String,
    pub display_name: String,
    pub data_type: DataType,
}

/// In-memory relational store implementing both store interfaces with
/// the same isolation semantics as the SQL layer.
#[derive(Default)]
pub struct TestStore {
    pub factories: Mutex<Vec<Factory>>,
    pub devices: Mutex<Vec<Device>>,
    pub parameters: Mutex<Vec<ParameterRow>>,
    pub rules: Mutex<Vec<Rule>>,
    pub cooldowns: Mutex<HashMap<(i64, i64), RuleCooldown>>,
    pub alerts: Mutex<Vec<Alert>>,
    pub last_seen: Mutex<HashMap<(i64, i64), DateTime<Utc>>>,
    next_device_id: AtomicI64,
    next_alert_id: AtomicI64,
}

impl TestStore {
    pub fn new() -> Arc<Self> {
        let store = Self::default();
        store.next_device_id.store(1, Ordering::SeqCst);
        store.next_alert_id.store(1, Ordering::SeqCst);
        Arc::new(store)
    }

    pub async fn add_factory(&self, id: i64, slug: &str, timezone: &str) {
        self.factories.lock().await.push(Factory {
            id,
            slug: slug.to_string(),
            name: format!("{} factory", slug),
            timezone: timezone.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
    }

    pub async fn add_rule(&self, rule: Rule) {
        self.rules.lock().await.push(rule);
    }

    pub async fn set_cooldown(&self, rule_id: i64, device_id: i64, last_triggered: DateTime<Utc>) {
        self.cooldowns.lock().await.insert(
            (rule_id, device_id),
            RuleCooldown {
                rule_id,
                device_id,
                last_triggered,
            },
        );
    }

    pub async fn device_by_key_sync(&self, factory_id: i64, device_key: &str) -> Option<Device> {
        self.devices
            .lock()
            .await
            .iter()
            .find(|d| d.factory_id == factory_id && d.device_key == device_key)
            .cloned()
    }
}

#[async_trait]
impl MetadataStore for TestStore {
    async fn factory_by_slug(&self, slug: &str) -> Result<Option<Factory>, IngestError> {
        Ok(self
            .factories
            .lock()
            .await
            .iter()
            .find(|f| f.slug == slug)
            .cloned())
    }

    async fn factory_by_id(&self, factory_id: i64) -> Result<Option<Factory>, IngestError> {
        Ok(self
            .factories
            .lock()
            .await
            .iter()
            .find(|f| f.id == factory_id)
            .cloned())
    }

    async fn device_by_key(
        &self,
        factory_id: i64,
        device_key: &str,
    ) -> Result<Option<Device>, IngestError> {
        Ok(self.device_by_key_sync(factory_id, device_key).await)
    }

    async fn create_device_if_absent(
        &self,
        factory_id: i64,
        device_key: &str,
    ) -> Result<Option<Device>, IngestError> {
        let mut devices = self.devices.lock().await;
        if devices
            .iter()
            .any(|d| d.factory_id == factory_id && d.device_key == device_key)
        {
            return Ok(None);
        }
        let device = Device {
            id: self.next_device_id.fetch_add(1, Ordering::SeqCst),
            factory_id,
            device_key: device_key.to_string(),
            name: None,
            manufacturer: None,
            model: None,
            region: None,
            is_active: true,
            last_seen: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        devices.push(device.clone());
        Ok(Some(device))
    }

    async fn parameter_keys(
        &self,
        factory_id: i64,
        device_id: i64,
    ) -> Result<Vec<String>, IngestError> {
        Ok(self
            .parameters
            .lock()
            .await
            .iter()
            .filter(|p| p.factory_id == factory_id && p.device_id == device_id)
            .map(|p| p.parameter_key.clone())
            .collect())
    }

    async fn kpi_parameters(
        &self,
        factory_id: i64,
        device_id: i64,
    ) -> Result<Vec<DeviceParameter>, IngestError> {
        let now = Utc::now();
        Ok(self
            .parameters
            .lock()
            .await
            .iter()
            .enumerate()
            .filter(|(_, p)| p.factory_id == factory_id && p.device_id == device_id)
            .map(|(index, p)| DeviceParameter {
                id: index as i64 + 1,
                factory_id: p.factory_id,
                device_id: p.device_id,
                parameter_key: p.parameter_key.clone(),
                display_name: Some(p.display_name.clone()),
                unit: None,
                data_type: p.data_type,
                is_kpi_selected: true,
                discovered_at: now,
                updated_at: now,
            })
            .collect())
    }

    async fn insert_parameter_if_absent(
        &self,
        factory_id: i64,
        device_id: i64,
        parameter_key: &str,
        display_name: &str,
        data_type: DataType,
    ) -> Result<bool, IngestError> {
        let mut parameters = self.parameters.lock().await;
        if parameters
            .iter()
            .any(|p| p.device_id == device_id && p.parameter_key == parameter_key)
        {
            return Ok(false);
        }
        parameters.push(ParameterRow {
            factory_id,
            device_id,
            parameter_key: parameter_key.to_string(),
            display_name: display_name.to_string(),
            data_type,
        });
        Ok(true)
    }

    async fn update_last_seen(
        &self,
        factory_id: i64,
        device_id: i64,
        seen_at: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        let mut last_seen = self.last_seen.lock().await;
        let entry = last_seen.entry((factory_id, device_id)).or_insert(seen_at);
        if seen_at > *entry {
            *entry = seen_at;
        }
        let mut devices = self.devices.lock().await;
        if let Some(device) = devices
            .iter_mut()
            .find(|d| d.factory_id == factory_id && d.id == device_id)
        {
            device.last_seen = Some(device.last_seen.map_or(seen_at, |t| t.max(seen_at)));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertStore for TestStore {
    async fn candidate_rules(
        &self,
        factory_id: i64,
        device_id: i64,
    ) -> Result<Vec<Rule>, IngestError> {
        Ok(self
            .rules
            .lock()
            .await
            .iter()
            .filter(|r| {
                r.factory_id == factory_id
                    && r.is_active
                    && (r.scope == domain::models::RuleScope::Global
                        || r.device_ids.contains(&device_id))
            })
            .cloned()
            .collect())
    }

    async fn factory_timezone(&self, factory_id: i64) -> Result<Option<String>, IngestError> {
        Ok(self
            .factories
            .lock()
            .await
            .iter()
            .find(|f| f.id == factory_id)
            .map(|f| f.timezone.clone()))
    }

    async fn cooldown(
        &self,
        rule_id: i64,
        device_id: i64,
    ) -> Result<Option<RuleCooldown>, IngestError> {
        Ok(self
            .cooldowns
            .lock()
            .await
            .get(&(rule_id, device_id))
            .cloned())
    }

    async fn create_alert_with_cooldown(&self, alert: &NewAlert) -> Result<Alert, IngestError> {
        let created = Alert {
            id: self.next_alert_id.fetch_add(1, Ordering::SeqCst),
            factory_id: alert.factory_id,
            rule_id: alert.rule_id,
            device_id: alert.device_id,
            triggered_at: alert.triggered_at,
            resolved_at: None,
            severity: alert.severity,
            message: alert.message.clone(),
            telemetry_snapshot: alert.telemetry_snapshot.clone(),
            notification_sent: false,
            created_at: alert.triggered_at,
        };
        self.alerts.lock().await.push(created.clone());
        self.cooldowns.lock().await.insert(
            (alert.rule_id, alert.device_id),
            RuleCooldown {
                rule_id: alert.rule_id,
                device_id: alert.device_id,
                last_triggered: alert.triggered_at,
            },
        );
        Ok(created)
    }
}

/// Fully wired pipeline over in-memory backends.
pub struct Harness {
    pub store: Arc<TestStore>,
    pub pipeline: Pipeline,
    pub samples_rx: mpsc::Receiver<Sample>,
    pub queue: Arc<InMemoryQueue>,
    pub shared: Arc<InMemoryCache>,
    pub last_seen: LastSeenTracker,
}

pub fn identity_config() -> IdentityCacheConfig {
    IdentityCacheConfig {
        identity_ttl: Duration::from_secs(3600),
        params_ttl: Duration::from_secs(600),
        negative_ttl: Duration::from_secs(30),
        auto_create_devices: true,
    }
}

pub fn harness(store: Arc<TestStore>) -> Harness {
    let shared = InMemoryCache::shared();
    let identity = Arc::new(IdentityCache::new(
        store.clone(),
        shared.clone(),
        identity_config(),
    ));
    let discovery = ParameterDiscovery::new(identity.clone(), store.clone());
    let (samples_tx, samples_rx) = mpsc::channel(128);
    let queue = Arc::new(InMemoryQueue::new(5));
    let last_seen = LastSeenTracker::new();

    let pipeline = Pipeline::new(
        identity,
        discovery,
        samples_tx,
        last_seen.clone(),
        queue.clone(),
        PipelineConfig {
            queue_max_depth: 1000,
            queue_submit_wait: Duration::from_millis(100),
        },
    );

    Harness {
        store,
        pipeline,
        samples_rx,
        queue,
        shared,
        last_seen,
    }
}
