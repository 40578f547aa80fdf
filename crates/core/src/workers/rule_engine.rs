//! Alerting worker (C6).
//!
//! Consumes `rule_engine` tasks, loads the candidate rules for the
//! `(factory, device)` pair, evaluates each against the message metrics,
//! enforces the per-(rule, device) cooldown, persists fired alerts
//! together with their cooldown marker, and enqueues notification tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{keys, Invalidation, SharedCache};
use crate::error::IngestError;
use crate::queue::{run_consumer, WorkQueue, NOTIFICATIONS_QUEUE, RULE_ENGINE_QUEUE};
use crate::shutdown::Shutdown;
use crate::store::AlertStore;
use domain::models::{Metrics, NewAlert, Rule};
use domain::services::rule_eval;

use super::NotificationTask;

/// Factory timezones change rarely; a plain TTL is enough.
const TIMEZONE_TTL: Duration = Duration::from_secs(3600);

/// One unit of rule-evaluation work, as submitted by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEngineTask {
    pub factory_id: i64,
    pub device_id: i64,
    pub metrics: Metrics,
    pub timestamp: DateTime<Utc>,
}

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Entry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn live(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

pub struct AlertingWorker {
    queue: Arc<dyn WorkQueue>,
    store: Arc<dyn AlertStore>,
    shared: Arc<dyn SharedCache>,
    rules_ttl: Duration,
    rules: Mutex<HashMap<(i64, i64), Entry<Vec<Rule>>>>,
    timezones: Mutex<HashMap<i64, Entry<String>>>,
}

impl AlertingWorker {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn AlertStore>,
        shared: Arc<dyn SharedCache>,
        rules_ttl: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            store,
            shared,
            rules_ttl,
            rules: Mutex::new(HashMap::new()),
            timezones: Mutex::new(HashMap::new()),
        })
    }

    /// Run the consumer loop until shutdown.
    pub fn spawn(self: &Arc<Self>, shutdown: Shutdown) -> JoinHandle<()> {
        let worker = self.clone();
        let queue = self.queue.clone();
        tokio::spawn(async move {
            run_consumer(
                queue,
                RULE_ENGINE_QUEUE,
                move |task| {
                    let worker = worker.clone();
                    async move { worker.handle(task.payload).await }
                },
                shutdown,
            )
            .await;
        })
    }

    /// Handle one task payload; an `Err` sends the task back for a
    /// backoff retry (and eventually the dead-letter list).
    pub async fn handle(&self, payload: Vec<u8>) -> Result<(), String> {
        let task: RuleEngineTask =
            serde_json::from_slice(&payload).map_err(|e| format!("bad task payload: {}", e))?;
        self.evaluate_task(&task).await.map_err(|e| e.to_string())
    }

    async fn evaluate_task(&self, task: &RuleEngineTask) -> Result<(), IngestError> {
        let Some(timezone) = self.timezone(task.factory_id).await? else {
            warn!(factory_id = task.factory_id, "factory vanished, skipping task");
            return Ok(());
        };

        let rules = self.candidate_rules(task.factory_id, task.device_id).await?;
        if rules.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        for rule in &rules {
            match rule_eval::evaluate(rule, &task.metrics, now, &timezone) {
                Ok(true) => self.fire(rule, task, now).await?,
                Ok(false) => {}
                // A malformed rule must not block its siblings.
                Err(e) => {
                    counter!("rule_eval_errors_total").increment(1);
                    warn!(rule_id = rule.id, error = %e, "skipping malformed rule");
                }
            }
        }
        Ok(())
    }

    async fn fire(
        &self,
        rule: &Rule,
        task: &RuleEngineTask,
        now: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        if let Some(cooldown) = self.store.cooldown(rule.id, task.device_id).await? {
            if !cooldown.expired(rule.cooldown_minutes, now) {
                counter!("alerts_suppressed_by_cooldown_total").increment(1);
                debug!(
                    rule_id = rule.id,
                    device_id = task.device_id,
                    "alert suppressed by cooldown"
                );
                return Ok(());
            }
        }

        let snapshot = serde_json::to_value(&task.metrics)
            .map_err(|e| IngestError::EvaluatorBug(e.to_string()))?;
        let alert = self
            .store
            .create_alert_with_cooldown(&NewAlert {
                factory_id: task.factory_id,
                rule_id: rule.id,
                device_id: task.device_id,
                triggered_at: now,
                severity: rule.severity,
                message: rule_eval::build_alert_message(rule, &task.metrics),
                telemetry_snapshot: snapshot,
            })
            .await?;

        counter!("alerts_created_total").increment(1);
        info!(
            alert_id = alert.id,
            rule_id = rule.id,
            device_id = task.device_id,
            severity = %rule.severity,
            "alert created"
        );

        let notification = NotificationTask {
            alert_id: alert.id,
            factory_id: task.factory_id,
            severity: rule.severity,
            channels: rule
                .notification_channels
                .names()
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };
        match serde_json::to_vec(&notification) {
            Ok(payload) => {
                if let Err(e) = self.queue.submit(NOTIFICATIONS_QUEUE, &payload).await {
                    warn!(alert_id = alert.id, error = %e, "notification enqueue failed");
                } else {
                    counter!("notifications_enqueued_total").increment(1);
                }
            }
            Err(e) => warn!(alert_id = alert.id, error = %e, "notification encode failed"),
        }
        Ok(())
    }

    async fn timezone(&self, factory_id: i64) -> Result<Option<String>, IngestError> {
        {
            let mut timezones = self.timezones.lock().await;
            match timezones.get(&factory_id) {
                Some(entry) if entry.live() => return Ok(Some(entry.value.clone())),
                Some(_) => {
                    timezones.remove(&factory_id);
                }
                None => {}
            }
        }

        let Some(timezone) = self.store.factory_timezone(factory_id).await? else {
            return Ok(None);
        };
        self.timezones
            .lock()
            .await
            .insert(factory_id, Entry::new(timezone.clone(), TIMEZONE_TTL));
        Ok(Some(timezone))
    }

    /// Candidate rules for the pair, cached with a short TTL and dropped
    /// on rule CRUD invalidations. The id list is mirrored to the shared
    /// cache for dashboard reads.
    async fn candidate_rules(
        &self,
        factory_id: i64,
        device_id: i64,
    ) -> Result<Vec<Rule>, IngestError> {
        {
            let mut rules = self.rules.lock().await;
            match rules.get(&(factory_id, device_id)) {
                Some(entry) if entry.live() => return Ok(entry.value.clone()),
                Some(_) => {
                    rules.remove(&(factory_id, device_id));
                }
                None => {}
            }
        }

        let loaded = self.store.candidate_rules(factory_id, device_id).await?;

        let ids: Vec<i64> = loaded.iter().map(|r| r.id).collect();
        if let Ok(json) = serde_json::to_string(&ids) {
            if let Err(e) = self
                .shared
                .set_ex(&keys::rules(factory_id, device_id), &json, self.rules_ttl)
                .await
            {
                debug!(factory_id = factory_id, error = %e, "rules mirror update failed");
            }
        }

        self.rules.lock().await.insert(
            (factory_id, device_id),
            Entry::new(loaded.clone(), self.rules_ttl),
        );
        Ok(loaded)
    }

    /// Apply an invalidation event from the pub/sub channel.
    pub async fn apply_invalidation(&self, event: &Invalidation) {
        if let Invalidation::Rules { factory_id } = event {
            let mut rules = self.rules.lock().await;
            let dropped: Vec<(i64, i64)> = rules
                .keys()
                .filter(|(fid, _)| fid == factory_id)
                .copied()
                .collect();
            for key in &dropped {
                rules.remove(key);
            }
            drop(rules);
            for (fid, did) in dropped {
                let _ = self.shared.del(&keys::rules(fid, did)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::queue::InMemoryQueue;
    use async_trait::async_trait;
    use domain::models::{
        Alert, CompareOp, ConditionNode, NotificationChannels, RuleCooldown, RuleScope,
        ScheduleType, Severity,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeAlertStore {
        rules: Vec<Rule>,
        cooldowns: Mutex<HashMap<(i64, i64), RuleCooldown>>,
        alerts: Mutex<Vec<Alert>>,
        rule_loads: AtomicUsize,
        next_alert_id: AtomicUsize,
    }

    impl FakeAlertStore {
        fn new(rules: Vec<Rule>) -> Arc<Self> {
            Arc::new(Self {
                rules,
                cooldowns: Mutex::new(HashMap::new()),
                alerts: Mutex::new(Vec::new()),
                rule_loads: AtomicUsize::new(0),
                next_alert_id: AtomicUsize::new(1),
            })
        }
    }

    #[async_trait]
    impl AlertStore for FakeAlertStore {
        async fn candidate_rules(
            &self,
            factory_id: i64,
            device_id: i64,
        ) -> Result<Vec<Rule>, IngestError> {
            self.rule_loads.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .rules
                .iter()
                .filter(|r| {
                    r.factory_id == factory_id
                        && r.is_active
                        && (r.scope == RuleScope::Global || r.device_ids.contains(&device_id))
                })
                .cloned()
                .collect())
        }

        async fn factory_timezone(&self, _factory_id: i64) -> Result<Option<String>, IngestError> {
            Ok(Some("UTC".to_string()))
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

        async fn create_alert_with_cooldown(
            &self,
            alert: &NewAlert,
        ) -> Result<Alert, IngestError> {
            let id = self.next_alert_id.fetch_add(1, Ordering::SeqCst) as i64;
            self.cooldowns.lock().await.insert(
                (alert.rule_id, alert.device_id),
                RuleCooldown {
                    rule_id: alert.rule_id,
                    device_id: alert.device_id,
                    last_triggered: alert.triggered_at,
                },
            );
            let created = Alert {
                id,
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
            Ok(created)
        }
    }

    fn overheat_rule(id: i64) -> Rule {
        Rule {
            id,
            factory_id: 1,
            name: "Overheat".to_string(),
            description: None,
            scope: RuleScope::Device,
            conditions: ConditionNode::Leaf {
                parameter: "spindle_temp".to_string(),
                operator: CompareOp::Gt,
                value: 80.0,
            },
            cooldown_minutes: 15,
            is_active: true,
            schedule_type: ScheduleType::Always,
            schedule_config: None,
            severity: Severity::Critical,
            notification_channels: NotificationChannels {
                email: true,
                whatsapp: false,
            },
            device_ids: vec![5],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn task(temp: f64) -> RuleEngineTask {
        let mut metrics = Metrics::new();
        metrics.insert(
            "spindle_temp".to_string(),
            domain::models::MetricValue::Float(temp),
        );
        RuleEngineTask {
            factory_id: 1,
            device_id: 5,
            metrics,
            timestamp: Utc::now(),
        }
    }

    fn build_worker(store: Arc<FakeAlertStore>) -> (Arc<AlertingWorker>, Arc<InMemoryQueue>) {
        let queue = Arc::new(InMemoryQueue::new(5));
        let worker = AlertingWorker::new(
            queue.clone(),
            store,
            InMemoryCache::shared(),
            Duration::from_secs(30),
        );
        (worker, queue)
    }

    #[tokio::test]
    async fn test_firing_rule_creates_alert_and_notification() {
        let store = FakeAlertStore::new(vec![overheat_rule(7)]);
        let (worker, queue) = build_worker(store.clone());

        worker.evaluate_task(&task(82.5)).await.unwrap();

        let alerts = store.alerts.lock().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert!(alerts[0].message.contains("spindle_temp=82.5"));

        let notification = queue.reserve(NOTIFICATIONS_QUEUE).await.unwrap().unwrap();
        let task: NotificationTask = serde_json::from_slice(&notification.payload).unwrap();
        assert_eq!(task.alert_id, alerts[0].id);
        assert_eq!(task.channels, vec!["email"]);
    }

    #[tokio::test]
    async fn test_non_firing_rule_creates_nothing() {
        let store = FakeAlertStore::new(vec![overheat_rule(7)]);
        let (worker, queue) = build_worker(store.clone());

        worker.evaluate_task(&task(70.0)).await.unwrap();

        assert!(store.alerts.lock().await.is_empty());
        assert!(queue.reserve(NOTIFICATIONS_QUEUE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_refire() {
        let store = FakeAlertStore::new(vec![overheat_rule(7)]);
        let (worker, _queue) = build_worker(store.clone());

        worker.evaluate_task(&task(82.5)).await.unwrap();
        worker.evaluate_task(&task(82.5)).await.unwrap();

        assert_eq!(store.alerts.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_cooldown_allows_refire() {
        let store = FakeAlertStore::new(vec![overheat_rule(7)]);
        let (worker, _queue) = build_worker(store.clone());

        store.cooldowns.lock().await.insert(
            (7, 5),
            RuleCooldown {
                rule_id: 7,
                device_id: 5,
                last_triggered: Utc::now() - chrono::Duration::minutes(16),
            },
        );

        worker.evaluate_task(&task(82.5)).await.unwrap();
        assert_eq!(store.alerts.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rule_cache_and_invalidation() {
        let store = FakeAlertStore::new(vec![overheat_rule(7)]);
        let (worker, _queue) = build_worker(store.clone());

        worker.evaluate_task(&task(70.0)).await.unwrap();
        worker.evaluate_task(&task(70.0)).await.unwrap();
        assert_eq!(store.rule_loads.load(Ordering::SeqCst), 1);

        worker
            .apply_invalidation(&Invalidation::Rules { factory_id: 1 })
            .await;
        worker.evaluate_task(&task(70.0)).await.unwrap();
        assert_eq!(store.rule_loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_rule_skipped_others_fire() {
        let mut broken = overheat_rule(8);
        broken.schedule_type = ScheduleType::TimeWindow;
        broken.schedule_config = None;

        let store = FakeAlertStore::new(vec![broken, overheat_rule(7)]);
        let (worker, _queue) = build_worker(store.clone());

        worker.evaluate_task(&task(82.5)).await.unwrap();

        let alerts = store.alerts.lock().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule_id, 7);
    }

    #[tokio::test]
    async fn test_bad_payload_is_an_error() {
        let store = FakeAlertStore::new(vec![]);
        let (worker, _queue) = build_worker(store);
        assert!(worker.handle(b"not json".to_vec()).await.is_err());
    }
}
