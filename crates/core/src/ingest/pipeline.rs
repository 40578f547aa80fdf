//! Per-message processing pipeline.
//!
//! Orchestrates identity resolution, parameter discovery, the
//! time-series enqueue, the last-seen tracker and rule-eval dispatch for
//! one validated broker message. Telemetry persistence is favored over
//! alert-path completeness: a saturated rule queue drops the dispatch
//! while the sample still lands.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::IdentityCache;
use crate::discovery::ParameterDiscovery;
use crate::error::IngestError;
use crate::ingest::{parse_payload, parse_topic};
use crate::queue::{submit_bounded, QueueError, WorkQueue, RULE_ENGINE_QUEUE};
use crate::tsdb::Sample;
use crate::workers::RuleEngineTask;

use super::LastSeenTracker;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub queue_max_depth: usize,
    pub queue_submit_wait: Duration,
}

pub struct Pipeline {
    identity: Arc<IdentityCache>,
    discovery: ParameterDiscovery,
    samples: mpsc::Sender<Sample>,
    last_seen: LastSeenTracker,
    queue: Arc<dyn WorkQueue>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        identity: Arc<IdentityCache>,
        discovery: ParameterDiscovery,
        samples: mpsc::Sender<Sample>,
        last_seen: LastSeenTracker,
        queue: Arc<dyn WorkQueue>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            identity,
            discovery,
            samples,
            last_seen,
            queue,
            config,
        }
    }

    /// Process one broker message end to end.
    ///
    /// Within one device the caller serializes invocations, so parameter
    /// discovery completes before the sample is enqueued and `last_seen`
    /// observations arrive in order.
    pub async fn process(&self, topic: &str, payload: &[u8]) -> Result<(), IngestError> {
        counter!("telemetry_messages_total").increment(1);

        let parts = parse_topic(topic)?;
        let now = Utc::now();
        let parsed = parse_payload(payload, now)?;
        if parsed.clamped {
            counter!("telemetry_timestamps_clamped_total").increment(1);
            warn!(topic = %topic, "future timestamp clamped to ingestion time");
        }

        let factory = self.identity.resolve_factory(&parts.slug).await?;
        let device_id = self
            .identity
            .resolve_device_or_create(factory.id, &parts.device_key)
            .await?;

        self.discovery
            .discover(factory.id, device_id, &parsed.metrics)
            .await?;

        let sample = Sample {
            factory_id: factory.id,
            device_id,
            fields: parsed.metrics.clone(),
            timestamp: parsed.timestamp,
        };
        self.samples
            .send(sample)
            .await
            .map_err(|_| IngestError::Shutdown)?;

        self.last_seen
            .record(factory.id, device_id, parsed.timestamp)
            .await;

        self.dispatch_rule_eval(RuleEngineTask {
            factory_id: factory.id,
            device_id,
            metrics: parsed.metrics,
            timestamp: parsed.timestamp,
        })
        .await;

        debug!(
            factory_id = factory.id,
            device_id = device_id,
            slug = %parts.slug,
            device_key = %parts.device_key,
            "telemetry processed"
        );
        Ok(())
    }

    /// Submit the rule-eval task with bounded backpressure. Dispatch
    /// failures degrade the alert path only; the sample is already on its
    /// way to the time-series store.
    async fn dispatch_rule_eval(&self, task: RuleEngineTask) {
        let payload = match serde_json::to_vec(&task) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to serialize rule-eval task");
                return;
            }
        };

        match submit_bounded(
            self.queue.as_ref(),
            RULE_ENGINE_QUEUE,
            &payload,
            self.config.queue_max_depth,
            self.config.queue_submit_wait,
        )
        .await
        {
            Ok(_) => {}
            Err(QueueError::Saturated(_)) => {
                counter!("rule_dispatch_dropped").increment(1);
                warn!(
                    factory_id = task.factory_id,
                    device_id = task.device_id,
                    "rule queue saturated, dropping dispatch"
                );
            }
            Err(e) => {
                counter!("rule_dispatch_dropped").increment(1);
                warn!(
                    factory_id = task.factory_id,
                    device_id = task.device_id,
                    error = %e,
                    "rule dispatch failed"
                );
            }
        }
    }
}
