//! Durable named work queues (C7).
//!
//! FIFO queues with per-queue concurrency caps, retry with exponential
//! backoff, dead-lettering after the retry cap, and a visibility timeout
//! that returns lost in-flight tasks to the queue. Payloads are opaque
//! and size-bounded. Delivery is at-least-once; consumers are idempotent
//! or tolerate duplicates.

mod memory;
mod redis;

pub use memory::InMemoryQueue;
pub use redis::RedisQueue;

use async_trait::async_trait;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::shutdown::Shutdown;

pub const RULE_ENGINE_QUEUE: &str = "rule_engine";
pub const ANALYTICS_QUEUE: &str = "analytics";
pub const REPORTING_QUEUE: &str = "reporting";
pub const NOTIFICATIONS_QUEUE: &str = "notifications";

/// Upper bound on a task payload.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Configured maximum concurrency per queue.
pub fn max_in_flight(queue: &str) -> usize {
    match queue {
        RULE_ENGINE_QUEUE => 4,
        ANALYTICS_QUEUE => 2,
        REPORTING_QUEUE => 2,
        NOTIFICATIONS_QUEUE => 4,
        _ => 1,
    }
}

/// A task reserved from a queue. Holders must `ack` or `nack` it before
/// the visibility timeout, or it becomes visible again.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub queue: String,
    pub payload: Vec<u8>,
    /// Zero-based delivery attempt.
    pub attempt: u32,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue {0} is saturated")]
    Saturated(String),

    #[error("payload of {0} bytes exceeds the {max} byte bound", max = MAX_PAYLOAD_BYTES)]
    PayloadTooLarge(usize),

    #[error("queue backend error: {0}")]
    Backend(String),
}

/// Narrow interface over the queue backend (Redis in production, an
/// in-memory implementation in tests).
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append a task; returns its ticket.
    async fn submit(&self, queue: &str, payload: &[u8]) -> Result<Uuid, QueueError>;

    /// Reserve the next visible task, if any. Non-blocking.
    async fn reserve(&self, queue: &str) -> Result<Option<Task>, QueueError>;

    /// Remove a completed task.
    async fn ack(&self, task: &Task) -> Result<(), QueueError>;

    /// Fail a task: schedule a backoff retry when `requeue` is set and
    /// attempts remain, dead-letter otherwise.
    async fn nack(&self, task: &Task, requeue: bool) -> Result<(), QueueError>;

    /// Pending depth of a queue.
    async fn depth(&self, queue: &str) -> Result<usize, QueueError>;
}

/// Submit with bounded-wait backpressure: while the queue is over
/// `max_depth`, wait in small steps up to `max_wait`, then give up with
/// `Saturated` so the caller can drop the dispatch.
pub async fn submit_bounded(
    queue: &dyn WorkQueue,
    name: &str,
    payload: &[u8],
    max_depth: usize,
    max_wait: Duration,
) -> Result<Uuid, QueueError> {
    let deadline = tokio::time::Instant::now() + max_wait;
    loop {
        if queue.depth(name).await? < max_depth {
            return queue.submit(name, payload).await;
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(QueueError::Saturated(name.to_string()));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Drive a consumer loop for one queue: reserve tasks, run the handler
/// under the queue's concurrency cap, ack on success and nack on failure.
/// Runs until shutdown, then drains in-flight handlers.
pub async fn run_consumer<F, Fut>(
    queue: Arc<dyn WorkQueue>,
    name: &'static str,
    handler: F,
    shutdown: Shutdown,
) where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), String>> + Send + 'static,
{
    let cap = max_in_flight(name);
    let semaphore = Arc::new(Semaphore::new(cap));
    let handler = Arc::new(handler);

    loop {
        if shutdown.is_triggered() {
            break;
        }

        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.triggered() => break,
        };

        let task = match queue.reserve(name).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(100)) => continue,
                    _ = shutdown.triggered() => break,
                }
            }
            Err(e) => {
                drop(permit);
                error!(queue = name, error = %e, "queue reserve failed");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                    _ = shutdown.triggered() => break,
                }
            }
        };

        let queue = queue.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match handler(task.clone()).await {
                Ok(()) => {
                    if let Err(e) = queue.ack(&task).await {
                        warn!(queue = name, task = %task.id, error = %e, "ack failed");
                    }
                }
                Err(reason) => {
                    counter!("queue_task_failures_total", "queue" => name).increment(1);
                    warn!(queue = name, task = %task.id, reason = %reason, "task failed");
                    if let Err(e) = queue.nack(&task, true).await {
                        warn!(queue = name, task = %task.id, error = %e, "nack failed");
                    }
                }
            }
        });
    }

    // Drain: wait for all permits to come back.
    let _ = semaphore.acquire_many(cap as u32).await;
    debug!(queue = name, "consumer drained");
}
