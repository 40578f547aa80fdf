//! Redis-backed WorkQueue implementation.
//!
//! Layout per queue `name`:
//! - `q:{name}:pending`    list of task ids (FIFO)
//! - `q:{name}:task:{id}`  serialized task record
//! - `q:{name}:delayed`    zset id -> retry-at (epoch ms)
//! - `q:{name}:processing` zset id -> visibility deadline (epoch ms)
//! - `q:{name}:dead`       list of dead-lettered task ids
//!
//! Queue state lives in Redis and survives restarts. Reserve promotes due
//! delayed tasks and reclaims in-flight tasks whose visibility deadline
//! passed, then pops the oldest pending id. The steps are not atomic
//! across keys; a crash between them at worst re-delivers, which the
//! at-least-once contract already allows.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::{QueueError, Task, WorkQueue, MAX_PAYLOAD_BYTES};
use crate::backoff;

#[derive(Debug, Serialize, Deserialize)]
struct TaskRecord {
    id: Uuid,
    queue: String,
    payload: Vec<u8>,
    attempt: u32,
}

pub struct RedisQueue {
    manager: ConnectionManager,
    max_retries: u32,
    visibility_timeout_ms: i64,
}

impl RedisQueue {
    pub async fn connect(
        url: &str,
        max_retries: u32,
        visibility_timeout_secs: u64,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(url).map_err(backend_err)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(backend_err)?;
        Ok(Self {
            manager,
            max_retries,
            visibility_timeout_ms: (visibility_timeout_secs * 1000) as i64,
        })
    }

    fn pending_key(queue: &str) -> String {
        format!("q:{}:pending", queue)
    }

    fn task_key(queue: &str, id: Uuid) -> String {
        format!("q:{}:task:{}", queue, id)
    }

    fn delayed_key(queue: &str) -> String {
        format!("q:{}:delayed", queue)
    }

    fn processing_key(queue: &str) -> String {
        format!("q:{}:processing", queue)
    }

    fn dead_key(queue: &str) -> String {
        format!("q:{}:dead", queue)
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Move due delayed tasks and expired in-flight tasks back to pending.
    async fn promote(&self, queue: &str) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let now = Self::now_ms();

        for source in [Self::delayed_key(queue), Self::processing_key(queue)] {
            let due: Vec<String> = conn
                .zrangebyscore_limit(&source, i64::MIN, now, 0, 100)
                .await
                .map_err(backend_err)?;
            for id in due {
                let removed: i64 = conn.zrem(&source, &id).await.map_err(backend_err)?;
                if removed > 0 {
                    conn.lpush::<_, _, ()>(Self::pending_key(queue), &id)
                        .await
                        .map_err(backend_err)?;
                }
            }
        }
        Ok(())
    }
}

fn backend_err(e: redis::RedisError) -> QueueError {
    QueueError::Backend(e.to_string())
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn submit(&self, queue: &str, payload: &[u8]) -> Result<Uuid, QueueError> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(QueueError::PayloadTooLarge(payload.len()));
        }

        let record = TaskRecord {
            id: Uuid::new_v4(),
            queue: queue.to_string(),
            payload: payload.to_vec(),
            attempt: 0,
        };
        let encoded =
            serde_json::to_string(&record).map_err(|e| QueueError::Backend(e.to_string()))?;

        let mut conn = self.manager.clone();
        conn.set::<_, _, ()>(Self::task_key(queue, record.id), encoded)
            .await
            .map_err(backend_err)?;
        conn.lpush::<_, _, ()>(Self::pending_key(queue), record.id.to_string())
            .await
            .map_err(backend_err)?;
        Ok(record.id)
    }

    async fn reserve(&self, queue: &str) -> Result<Option<Task>, QueueError> {
        self.promote(queue).await?;

        let mut conn = self.manager.clone();
        let id: Option<String> = conn
            .rpop(Self::pending_key(queue), None)
            .await
            .map_err(backend_err)?;
        let Some(id) = id else {
            return Ok(None);
        };

        let record: Option<String> = conn
            .get(format!("q:{}:task:{}", queue, id))
            .await
            .map_err(backend_err)?;
        let Some(record) = record else {
            warn!(queue = queue, task = %id, "task record missing, skipping");
            return Ok(None);
        };
        let record: TaskRecord =
            serde_json::from_str(&record).map_err(|e| QueueError::Backend(e.to_string()))?;

        let deadline = Self::now_ms() + self.visibility_timeout_ms;
        conn.zadd::<_, _, _, ()>(Self::processing_key(queue), &id, deadline)
            .await
            .map_err(backend_err)?;

        Ok(Some(Task {
            id: record.id,
            queue: record.queue,
            payload: record.payload,
            attempt: record.attempt,
        }))
    }

    async fn ack(&self, task: &Task) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        conn.zrem::<_, _, ()>(Self::processing_key(&task.queue), task.id.to_string())
            .await
            .map_err(backend_err)?;
        conn.del::<_, ()>(Self::task_key(&task.queue, task.id))
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn nack(&self, task: &Task, requeue: bool) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let id = task.id.to_string();
        conn.zrem::<_, _, ()>(Self::processing_key(&task.queue), &id)
            .await
            .map_err(backend_err)?;

        let next_attempt = task.attempt + 1;
        let record = TaskRecord {
            id: task.id,
            queue: task.queue.clone(),
            payload: task.payload.clone(),
            attempt: next_attempt,
        };
        let encoded =
            serde_json::to_string(&record).map_err(|e| QueueError::Backend(e.to_string()))?;
        conn.set::<_, _, ()>(Self::task_key(&task.queue, task.id), encoded)
            .await
            .map_err(backend_err)?;

        if requeue && next_attempt <= self.max_retries {
            let retry_at = Self::now_ms() + backoff::with_jitter(task.attempt).as_millis() as i64;
            conn.zadd::<_, _, _, ()>(Self::delayed_key(&task.queue), &id, retry_at)
                .await
                .map_err(backend_err)?;
        } else {
            conn.lpush::<_, _, ()>(Self::dead_key(&task.queue), &id)
                .await
                .map_err(backend_err)?;
        }
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<usize, QueueError> {
        let mut conn = self.manager.clone();
        let len: i64 = conn
            .llen(Self::pending_key(queue))
            .await
            .map_err(backend_err)?;
        Ok(len.max(0) as usize)
    }
}
