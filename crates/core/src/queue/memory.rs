//! In-memory WorkQueue implementation.
//!
//! Backs tests and single-process development. Semantics mirror the
//! Redis implementation: FIFO per queue, backoff on retry, dead-letter
//! after the cap, visibility timeout for lost in-flight tasks. State dies
//! with the process, so production uses the durable backend.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{QueueError, Task, WorkQueue, MAX_PAYLOAD_BYTES};
use crate::backoff;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Task>,
    delayed: Vec<(Instant, Task)>,
    in_flight: HashMap<Uuid, (Instant, Task)>,
    dead: Vec<Task>,
}

pub struct InMemoryQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    max_retries: u32,
    visibility_timeout: Duration,
}

impl InMemoryQueue {
    pub fn new(max_retries: u32) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            max_retries,
            visibility_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_visibility(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    /// Dead-lettered tasks of a queue (test observability).
    pub async fn dead_letters(&self, queue: &str) -> Vec<Task> {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|state| state.dead.clone())
            .unwrap_or_default()
    }

    fn promote_due(state: &mut QueueState, now: Instant) {
        let mut due: Vec<Task> = Vec::new();
        state.delayed.retain(|(at, task)| {
            if *at <= now {
                due.push(task.clone());
                false
            } else {
                true
            }
        });
        for task in due {
            state.pending.push_back(task);
        }

        let expired: Vec<Uuid> = state
            .in_flight
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some((_, task)) = state.in_flight.remove(&id) {
                state.pending.push_back(task);
            }
        }
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn submit(&self, queue: &str, payload: &[u8]) -> Result<Uuid, QueueError> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(QueueError::PayloadTooLarge(payload.len()));
        }
        let task = Task {
            id: Uuid::new_v4(),
            queue: queue.to_string(),
            payload: payload.to_vec(),
            attempt: 0,
        };
        let id = task.id;
        self.queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .pending
            .push_back(task);
        Ok(id)
    }

    async fn reserve(&self, queue: &str) -> Result<Option<Task>, QueueError> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        let now = Instant::now();
        Self::promote_due(state, now);

        match state.pending.pop_front() {
            Some(task) => {
                state
                    .in_flight
                    .insert(task.id, (now + self.visibility_timeout, task.clone()));
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, task: &Task) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        if let Some(state) = queues.get_mut(&task.queue) {
            state.in_flight.remove(&task.id);
        }
        Ok(())
    }

    async fn nack(&self, task: &Task, requeue: bool) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(task.queue.clone()).or_default();
        state.in_flight.remove(&task.id);

        let mut retried = task.clone();
        retried.attempt += 1;
        if requeue && retried.attempt <= self.max_retries {
            let delay = backoff::with_jitter(task.attempt);
            state.delayed.push((Instant::now() + delay, retried));
        } else {
            state.dead.push(retried);
        }
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<usize, QueueError> {
        Ok(self
            .queues
            .lock()
            .await
            .get(queue)
            .map(|state| state.pending.len())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = InMemoryQueue::new(5);
        queue.submit("q", b"first").await.unwrap();
        queue.submit("q", b"second").await.unwrap();

        let a = queue.reserve("q").await.unwrap().unwrap();
        let b = queue.reserve("q").await.unwrap().unwrap();
        assert_eq!(a.payload, b"first");
        assert_eq!(b.payload, b"second");
        assert!(queue.reserve("q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ack_removes_task() {
        let queue = InMemoryQueue::new(5);
        queue.submit("q", b"task").await.unwrap();
        let task = queue.reserve("q").await.unwrap().unwrap();
        queue.ack(&task).await.unwrap();

        assert_eq!(queue.depth("q").await.unwrap(), 0);
        assert!(queue.dead_letters("q").await.is_empty());
    }

    #[tokio::test]
    async fn test_nack_schedules_backoff_retry() {
        let queue = InMemoryQueue::new(5);
        queue.submit("q", b"task").await.unwrap();
        let task = queue.reserve("q").await.unwrap().unwrap();
        queue.nack(&task, true).await.unwrap();

        // Not yet visible: the retry sits behind a backoff delay.
        assert!(queue.reserve("q").await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(400)).await;
        let retried = queue.reserve("q").await.unwrap().unwrap();
        assert_eq!(retried.attempt, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_after_retry_cap() {
        let queue = InMemoryQueue::new(0);
        queue.submit("q", b"task").await.unwrap();
        let task = queue.reserve("q").await.unwrap().unwrap();
        queue.nack(&task, true).await.unwrap();

        assert_eq!(queue.dead_letters("q").await.len(), 1);
        assert!(queue.reserve("q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nack_without_requeue_dead_letters() {
        let queue = InMemoryQueue::new(5);
        queue.submit("q", b"task").await.unwrap();
        let task = queue.reserve("q").await.unwrap().unwrap();
        queue.nack(&task, false).await.unwrap();

        assert_eq!(queue.dead_letters("q").await.len(), 1);
    }

    #[tokio::test]
    async fn test_visibility_timeout_returns_task() {
        let queue = InMemoryQueue::new(5).with_visibility(Duration::from_millis(20));
        queue.submit("q", b"task").await.unwrap();
        let _lost = queue.reserve("q").await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let recovered = queue.reserve("q").await.unwrap();
        assert!(recovered.is_some());
    }

    #[tokio::test]
    async fn test_payload_bound() {
        let queue = InMemoryQueue::new(5);
        let oversized = vec![0u8; MAX_PAYLOAD_BYTES + 1];
        let result = queue.submit("q", &oversized).await;
        assert!(matches!(result, Err(QueueError::PayloadTooLarge(_))));
    }
}
