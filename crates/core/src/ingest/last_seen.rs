//! Debounced `last_seen` writer.
//!
//! Hot devices would otherwise update the same row on every message.
//! Observations are coalesced per device (keeping the maximum timestamp)
//! and flushed on a short debounce interval; the shared cache mirrors the
//! value under `last_seen:{device_id}` for hot reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{keys, SharedCache};
use crate::shutdown::Shutdown;
use crate::store::MetadataStore;

/// TTL of the cache mirror; generous relative to the debounce so readers
/// rarely miss.
const MIRROR_TTL: Duration = Duration::from_secs(120);

/// Shared map of pending observations, keyed `(factory_id, device_id)`.
#[derive(Clone, Default)]
pub struct LastSeenTracker {
    pending: Arc<Mutex<HashMap<(i64, i64), DateTime<Utc>>>>,
}

impl LastSeenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation; per device only the maximum survives, so
    /// `last_seen` stays monotonically non-decreasing.
    pub async fn record(&self, factory_id: i64, device_id: i64, seen_at: DateTime<Utc>) {
        let mut pending = self.pending.lock().await;
        pending
            .entry((factory_id, device_id))
            .and_modify(|current| {
                if seen_at > *current {
                    *current = seen_at;
                }
            })
            .or_insert(seen_at);
    }

    async fn take(&self) -> HashMap<(i64, i64), DateTime<Utc>> {
        std::mem::take(&mut *self.pending.lock().await)
    }
}

/// Background task draining the tracker on the debounce interval.
pub struct LastSeenFlusher {
    tracker: LastSeenTracker,
    store: Arc<dyn MetadataStore>,
    shared: Arc<dyn SharedCache>,
    debounce: Duration,
}

impl LastSeenFlusher {
    pub fn new(
        tracker: LastSeenTracker,
        store: Arc<dyn MetadataStore>,
        shared: Arc<dyn SharedCache>,
        debounce: Duration,
    ) -> Self {
        Self {
            tracker,
            store,
            shared,
            debounce,
        }
    }

    pub fn spawn(self, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.debounce);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => self.flush().await,
                    _ = shutdown.triggered() => break,
                }
            }

            // Final flush so a clean shutdown loses nothing.
            self.flush().await;
            info!("last-seen flusher stopped");
        })
    }

    async fn flush(&self) {
        let pending = self.tracker.take().await;
        if pending.is_empty() {
            return;
        }
        debug!(devices = pending.len(), "flushing last-seen updates");

        for ((factory_id, device_id), seen_at) in pending {
            // Best-effort: a failed update only delays visibility; the
            // next message refreshes it.
            if let Err(e) = self
                .store
                .update_last_seen(factory_id, device_id, seen_at)
                .await
            {
                warn!(
                    factory_id = factory_id,
                    device_id = device_id,
                    error = %e,
                    "last-seen update failed"
                );
                continue;
            }
            if let Err(e) = self
                .shared
                .set_ex(&keys::last_seen(device_id), &seen_at.to_rfc3339(), MIRROR_TTL)
                .await
            {
                debug!(device_id = device_id, error = %e, "last-seen mirror update failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_record_keeps_maximum() {
        let tracker = LastSeenTracker::new();
        let now = Utc::now();

        tracker.record(1, 5, now).await;
        tracker.record(1, 5, now - ChronoDuration::seconds(30)).await;

        let pending = tracker.take().await;
        assert_eq!(pending[&(1, 5)], now);
    }

    #[tokio::test]
    async fn test_take_drains() {
        let tracker = LastSeenTracker::new();
        tracker.record(1, 5, Utc::now()).await;

        assert_eq!(tracker.take().await.len(), 1);
        assert!(tracker.take().await.is_empty());
    }

    #[tokio::test]
    async fn test_coalesces_across_devices() {
        let tracker = LastSeenTracker::new();
        let now = Utc::now();
        for _ in 0..10 {
            tracker.record(1, 5, now).await;
            tracker.record(1, 6, now).await;
        }

        let pending = tracker.take().await;
        assert_eq!(pending.len(), 2);
    }
}
