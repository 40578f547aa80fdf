//! MQTT subscriber and coordinator worker pool.
//!
//! One eventloop task consumes the broker; publishes are partitioned by
//! `hash(slug, device_key) mod N` onto bounded per-worker channels, so
//! work for one device is serialized while devices run in parallel. A
//! full channel blocks the consume loop, which is the backpressure path
//! back to the broker.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backoff;
use crate::config::{IngestConfig, MqttConfig};
use crate::error::IngestError;
use crate::ingest::{parse_topic, Pipeline, TOPIC_FILTER};
use crate::shutdown::Shutdown;

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

struct IncomingMessage {
    topic: String,
    payload: Vec<u8>,
}

/// Stable partition of a `(slug, device_key)` pair onto `workers` lanes.
pub fn partition_for(slug: &str, device_key: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    slug.hash(&mut hasher);
    device_key.hash(&mut hasher);
    (hasher.finish() % workers.max(1) as u64) as usize
}

/// Run the subscriber until shutdown: connect, subscribe, route messages
/// to the worker pool, reconnect with backoff on broker errors. On
/// shutdown, intake stops first and in-flight work drains within the
/// configured grace period.
pub async fn run_subscriber(
    mqtt: &MqttConfig,
    ingest: &IngestConfig,
    workers: usize,
    pipeline: Arc<Pipeline>,
    shutdown: Shutdown,
) {
    let mut senders: Vec<mpsc::Sender<IncomingMessage>> = Vec::with_capacity(workers);
    let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(workers);
    for index in 0..workers {
        let (tx, rx) = mpsc::channel(ingest.channel_capacity);
        senders.push(tx);
        handles.push(tokio::spawn(worker_loop(
            index,
            rx,
            pipeline.clone(),
            ingest.message_retries,
            PathBuf::from(&ingest.dead_letter_path),
        )));
    }

    let mut options = MqttOptions::new(&mqtt.client_id, &mqtt.host, mqtt.port);
    options.set_keep_alive(Duration::from_secs(mqtt.keep_alive_secs));
    if let (Some(username), Some(password)) = (&mqtt.username, &mqtt.password) {
        options.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(options, 256);
    let mut reconnect_delay = Duration::from_secs(1);

    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(host = %mqtt.host, port = mqtt.port, "broker connected");
                    reconnect_delay = Duration::from_secs(1);
                    if let Err(e) = client.subscribe(TOPIC_FILTER, QoS::AtLeastOnce).await {
                        error!(topic = TOPIC_FILTER, error = %e, "subscribe failed");
                    } else {
                        info!(topic = TOPIC_FILTER, "subscribed");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let partition = match parse_topic(&publish.topic) {
                        Ok(parts) => partition_for(&parts.slug, &parts.device_key, workers),
                        // Malformed topics still route deterministically so
                        // the worker logs and counts the drop.
                        Err(_) => {
                            let mut hasher = DefaultHasher::new();
                            publish.topic.hash(&mut hasher);
                            (hasher.finish() % workers.max(1) as u64) as usize
                        }
                    };
                    let message = IncomingMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    };
                    // Blocking here is the backpressure to the broker.
                    if senders[partition].send(message).await.is_err() {
                        warn!("worker pool gone, stopping intake");
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!(
                        error = %e,
                        retry_in_secs = reconnect_delay.as_secs(),
                        "broker connection error"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(reconnect_delay) => {}
                        _ = shutdown.triggered() => break,
                    }
                    reconnect_delay = (reconnect_delay * 2).min(MAX_RECONNECT_DELAY);
                }
            },
            _ = shutdown.triggered() => {
                info!("shutdown requested, stopping broker intake");
                break;
            }
        }
    }

    // Closing the channels lets each worker drain its backlog and exit.
    drop(senders);
    let grace = Duration::from_secs(ingest.shutdown_grace_secs);
    let drain = async {
        for handle in handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!(grace_secs = grace.as_secs(), "worker drain timed out");
    }
}

async fn worker_loop(
    index: usize,
    mut rx: mpsc::Receiver<IncomingMessage>,
    pipeline: Arc<Pipeline>,
    max_retries: u32,
    dead_letter_path: PathBuf,
) {
    while let Some(message) = rx.recv().await {
        handle_message(&pipeline, &message, max_retries, &dead_letter_path).await;
    }
    info!(worker = index, "coordinator worker stopped");
}

/// Apply the per-error recovery policy for one message: invalid input is
/// logged and dropped, transient store failures retry with backoff up to
/// the per-message cap, whatever remains goes to the local dead-letter
/// file.
async fn handle_message(
    pipeline: &Pipeline,
    message: &IncomingMessage,
    max_retries: u32,
    dead_letter_path: &Path,
) {
    let mut attempt = 0u32;
    loop {
        match pipeline.process(&message.topic, &message.payload).await {
            Ok(()) => return,
            Err(IngestError::Shutdown) => return,
            Err(e) if e.is_drop() => {
                match &e {
                    IngestError::InvalidTopic(reason) => {
                        counter!("telemetry_invalid_topic_total").increment(1);
                        info!(topic = %message.topic, reason = %reason, "dropping message");
                    }
                    IngestError::InvalidPayload(reason) => {
                        counter!("telemetry_invalid_payload_total").increment(1);
                        info!(topic = %message.topic, reason = %reason, "dropping message");
                    }
                    _ => {
                        counter!("telemetry_unknown_identity_total").increment(1);
                        warn!(topic = %message.topic, error = %e, "dropping message");
                    }
                }
                return;
            }
            Err(e) if e.is_transient() && attempt < max_retries => {
                let delay = backoff::with_jitter(attempt);
                warn!(
                    topic = %message.topic,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying message"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                counter!("ingest_dead_letter_total").increment(1);
                error!(topic = %message.topic, error = %e, "message exhausted retries, dead-lettering");
                dead_letter(dead_letter_path, message).await;
                return;
            }
        }
    }
}

async fn dead_letter(path: &Path, message: &IncomingMessage) {
    let record = serde_json::json!({
        "topic": message.topic,
        "payload": String::from_utf8_lossy(&message.payload),
        "failed_at": chrono::Utc::now().to_rfc3339(),
    });

    if let Some(parent) = path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    let result = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await;
    match result {
        Ok(mut file) => {
            let line = format!("{}\n", record);
            if let Err(e) = file.write_all(line.as_bytes()).await {
                error!(path = %path.display(), error = %e, "dead-letter write failed");
            }
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "dead-letter open failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_is_stable() {
        let a = partition_for("vpc", "M01", 8);
        let b = partition_for("vpc", "M01", 8);
        assert_eq!(a, b);
    }

    #[test]
    fn test_partition_in_range() {
        for device in 0..100 {
            let key = format!("M{:03}", device);
            assert!(partition_for("vpc", &key, 8) < 8);
        }
    }

    #[test]
    fn test_partition_distinguishes_factories() {
        // Same device key under different factories may land anywhere,
        // but the function must take the slug into account at all.
        let spread: std::collections::HashSet<usize> = (0..64)
            .map(|i| partition_for(&format!("factory-{}", i), "M01", 16))
            .collect();
        assert!(spread.len() > 1);
    }

    #[test]
    fn test_single_worker_degenerate() {
        assert_eq!(partition_for("vpc", "M01", 1), 0);
        assert_eq!(partition_for("vpc", "M01", 0), 0);
    }
}
