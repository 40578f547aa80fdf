//! Buffered time-series writer (C3).
//!
//! Samples are buffered and flushed when the batch size is reached or the
//! flush interval elapses, whichever comes first. Failed batches retry
//! with exponential backoff; batches that exhaust their retries spill to
//! a bounded on-disk spool that a background drainer re-submits. When the
//! spool is full the oldest unflushed batch is shed with a warning so new
//! samples keep landing.

use std::path::PathBuf;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{encode_sample, Sample, TimeSeriesBackend, TsdbError};
use crate::backoff;
use crate::config::TimeSeriesConfig;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub batch_size: usize,
    pub flush_interval: std::time::Duration,
    pub max_retries: u32,
    pub overflow_path: PathBuf,
    pub overflow_max_batches: usize,
}

impl From<&TimeSeriesConfig> for WriterConfig {
    fn from(config: &TimeSeriesConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            flush_interval: std::time::Duration::from_millis(config.flush_interval_ms),
            max_retries: config.max_retries,
            overflow_path: PathBuf::from(&config.overflow_path),
            overflow_max_batches: config.overflow_max_batches,
        }
    }
}

/// On-disk spool of line-protocol batches, one JSON-encoded batch per
/// line. All operations are best-effort; a broken spool costs samples,
/// never the service.
struct OverflowSpool {
    path: PathBuf,
    max_batches: usize,
}

impl OverflowSpool {
    fn new(path: PathBuf, max_batches: usize) -> Self {
        Self { path, max_batches }
    }

    async fn read_lines(&self) -> Vec<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn write_lines(&self, lines: &[String]) {
        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        if let Err(e) = tokio::fs::write(&self.path, content).await {
            warn!(path = %self.path.display(), error = %e, "overflow spool write failed");
        }
    }

    /// Append a batch, shedding the oldest entries beyond the bound.
    async fn append(&self, batch: &str) {
        let mut lines = self.read_lines().await;
        match serde_json::to_string(batch) {
            Ok(encoded) => lines.push(encoded),
            Err(e) => {
                warn!(error = %e, "failed to encode overflow batch");
                return;
            }
        }
        while lines.len() > self.max_batches {
            lines.remove(0);
            counter!("tsdb_batches_shed_total").increment(1);
            warn!("overflow spool full, shedding oldest unflushed batch");
        }
        self.write_lines(&lines).await;
    }

    async fn peek(&self) -> Option<String> {
        let lines = self.read_lines().await;
        let first = lines.first()?;
        serde_json::from_str::<String>(first).ok()
    }

    async fn pop(&self) {
        let mut lines = self.read_lines().await;
        if !lines.is_empty() {
            lines.remove(0);
            self.write_lines(&lines).await;
        }
    }
}

/// Buffering writer task. `spawn` returns the sample sender (bounded, so
/// the pipeline backpressures naturally) and the task handle to await on
/// shutdown.
pub struct TimeSeriesWriter {
    backend: Arc<dyn TimeSeriesBackend>,
    config: WriterConfig,
    spool: OverflowSpool,
    buffer: Vec<Sample>,
}

impl TimeSeriesWriter {
    pub fn spawn(
        backend: Arc<dyn TimeSeriesBackend>,
        config: WriterConfig,
        shutdown: Shutdown,
    ) -> (mpsc::Sender<Sample>, JoinHandle<()>) {
        let capacity = config.batch_size.max(1) * 2;
        let (tx, rx) = mpsc::channel(capacity);

        let spool = OverflowSpool::new(
            config.overflow_path.clone(),
            config.overflow_max_batches.max(1),
        );
        let writer = Self {
            backend,
            config,
            spool,
            buffer: Vec::new(),
        };
        let handle = tokio::spawn(writer.run(rx, shutdown));
        (tx, handle)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Sample>, shutdown: Shutdown) {
        let mut interval = tokio::time::interval(self.config.flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(sample) => {
                        self.buffer.push(sample);
                        if self.buffer.len() >= self.config.batch_size {
                            self.flush().await;
                        }
                    }
                    None => break,
                },
                _ = interval.tick() => {
                    self.flush().await;
                    self.drain_overflow_once().await;
                }
                _ = shutdown.triggered() => break,
            }
        }

        // Drain whatever the pipeline managed to enqueue, then flush.
        while let Ok(sample) = rx.try_recv() {
            self.buffer.push(sample);
        }
        self.flush().await;
        info!("time-series writer stopped");
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let count = self.buffer.len();
        let lines = self
            .buffer
            .drain(..)
            .map(|sample| encode_sample(&sample))
            .collect::<Vec<_>>()
            .join("\n");

        self.write_with_retry(&lines, count).await;
    }

    async fn write_with_retry(&self, lines: &str, sample_count: usize) {
        let mut attempt = 0u32;
        loop {
            match self.backend.write_lines(lines).await {
                Ok(()) => {
                    counter!("tsdb_samples_written_total").increment(sample_count as u64);
                    debug!(samples = sample_count, "time-series batch written");
                    return;
                }
                Err(TsdbError::Rejected(reason)) => {
                    counter!("tsdb_batches_rejected_total").increment(1);
                    error!(samples = sample_count, reason = %reason, "batch rejected by store");
                    return;
                }
                Err(TsdbError::Transient(reason)) if attempt < self.config.max_retries => {
                    let delay = backoff::with_jitter(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "time-series flush failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(TsdbError::Transient(reason)) => {
                    counter!("tsdb_batches_spooled_total").increment(1);
                    warn!(
                        samples = sample_count,
                        reason = %reason,
                        "retries exhausted, spooling batch to disk"
                    );
                    self.spool.append(lines).await;
                    return;
                }
            }
        }
    }

    /// Retry one spooled batch per tick. A transient failure leaves the
    /// spool untouched for the next tick.
    async fn drain_overflow_once(&self) {
        let Some(batch) = self.spool.peek().await else {
            return;
        };
        match self.backend.write_lines(&batch).await {
            Ok(()) => {
                counter!("tsdb_batches_drained_total").increment(1);
                self.spool.pop().await;
            }
            Err(TsdbError::Rejected(reason)) => {
                error!(reason = %reason, "spooled batch rejected by store, dropping");
                self.spool.pop().await;
            }
            Err(TsdbError::Transient(_)) => {}
        }
    }
}
