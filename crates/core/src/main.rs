use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use factoryops_core::cache::{
    IdentityCache, Invalidation, RedisCache, SharedCache, INVALIDATION_CHANNEL,
};
use factoryops_core::config::Config;
use factoryops_core::discovery::ParameterDiscovery;
use factoryops_core::ingest::{run_subscriber, LastSeenFlusher, LastSeenTracker, Pipeline, PipelineConfig};
use factoryops_core::logging;
use factoryops_core::queue::{RedisQueue, WorkQueue};
use factoryops_core::shutdown::Shutdown;
use factoryops_core::store::{AlertStore, MetadataStore, PgAlertStore, PgMetadataStore};
use factoryops_core::tsdb::{InfluxBackend, TimeSeriesBackend, TimeSeriesWriter};
use factoryops_core::workers::AlertingWorker;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load()?;
    logging::init_logging(&config.logging);

    info!("Starting FactoryOps core v{}", env!("CARGO_PKG_VERSION"));

    // Relational store
    let pool = persistence::db::create_pool(&(&config.database).into()).await?;
    info!("Running database migrations...");
    sqlx::migrate!("../persistence/src/migrations").run(&pool).await?;
    info!("Migrations completed");

    let shutdown = Shutdown::new();

    let store_deadline = Duration::from_secs(config.database.op_deadline_secs);
    let metadata: Arc<dyn MetadataStore> =
        Arc::new(PgMetadataStore::new(pool.clone(), store_deadline));
    let alert_store: Arc<dyn AlertStore> = Arc::new(PgAlertStore::new(pool.clone(), store_deadline));

    // Shared cache
    let shared: Arc<dyn SharedCache> = Arc::new(
        RedisCache::connect(
            &config.cache.url,
            Duration::from_secs(config.cache.op_deadline_secs),
        )
        .await?,
    );

    let mut identity_config: factoryops_core::cache::IdentityCacheConfig =
        (&config.cache).into();
    identity_config.auto_create_devices = config.ingest.auto_create_devices;
    let identity = Arc::new(IdentityCache::new(
        metadata.clone(),
        shared.clone(),
        identity_config,
    ));
    let discovery = ParameterDiscovery::new(identity.clone(), metadata.clone());

    // Time-series writer
    let backend: Arc<dyn TimeSeriesBackend> = Arc::new(InfluxBackend::new(&config.timeseries)?);
    let (samples, writer_handle) =
        TimeSeriesWriter::spawn(backend, (&config.timeseries).into(), shutdown.clone());

    // Work queues
    let queue: Arc<dyn WorkQueue> = Arc::new(
        RedisQueue::connect(
            &config.queue.url,
            config.queue.max_retries,
            config.queue.visibility_timeout_secs,
        )
        .await?,
    );

    // Last-seen coalescing
    let last_seen = LastSeenTracker::new();
    let flusher_handle = LastSeenFlusher::new(
        last_seen.clone(),
        metadata.clone(),
        shared.clone(),
        Duration::from_secs(config.ingest.last_seen_debounce_secs),
    )
    .spawn(shutdown.clone());

    // Alerting worker
    let worker = AlertingWorker::new(
        queue.clone(),
        alert_store,
        shared.clone(),
        Duration::from_secs(config.cache.rules_ttl_secs),
    );
    let worker_handle = worker.spawn(shutdown.clone());

    // Invalidation listener: CRUD writes elsewhere reach our caches here.
    let invalidation_handle = {
        let shared = shared.clone();
        let identity = identity.clone();
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut rx = match shared.subscribe(INVALIDATION_CHANNEL).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(error = %e, "invalidation subscription failed, relying on TTLs");
                    return;
                }
            };
            loop {
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(message) => match Invalidation::parse(&message) {
                            Some(event) => {
                                identity.apply_invalidation(&event).await;
                                worker.apply_invalidation(&event).await;
                            }
                            None => debug!(message = %message, "unrecognized invalidation"),
                        },
                        None => break,
                    },
                    _ = shutdown.triggered() => break,
                }
            }
        })
    };

    // Coordinator
    let workers = config.worker_count();
    info!(workers = workers, "starting ingestion coordinator");
    let pipeline = Arc::new(Pipeline::new(
        identity,
        discovery,
        samples,
        last_seen,
        queue,
        PipelineConfig {
            queue_max_depth: config.queue.max_depth,
            queue_submit_wait: Duration::from_millis(config.queue.submit_wait_ms),
        },
    ));

    let mut subscriber_handle = {
        let mqtt = config.mqtt.clone();
        let ingest = config.ingest.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            run_subscriber(&mqtt, &ingest, workers, pipeline, shutdown).await;
        })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            shutdown.trigger();
            let _ = (&mut subscriber_handle).await;
        }
        result = &mut subscriber_handle => {
            warn!("subscriber exited, shutting down");
            let _ = result;
            shutdown.trigger();
        }
    }

    // Drain background tasks within the grace period; the writer flushes
    // its buffer on the way out.
    let grace = Duration::from_secs(config.ingest.shutdown_grace_secs);
    let drain = async {
        let _ = flusher_handle.await;
        let _ = worker_handle.await;
        let _ = writer_handle.await;
        invalidation_handle.abort();
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!(grace_secs = grace.as_secs(), "graceful drain timed out");
    }

    info!("FactoryOps core stopped");
    Ok(())
}
