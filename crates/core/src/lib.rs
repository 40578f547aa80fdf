//! FactoryOps core: the hot telemetry and alerting path.
//!
//! Subscribes to broker topics, validates and resolves telemetry,
//! auto-registers devices and parameters, writes samples to the
//! time-series store, and evaluates alert rules behind a durable work
//! queue. The REST surface, UI, analytics and notification transports are
//! separate services; this crate talks to their shared stores through
//! narrow interfaces.

pub mod backoff;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod ingest;
pub mod kpi;
pub mod logging;
pub mod queue;
pub mod shutdown;
pub mod store;
pub mod tsdb;
pub mod workers;
