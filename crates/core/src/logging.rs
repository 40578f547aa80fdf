//! Logging initialization.
//!
//! JSON output for deployments, pretty output for local runs. The
//! default filter keeps rumqttc keepalive traffic and sqlx statement
//! logs out of the telemetry-path stream; `RUST_LOG` overrides the whole
//! filter when set.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::config::LoggingConfig;

fn default_filter(level: &str) -> EnvFilter {
    // Broker pings and per-statement logs drown out the pipeline at
    // info level.
    EnvFilter::new(format!("{},rumqttc=warn,sqlx=warn", level))
}

/// Initializes the logging subsystem based on configuration.
pub fn init_logging(config: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            let json_layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true);
            subscriber.with(json_layer).init();
        }
        _ => {
            let pretty_layer = fmt::layer().pretty().with_target(true);
            subscriber.with(pretty_layer).init();
        }
    }
}
