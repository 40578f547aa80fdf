//! Service configuration.
//!
//! Everything is settable through `FACTORYOPS__`-prefixed environment
//! variables (e.g. `FACTORYOPS__MQTT__HOST`), with an optional local
//! config file for development.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub timeseries: TimeSeriesConfig,
    pub queue: QueueConfig,
    pub ingest: IngestConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Deadline applied to individual relational operations.
    #[serde(default = "default_store_deadline")]
    pub op_deadline_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_url")]
    pub url: String,

    #[serde(default = "default_cache_deadline")]
    pub op_deadline_secs: u64,

    #[serde(default = "default_identity_ttl")]
    pub identity_ttl_secs: u64,

    #[serde(default = "default_params_ttl")]
    pub params_ttl_secs: u64,

    #[serde(default = "default_negative_ttl")]
    pub negative_ttl_secs: u64,

    #[serde(default = "default_rules_ttl")]
    pub rules_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeSeriesConfig {
    #[serde(default = "default_influx_url")]
    pub url: String,

    #[serde(default)]
    pub token: String,

    #[serde(default = "default_influx_org")]
    pub org: String,

    #[serde(default = "default_influx_bucket")]
    pub bucket: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    #[serde(default = "default_flush_deadline")]
    pub flush_deadline_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Where batches that exhausted their retries are spooled.
    #[serde(default = "default_overflow_path")]
    pub overflow_path: String,

    /// Overflow spool size bound, in batches. Beyond it the oldest
    /// unflushed samples are shed with a warning.
    #[serde(default = "default_overflow_max_batches")]
    pub overflow_max_batches: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_url")]
    pub url: String,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Pending-depth bound used for submit backpressure.
    #[serde(default = "default_queue_depth")]
    pub max_depth: usize,

    /// How long a submit may block when the queue is saturated before the
    /// task is dropped.
    #[serde(default = "default_submit_wait_ms")]
    pub submit_wait_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Coordinator worker count; 0 means CPU cores x 2.
    #[serde(default)]
    pub workers: usize,

    /// Register unknown devices on first valid telemetry. When disabled,
    /// messages for unknown devices are dropped instead.
    #[serde(default = "default_auto_create_devices")]
    pub auto_create_devices: bool,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_message_retries")]
    pub message_retries: u32,

    #[serde(default = "default_last_seen_debounce")]
    pub last_seen_debounce_secs: u64,

    #[serde(default = "default_dead_letter_path")]
    pub dead_letter_path: String,

    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "factoryops-core".to_string()
}
fn default_keep_alive() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    2
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_store_deadline() -> u64 {
    5
}
fn default_cache_url() -> String {
    "redis://localhost:6379/0".to_string()
}
fn default_cache_deadline() -> u64 {
    2
}
fn default_identity_ttl() -> u64 {
    3600
}
fn default_params_ttl() -> u64 {
    600
}
fn default_negative_ttl() -> u64 {
    30
}
fn default_rules_ttl() -> u64 {
    30
}
fn default_influx_url() -> String {
    "http://localhost:8086".to_string()
}
fn default_influx_org() -> String {
    "factoryops".to_string()
}
fn default_influx_bucket() -> String {
    "factoryops".to_string()
}
fn default_batch_size() -> usize {
    500
}
fn default_flush_interval_ms() -> u64 {
    1000
}
fn default_flush_deadline() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    5
}
fn default_overflow_path() -> String {
    "data/tsdb-overflow.jsonl".to_string()
}
fn default_overflow_max_batches() -> usize {
    256
}
fn default_queue_url() -> String {
    "redis://localhost:6379/1".to_string()
}
fn default_visibility_timeout() -> u64 {
    60
}
fn default_queue_depth() -> usize {
    10_000
}
fn default_submit_wait_ms() -> u64 {
    2000
}
fn default_auto_create_devices() -> bool {
    true
}
fn default_channel_capacity() -> usize {
    256
}
fn default_message_retries() -> u32 {
    5
}
fn default_last_seen_debounce() -> u64 {
    5
}
fn default_dead_letter_path() -> String {
    "data/ingest-dead-letter.jsonl".to_string()
}
fn default_shutdown_grace() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("FACTORYOPS").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Effective coordinator worker count.
    pub fn worker_count(&self) -> usize {
        if self.ingest.workers > 0 {
            self.ingest.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get() * 2)
                .unwrap_or(4)
        }
    }
}

impl From<&DatabaseConfig> for persistence::db::DatabaseConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            acquire_timeout_secs: config.connect_timeout_secs,
            idle_timeout_secs: config.idle_timeout_secs,
            // The server-side statement timeout tracks the per-operation
            // deadline so stuck queries die on both ends.
            statement_timeout_ms: config.op_deadline_secs * 1000,
        }
    }
}
