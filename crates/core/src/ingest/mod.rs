//! Ingestion coordinator (C4): broker subscription, parsing, and the
//! per-message pipeline.

mod last_seen;
mod payload;
mod pipeline;
mod subscriber;
mod topic;

pub use last_seen::{LastSeenFlusher, LastSeenTracker};
pub use payload::{parse_payload, ParsedPayload};
pub use pipeline::{Pipeline, PipelineConfig};
pub use subscriber::{run_subscriber, partition_for};
pub use topic::{parse_topic, TopicParts, TOPIC_FILTER};
