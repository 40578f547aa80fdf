//! MQTT topic parsing.

use crate::error::IngestError;
use domain::models::{MAX_DEVICE_KEY_LEN, MAX_SLUG_LEN};

/// Subscription filter of the coordinator.
pub const TOPIC_FILTER: &str = "factories/+/devices/+/telemetry";

/// Identity carried by a telemetry topic. The factory binding always
/// derives from the resolved slug, never from the payload body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicParts {
    pub slug: String,
    pub device_key: String,
}

/// Parse `factories/{slug}/devices/{device_key}/telemetry`.
///
/// Exactly five segments, case-sensitive literals in positions 0, 2
/// and 4. Anything else is an `InvalidTopic`.
pub fn parse_topic(topic: &str) -> Result<TopicParts, IngestError> {
    let parts: Vec<&str> = topic.split('/').collect();

    if parts.len() != 5 {
        return Err(IngestError::InvalidTopic(format!(
            "expected 5 segments, got {}: {}",
            parts.len(),
            topic
        )));
    }
    if parts[0] != "factories" || parts[2] != "devices" || parts[4] != "telemetry" {
        return Err(IngestError::InvalidTopic(format!(
            "bad literal segments: {}",
            topic
        )));
    }

    let slug = parts[1];
    let device_key = parts[3];
    if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        return Err(IngestError::InvalidTopic(format!("bad slug: {}", topic)));
    }
    if device_key.is_empty() || device_key.len() > MAX_DEVICE_KEY_LEN {
        return Err(IngestError::InvalidTopic(format!(
            "bad device key: {}",
            topic
        )));
    }

    Ok(TopicParts {
        slug: slug.to_string(),
        device_key: device_key.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_topic() {
        let parts = parse_topic("factories/vpc/devices/M01/telemetry").unwrap();
        assert_eq!(parts.slug, "vpc");
        assert_eq!(parts.device_key, "M01");
    }

    #[test]
    fn test_wrong_segment_count() {
        assert!(parse_topic("factories/vpc/devices/M01").is_err());
        assert!(parse_topic("factories/vpc/devices/M01/telemetry/extra").is_err());
    }

    #[test]
    fn test_case_sensitive_literals() {
        assert!(parse_topic("factories/vpc/devices/M01/TELEMETRY").is_err());
        assert!(parse_topic("Factories/vpc/devices/M01/telemetry").is_err());
    }

    #[test]
    fn test_wrong_literals() {
        assert!(parse_topic("plants/vpc/devices/M01/telemetry").is_err());
        assert!(parse_topic("factories/vpc/machines/M01/telemetry").is_err());
    }

    #[test]
    fn test_empty_segments() {
        assert!(parse_topic("factories//devices/M01/telemetry").is_err());
        assert!(parse_topic("factories/vpc/devices//telemetry").is_err());
    }

    #[test]
    fn test_overlong_identifiers() {
        let long = "x".repeat(MAX_SLUG_LEN + 1);
        assert!(parse_topic(&format!("factories/{}/devices/M01/telemetry", long)).is_err());
        assert!(parse_topic(&format!("factories/vpc/devices/{}/telemetry", long)).is_err());
    }
}
