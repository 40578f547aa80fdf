//! Telemetry payload parsing and validation.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde_json::Value;

use crate::error::IngestError;
use domain::models::{MetricValue, Metrics};

/// How far into the future a message timestamp may point before it is
/// clamped to the ingestion time.
const MAX_FUTURE_SKEW_MINUTES: i64 = 5;

/// A validated telemetry message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPayload {
    pub metrics: Metrics,
    pub timestamp: DateTime<Utc>,
    /// Set when the message timestamp was in the future and got clamped.
    pub clamped: bool,
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // No timezone designator: assume UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse and validate a telemetry payload.
///
/// The payload must be a JSON object with a required non-empty `metrics`
/// object of finite numbers and an optional RFC 3339 `timestamp` (UTC
/// assumed if the zone is absent, server time if the field is absent).
/// Timestamps more than five minutes ahead of `now` are clamped and
/// flagged.
pub fn parse_payload(payload: &[u8], now: DateTime<Utc>) -> Result<ParsedPayload, IngestError> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| IngestError::InvalidPayload(format!("not valid JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| IngestError::InvalidPayload("payload must be a JSON object".into()))?;

    let metrics_value = object
        .get("metrics")
        .ok_or_else(|| IngestError::InvalidPayload("missing metrics".into()))?;
    let metrics_object = metrics_value
        .as_object()
        .ok_or_else(|| IngestError::InvalidPayload("metrics must be an object".into()))?;
    if metrics_object.is_empty() {
        return Err(IngestError::InvalidPayload("metrics is empty".into()));
    }

    let mut metrics = Metrics::new();
    for (key, value) in metrics_object {
        let metric = match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    MetricValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    MetricValue::Float(f)
                } else {
                    return Err(IngestError::InvalidPayload(format!(
                        "metric '{}' is out of numeric range",
                        key
                    )));
                }
            }
            other => {
                return Err(IngestError::InvalidPayload(format!(
                    "metric '{}' must be a number, got {}",
                    key,
                    type_name(other)
                )));
            }
        };
        if !metric.is_finite() {
            return Err(IngestError::InvalidPayload(format!(
                "metric '{}' is not finite",
                key
            )));
        }
        metrics.insert(key.clone(), metric);
    }

    let (timestamp, clamped) = match object.get("timestamp") {
        None | Some(Value::Null) => (now, false),
        Some(Value::String(raw)) => {
            let parsed = parse_timestamp(raw)
                .ok_or_else(|| IngestError::InvalidPayload(format!("bad timestamp: {}", raw)))?;
            if parsed - now > Duration::minutes(MAX_FUTURE_SKEW_MINUTES) {
                (now, true)
            } else {
                (parsed, false)
            }
        }
        Some(_) => {
            return Err(IngestError::InvalidPayload(
                "timestamp must be a string".into(),
            ));
        }
    };

    Ok(ParsedPayload {
        metrics,
        timestamp,
        clamped,
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 16, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_minimal_payload() {
        let parsed =
            parse_payload(br#"{"metrics":{"voltage":231.4,"current":3.2}}"#, now()).unwrap();
        assert_eq!(parsed.metrics.len(), 2);
        assert_eq!(parsed.timestamp, now());
        assert!(!parsed.clamped);
        assert_eq!(
            parsed.metrics["voltage"],
            MetricValue::Float(231.4)
        );
    }

    #[test]
    fn test_integer_metric_keeps_form() {
        let parsed = parse_payload(br#"{"metrics":{"cycles":12}}"#, now()).unwrap();
        assert_eq!(parsed.metrics["cycles"], MetricValue::Int(12));
    }

    #[test]
    fn test_explicit_timestamp_with_zone() {
        let parsed = parse_payload(
            br#"{"timestamp":"2026-03-16T10:30:00+05:30","metrics":{"v":1.0}}"#,
            now(),
        )
        .unwrap();
        assert_eq!(
            parsed.timestamp,
            Utc.with_ymd_and_hms(2026, 3, 16, 5, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_timestamp_without_zone_assumes_utc() {
        let parsed = parse_payload(
            br#"{"timestamp":"2026-03-16T10:30:00","metrics":{"v":1.0}}"#,
            now(),
        )
        .unwrap();
        assert_eq!(
            parsed.timestamp,
            Utc.with_ymd_and_hms(2026, 3, 16, 10, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_future_timestamp_clamped() {
        let parsed = parse_payload(
            br#"{"timestamp":"2026-03-16T12:06:01Z","metrics":{"v":1.0}}"#,
            now(),
        )
        .unwrap();
        assert!(parsed.clamped);
        assert_eq!(parsed.timestamp, now());
    }

    #[test]
    fn test_slightly_future_timestamp_kept() {
        let parsed = parse_payload(
            br#"{"timestamp":"2026-03-16T12:03:00Z","metrics":{"v":1.0}}"#,
            now(),
        )
        .unwrap();
        assert!(!parsed.clamped);
    }

    #[test]
    fn test_empty_metrics_rejected() {
        assert!(parse_payload(br#"{"metrics":{}}"#, now()).is_err());
    }

    #[test]
    fn test_missing_metrics_rejected() {
        assert!(parse_payload(br#"{"timestamp":"2026-03-16T12:00:00Z"}"#, now()).is_err());
    }

    #[test]
    fn test_non_numeric_metric_rejected() {
        assert!(parse_payload(br#"{"metrics":{"state":"on"}}"#, now()).is_err());
        assert!(parse_payload(br#"{"metrics":{"ok":true}}"#, now()).is_err());
        assert!(parse_payload(br#"{"metrics":{"v":null}}"#, now()).is_err());
        assert!(parse_payload(br#"{"metrics":{"v":[1,2]}}"#, now()).is_err());
    }

    #[test]
    fn test_batched_array_rejected() {
        assert!(parse_payload(br#"[{"metrics":{"v":1.0}}]"#, now()).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_payload(b"not json", now()).is_err());
        assert!(parse_payload(br#"{"metrics":{"v":1.0}, "timestamp": 42}"#, now()).is_err());
    }
}
