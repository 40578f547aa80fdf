//! InfluxDB line-protocol encoding.
//!
//! One point per sample: measurement `telemetry`, tags `factory_id` and
//! `device_id`, one field per metric key, nanosecond timestamp.

use domain::models::MetricValue;

use super::Sample;

/// Escape a tag key, tag value or field key: commas, spaces and equals
/// signs are significant in line protocol.
fn escape_key(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            ',' | ' ' | '=' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

fn encode_field_value(value: &MetricValue) -> String {
    match value {
        MetricValue::Int(i) => format!("{}i", i),
        MetricValue::Float(f) => format!("{}", f),
    }
}

/// Encode one sample as a line-protocol point.
pub fn encode_sample(sample: &Sample) -> String {
    let fields = sample
        .fields
        .iter()
        .map(|(key, value)| format!("{}={}", escape_key(key), encode_field_value(value)))
        .collect::<Vec<_>>()
        .join(",");

    let timestamp_ns = sample
        .timestamp
        .timestamp_nanos_opt()
        .unwrap_or_else(|| sample.timestamp.timestamp_millis().saturating_mul(1_000_000));

    format!(
        "telemetry,factory_id={},device_id={} {} {}",
        sample.factory_id, sample.device_id, fields, timestamp_ns
    )
}
