//! Telemetry value types.
//!
//! Telemetry payloads are open-schema: a message carries an arbitrary set
//! of metric keys, each mapped to a numeric value. The open-schema reach
//! stays confined to the ingestion edge and the time-series store;
//! relational metadata is closed-schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::parameter::DataType;

/// A single metric value as it appeared in the JSON payload.
///
/// The integer/float distinction is preserved because it drives the
/// `data_type` of auto-discovered parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

/// Metric map of one telemetry message. Ordered so that derived artifacts
/// (line protocol, alert messages) are deterministic.
pub type Metrics = BTreeMap<String, MetricValue>;

impl MetricValue {
    /// Numeric value as f64, for comparisons and time-series fields.
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Int(i) => *i as f64,
            MetricValue::Float(f) => *f,
        }
    }

    /// Parameter data type inferred from the JSON number form.
    pub fn data_type(&self) -> DataType {
        match self {
            MetricValue::Int(_) => DataType::Int,
            MetricValue::Float(_) => DataType::Float,
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            MetricValue::Int(_) => true,
            MetricValue::Float(f) => f.is_finite(),
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Int(i) => write!(f, "{}", i),
            MetricValue::Float(v) => write!(f, "{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_form_deserializes_as_int() {
        let value: MetricValue = serde_json::from_str("3").unwrap();
        assert_eq!(value, MetricValue::Int(3));
        assert_eq!(value.data_type(), DataType::Int);
    }

    #[test]
    fn test_fractional_form_deserializes_as_float() {
        let value: MetricValue = serde_json::from_str("231.4").unwrap();
        assert_eq!(value, MetricValue::Float(231.4));
        assert_eq!(value.data_type(), DataType::Float);
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(MetricValue::Int(3).as_f64(), 3.0);
        assert_eq!(MetricValue::Float(3.2).as_f64(), 3.2);
    }

    #[test]
    fn test_display() {
        assert_eq!(MetricValue::Int(42).to_string(), "42");
        assert_eq!(MetricValue::Float(82.5).to_string(), "82.5");
    }

    #[test]
    fn test_non_numeric_rejected() {
        assert!(serde_json::from_str::<MetricValue>("\"hot\"").is_err());
        assert!(serde_json::from_str::<MetricValue>("true").is_err());
        assert!(serde_json::from_str::<MetricValue>("null").is_err());
    }
}
