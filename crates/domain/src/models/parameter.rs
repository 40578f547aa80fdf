//! Device parameter domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Data type of a discovered metric channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float,
    Int,
    String,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Float => "float",
            DataType::Int => "int",
            DataType::String => "string",
        }
    }
}

impl std::str::FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float" => Ok(DataType::Float),
            "int" => Ok(DataType::Int),
            "string" => Ok(DataType::String),
            other => Err(format!("unknown data type: {}", other)),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One metric channel on one device, created on first appearance of its
/// key in a telemetry message. Unique per `(device_id, parameter_key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceParameter {
    pub id: i64,
    pub factory_id: i64,
    pub device_id: i64,
    pub parameter_key: String,
    pub display_name: Option<String>,
    pub unit: Option<String>,
    pub data_type: DataType,
    pub is_kpi_selected: bool,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Default display name for a discovered key: underscores become spaces,
/// each word title-cased ("voltage_l1" -> "Voltage L1").
pub fn display_name_from_key(key: &str) -> String {
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
