//! Device domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of a device key (unique within a factory).
pub const MAX_DEVICE_KEY_LEN: usize = 100;

/// A piece of equipment publishing telemetry under one `device_key`.
///
/// Devices are either registered by an operator or auto-created on the
/// first valid telemetry message for an unknown `(factory, device_key)`
/// pair. They are never deleted, only deactivated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub factory_id: i64,
    pub device_key: String,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub region: Option<String>,
    pub is_active: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_device() -> Device {
        Device {
            id: 5,
            factory_id: 1,
            device_key: "M01".to_string(),
            name: Some("CNC Mill 1".to_string()),
            manufacturer: None,
            model: None,
            region: None,
            is_active: true,
            last_seen: Some(Utc::now()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_device_struct() {
        let device = create_test_device();
        assert_eq!(device.device_key, "M01");
        assert_eq!(device.factory_id, 1);
        assert!(device.is_active);
    }

    #[test]
    fn test_device_optional_fields() {
        let mut device = create_test_device();
        device.name = None;
        device.last_seen = None;

        let json = serde_json::to_string(&device).unwrap();
        let back: Device = serde_json::from_str(&json).unwrap();
        assert!(back.name.is_none());
        assert!(back.last_seen.is_none());
    }
}
