//! Notification task payload.
//!
//! The core only produces these; the notification transport (email,
//! WhatsApp) is a separate service consuming the `notifications` queue.
//! Delivery is at-least-once; deduplication belongs to the notifier.

use serde::{Deserialize, Serialize};

use domain::models::Severity;

/// Payload of one `notifications` queue task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTask {
    pub alert_id: i64,
    pub factory_id: i64,
    pub severity: Severity,
    /// Channel names selected by the triggering rule.
    pub channels: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_task_roundtrip() {
        let task = NotificationTask {
            alert_id: 42,
            factory_id: 1,
            severity: Severity::Critical,
            channels: vec!["email".to_string(), "whatsapp".to_string()],
        };
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"severity\":\"critical\""));

        let back: NotificationTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back.alert_id, 42);
        assert_eq!(back.channels.len(), 2);
    }
}
