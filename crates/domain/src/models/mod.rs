//! Domain model definitions.

mod alert;
mod dashboard;
mod device;
mod factory;
mod parameter;
mod rule;
mod telemetry;

pub use alert::{Alert, NewAlert, RuleCooldown};
pub use dashboard::{FactorySummary, LiveKpi};
pub use device::{Device, MAX_DEVICE_KEY_LEN};
pub use factory::{Factory, MAX_SLUG_LEN};
pub use parameter::{display_name_from_key, DataType, DeviceParameter};
pub use rule::{
    CompareOp, ConditionNode, CreateRuleRequest, LogicalOp, NotificationChannels, Rule, RuleScope,
    ScheduleConfig, ScheduleType, Severity, MAX_CONDITION_DEPTH,
};
pub use telemetry::{MetricValue, Metrics};
