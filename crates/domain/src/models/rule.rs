//! Alert rule domain model and condition tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Maximum nesting depth of a condition tree. Bounds evaluation cost and
/// the size of the serialized JSON column.
pub const MAX_CONDITION_DEPTH: usize = 8;

/// Rule scope: evaluated against an explicit device list, or against every
/// device in the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    Device,
    Global,
}

impl RuleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleScope::Device => "device",
            RuleScope::Global => "global",
        }
    }
}

impl std::str::FromStr for RuleScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "device" => Ok(RuleScope::Device),
            "global" => Ok(RuleScope::Global),
            other => Err(format!("unknown rule scope: {}", other)),
        }
    }
}

/// When a rule is allowed to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Always,
    TimeWindow,
    DateRange,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Always => "always",
            ScheduleType::TimeWindow => "time_window",
            ScheduleType::DateRange => "date_range",
        }
    }
}

impl std::str::FromStr for ScheduleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(ScheduleType::Always),
            "time_window" => Ok(ScheduleType::TimeWindow),
            "date_range" => Ok(ScheduleType::DateRange),
            other => Err(format!("unknown schedule type: {}", other)),
        }
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison operator of a condition leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Neq,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Gt => "gt",
            CompareOp::Lt => "lt",
            CompareOp::Gte => "gte",
            CompareOp::Lte => "lte",
            CompareOp::Eq => "eq",
            CompareOp::Neq => "neq",
        }
    }
}

/// Logical operator of a condition group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

/// Recursive boolean expression over parameter comparators.
///
/// Serialized as nested JSON. A leaf carries `parameter`/`operator`/`value`,
/// a group carries `operator`/`conditions`; the untagged representation
/// matches the wire format produced by the rule API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    Group {
        operator: LogicalOp,
        conditions: Vec<ConditionNode>,
    },
    Leaf {
        parameter: String,
        operator: CompareOp,
        value: f64,
    },
}

impl ConditionNode {
    /// Nesting depth of the tree. A leaf has depth 1.
    pub fn depth(&self) -> usize {
        match self {
            ConditionNode::Leaf { .. } => 1,
            ConditionNode::Group { conditions, .. } => {
                1 + conditions.iter().map(|c| c.depth()).max().unwrap_or(0)
            }
        }
    }

    /// All leaves in document order.
    pub fn leaves(&self) -> Vec<&ConditionNode> {
        match self {
            leaf @ ConditionNode::Leaf { .. } => vec![leaf],
            ConditionNode::Group { conditions, .. } => {
                conditions.iter().flat_map(|c| c.leaves()).collect()
            }
        }
    }
}

/// Notification channel selection of a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationChannels {
    #[serde(default)]
    pub email: bool,
    #[serde(default)]
    pub whatsapp: bool,
}

impl NotificationChannels {
    pub fn is_empty(&self) -> bool {
        !self.email && !self.whatsapp
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.email {
            names.push("email");
        }
        if self.whatsapp {
            names.push("whatsapp");
        }
        names
    }
}

/// Schedule configuration for time-gated rules.
///
/// Times are "HH:MM" strings, dates "YYYY-MM-DD", days ISO (1 = Monday,
/// 7 = Sunday). Which fields are required depends on the schedule type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

/// An alert rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub factory_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub scope: RuleScope,
    pub conditions: ConditionNode,
    pub cooldown_minutes: i32,
    pub is_active: bool,
    pub schedule_type: ScheduleType,
    pub schedule_config: Option<ScheduleConfig>,
    pub severity: Severity,
    pub notification_channels: NotificationChannels,
    /// Devices the rule applies to; non-empty iff `scope == Device`.
    pub device_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request payload for rule creation, validated before persistence.
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_scope_devices", skip_on_field_errors = false))]
pub struct CreateRuleRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: String,

    pub description: Option<String>,

    #[serde(default = "default_scope")]
    pub scope: RuleScope,

    #[serde(default)]
    pub device_ids: Vec<i64>,

    #[validate(custom(function = "validate_condition_depth"))]
    pub conditions: ConditionNode,

    #[validate(range(min = 0, max = 1440, message = "Cooldown must be between 0 and 1440 minutes"))]
    #[serde(default = "default_cooldown")]
    pub cooldown_minutes: i32,

    #[serde(default = "default_severity")]
    pub severity: Severity,

    #[serde(default = "default_schedule_type")]
    pub schedule_type: ScheduleType,

    pub schedule_config: Option<ScheduleConfig>,

    #[serde(default)]
    pub notification_channels: NotificationChannels,
}

fn default_scope() -> RuleScope {
    RuleScope::Device
}

fn default_cooldown() -> i32 {
    15
}

fn default_severity() -> Severity {
    Severity::Medium
}

fn default_schedule_type() -> ScheduleType {
    ScheduleType::Always
}

fn validate_condition_depth(node: &ConditionNode) -> Result<(), validator::ValidationError> {
    if node.depth() > MAX_CONDITION_DEPTH {
        let mut err = validator::ValidationError::new("condition_depth");
        err.message = Some(
            format!("Condition tree exceeds maximum depth of {}", MAX_CONDITION_DEPTH).into(),
        );
        return Err(err);
    }
    Ok(())
}

fn validate_scope_devices(request: &CreateRuleRequest) -> Result<(), validator::ValidationError> {
    if request.scope == RuleScope::Device && request.device_ids.is_empty() {
        let mut err = validator::ValidationError::new("empty_device_scope");
        err.message = Some("Device-scoped rules must list at least one device".into());
        return Err(err);
    }
    Ok(())
}
