//! Rule evaluation.
//!
//! `evaluate` is a pure function over `(rule, metrics, now, timezone)`:
//! same inputs, same outcome, no side effects. All I/O (loading rules,
//! cooldown checks, alert persistence) lives with the callers.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::models::{
    CompareOp, ConditionNode, LogicalOp, MetricValue, Metrics, Rule, ScheduleConfig, ScheduleType,
    MAX_CONDITION_DEPTH,
};

/// A malformed rule surfaced during evaluation. Callers log and skip the
/// rule; other rules keep evaluating.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("malformed schedule: {0}")]
    MalformedSchedule(String),

    #[error("condition tree depth {0} exceeds maximum {max}", max = MAX_CONDITION_DEPTH)]
    DepthExceeded(usize),
}

/// Three-valued result of a condition subtree.
///
/// A leaf whose parameter is absent from the message is `Undetermined`,
/// not false: it must neither fire a rule on its own nor suppress a
/// sibling that holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Undetermined,
}

/// Relative-epsilon float equality: `|a - b| <= 1e-9 * max(1, |a|, |b|)`.
fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

/// Apply a comparison operator to a metric value and threshold.
pub fn compare(value: f64, op: CompareOp, threshold: f64) -> bool {
    match op {
        CompareOp::Gt => value > threshold,
        CompareOp::Lt => value < threshold,
        CompareOp::Gte => value >= threshold,
        CompareOp::Lte => value <= threshold,
        CompareOp::Eq => approx_eq(value, threshold),
        CompareOp::Neq => !approx_eq(value, threshold),
    }
}

/// Evaluate a condition subtree against a metric map.
///
/// Groups eliminate undetermined children: AND over all-undetermined is
/// undetermined, any false child makes it false, otherwise it is the AND
/// of the defined children; OR symmetrically. Short-circuiting below never
/// changes the result relative to strict evaluation.
pub fn eval_node(node: &ConditionNode, metrics: &Metrics) -> Truth {
    match node {
        ConditionNode::Leaf {
            parameter,
            operator,
            value,
        } => match metrics.get(parameter) {
            Some(metric) => {
                if compare(metric.as_f64(), *operator, *value) {
                    Truth::True
                } else {
                    Truth::False
                }
            }
            None => Truth::Undetermined,
        },
        ConditionNode::Group {
            operator,
            conditions,
        } => {
            let mut any_determined = false;
            for child in conditions {
                match (operator, eval_node(child, metrics)) {
                    (LogicalOp::And, Truth::False) => return Truth::False,
                    (LogicalOp::Or, Truth::True) => return Truth::True,
                    (_, Truth::Undetermined) => {}
                    _ => any_determined = true,
                }
            }
            if !any_determined {
                // Covers the empty group as well.
                Truth::Undetermined
            } else {
                match operator {
                    LogicalOp::And => Truth::True,
                    LogicalOp::Or => Truth::False,
                }
            }
        }
    }
}

fn parse_time(value: &str) -> Result<NaiveTime, EvalError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| EvalError::MalformedSchedule(format!("invalid time: {}", value)))
}

fn parse_date(value: &str) -> Result<NaiveDate, EvalError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| EvalError::MalformedSchedule(format!("invalid date: {}", value)))
}

/// Schedule predicate, evaluated in the factory's timezone.
pub fn is_scheduled(
    schedule_type: ScheduleType,
    config: Option<&ScheduleConfig>,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<bool, EvalError> {
    match schedule_type {
        ScheduleType::Always => Ok(true),
        ScheduleType::TimeWindow => {
            let config =
                config.ok_or_else(|| EvalError::MalformedSchedule("missing config".into()))?;
            let days = config
                .days
                .as_deref()
                .ok_or_else(|| EvalError::MalformedSchedule("missing days".into()))?;
            let start = parse_time(
                config
                    .start_time
                    .as_deref()
                    .ok_or_else(|| EvalError::MalformedSchedule("missing start_time".into()))?,
            )?;
            let end = parse_time(
                config
                    .end_time
                    .as_deref()
                    .ok_or_else(|| EvalError::MalformedSchedule("missing end_time".into()))?,
            )?;

            let local = now.with_timezone(&tz);
            let weekday = local.weekday().number_from_monday() as u8;
            if !days.contains(&weekday) {
                return Ok(false);
            }

            let time_of_day = local.time();
            if end < start {
                // Window wraps past midnight.
                Ok(time_of_day >= start || time_of_day <= end)
            } else {
                Ok(time_of_day >= start && time_of_day <= end)
            }
        }
        ScheduleType::DateRange => {
            let config =
                config.ok_or_else(|| EvalError::MalformedSchedule("missing config".into()))?;
            let start = parse_date(
                config
                    .start_date
                    .as_deref()
                    .ok_or_else(|| EvalError::MalformedSchedule("missing start_date".into()))?,
            )?;
            let end = parse_date(
                config
                    .end_date
                    .as_deref()
                    .ok_or_else(|| EvalError::MalformedSchedule("missing end_date".into()))?,
            )?;

            let local_date = now.with_timezone(&tz).date_naive();
            Ok(local_date >= start && local_date <= end)
        }
    }
}

/// Decide whether a rule fires for the given metrics at `now`.
///
/// Returns false when the schedule gate is closed, or when the root of the
/// condition tree evaluates to false or undetermined.
pub fn evaluate(
    rule: &Rule,
    metrics: &Metrics,
    now: DateTime<Utc>,
    timezone: &str,
) -> Result<bool, EvalError> {
    let tz: Tz = timezone
        .parse()
        .map_err(|_| EvalError::UnknownTimezone(timezone.to_string()))?;

    let depth = rule.conditions.depth();
    if depth > MAX_CONDITION_DEPTH {
        return Err(EvalError::DepthExceeded(depth));
    }

    if !is_scheduled(rule.schedule_type, rule.schedule_config.as_ref(), now, tz)? {
        return Ok(false);
    }

    Ok(eval_node(&rule.conditions, metrics) == Truth::True)
}

fn format_threshold(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Deterministic alert message referencing the satisfied leaves, e.g.
/// `Rule 'Overheat' triggered: spindle_temp=82.5 (gt 80)`.
pub fn build_alert_message(rule: &Rule, metrics: &Metrics) -> String {
    let satisfied: Vec<String> = rule
        .conditions
        .leaves()
        .iter()
        .filter_map(|leaf| match leaf {
            ConditionNode::Leaf {
                parameter,
                operator,
                value,
            } => metrics.get(parameter).and_then(|metric: &MetricValue| {
                if compare(metric.as_f64(), *operator, *value) {
                    Some(format!(
                        "{}={} ({} {})",
                        parameter,
                        metric,
                        operator.as_str(),
                        format_threshold(*value)
                    ))
                } else {
                    None
                }
            }),
            ConditionNode::Group { .. } => None,
        })
        .collect();

    if satisfied.is_empty() {
        format!("Rule '{}' triggered", rule.name)
    } else {
        format!("Rule '{}' triggered: {}", rule.name, satisfied.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotificationChannels, RuleScope, Severity};
    use chrono::TimeZone;

    fn leaf(parameter: &str, operator: CompareOp, value: f64) -> ConditionNode {
        ConditionNode::Leaf {
            parameter: parameter.to_string(),
            operator,
            value,
        }
    }

    fn group(operator: LogicalOp, conditions: Vec<ConditionNode>) -> ConditionNode {
        ConditionNode::Group {
            operator,
            conditions,
        }
    }

    fn metrics(pairs: &[(&str, f64)]) -> Metrics {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), MetricValue::Float(*v)))
            .collect()
    }

    fn make_rule(conditions: ConditionNode) -> Rule {
        Rule {
            id: 1,
            factory_id: 1,
            name: "Test rule".to_string(),
            description: None,
            scope: RuleScope::Global,
            conditions,
            cooldown_minutes: 15,
            is_active: true,
            schedule_type: ScheduleType::Always,
            schedule_config: None,
            severity: Severity::Critical,
            notification_channels: NotificationChannels::default(),
            device_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    // Comparator tests

    #[test]
    fn test_compare_operators() {
        assert!(compare(231.5, CompareOp::Gt, 200.0));
        assert!(!compare(180.0, CompareOp::Gt, 200.0));
        assert!(compare(2.5, CompareOp::Lt, 5.0));
        assert!(compare(5.0, CompareOp::Gte, 5.0));
        assert!(compare(5.0, CompareOp::Lte, 5.0));
        assert!(compare(1.0, CompareOp::Eq, 1.0));
        assert!(compare(0.0, CompareOp::Neq, 1.0));
    }

    #[test]
    fn test_eq_tolerates_float_noise() {
        assert!(compare(0.1 + 0.2, CompareOp::Eq, 0.3));
        assert!(!compare(0.1 + 0.2, CompareOp::Neq, 0.3));
        assert!(compare(1e12 + 0.5, CompareOp::Eq, 1e12));
        assert!(compare(1.0, CompareOp::Neq, 1.001));
    }

    // Tri-state tree tests

    #[test]
    fn test_and_both_true() {
        let tree = group(
            LogicalOp::And,
            vec![
                leaf("voltage", CompareOp::Gt, 200.0),
                leaf("current", CompareOp::Gt, 3.0),
            ],
        );
        assert_eq!(
            eval_node(&tree, &metrics(&[("voltage", 240.0), ("current", 5.0)])),
            Truth::True
        );
    }

    #[test]
    fn test_and_one_false() {
        let tree = group(
            LogicalOp::And,
            vec![
                leaf("voltage", CompareOp::Gt, 200.0),
                leaf("current", CompareOp::Gt, 3.0),
            ],
        );
        assert_eq!(
            eval_node(&tree, &metrics(&[("voltage", 240.0), ("current", 2.0)])),
            Truth::False
        );
    }

    #[test]
    fn test_missing_parameter_is_undetermined() {
        let tree = leaf("voltage", CompareOp::Gt, 200.0);
        assert_eq!(eval_node(&tree, &metrics(&[("current", 5.0)])), Truth::Undetermined);
    }

    #[test]
    fn test_or_true_with_undetermined_sibling() {
        // OR over {true, undetermined} = true.
        let tree = group(
            LogicalOp::Or,
            vec![
                leaf("temp", CompareOp::Gt, 50.0),
                leaf("vibration", CompareOp::Gt, 5.0),
            ],
        );
        assert_eq!(eval_node(&tree, &metrics(&[("temp", 60.0)])), Truth::True);
    }

    #[test]
    fn test_or_false_with_undetermined_sibling() {
        // OR over {undetermined, false} = false.
        let tree = group(
            LogicalOp::Or,
            vec![
                leaf("temp", CompareOp::Gt, 50.0),
                leaf("vibration", CompareOp::Gt, 5.0),
            ],
        );
        assert_eq!(eval_node(&tree, &metrics(&[("vibration", 3.0)])), Truth::False);
    }

    #[test]
    fn test_and_with_undetermined_sibling_is_and_of_defined() {
        let tree = group(
            LogicalOp::And,
            vec![
                leaf("temp", CompareOp::Gt, 50.0),
                leaf("vibration", CompareOp::Gt, 5.0),
            ],
        );
        assert_eq!(eval_node(&tree, &metrics(&[("temp", 60.0)])), Truth::True);
        assert_eq!(eval_node(&tree, &metrics(&[("temp", 40.0)])), Truth::False);
    }

    #[test]
    fn test_all_undetermined_group() {
        let tree = group(
            LogicalOp::And,
            vec![
                leaf("a", CompareOp::Gt, 0.0),
                leaf("b", CompareOp::Gt, 0.0),
            ],
        );
        assert_eq!(eval_node(&tree, &metrics(&[])), Truth::Undetermined);
    }

    #[test]
    fn test_empty_group_is_undetermined() {
        let tree = group(LogicalOp::And, vec![]);
        assert_eq!(eval_node(&tree, &metrics(&[("x", 1.0)])), Truth::Undetermined);
    }

    #[test]
    fn test_nested_and_or() {
        // (voltage > 200 AND current > 3) OR frequency > 55
        let tree = group(
            LogicalOp::Or,
            vec![
                group(
                    LogicalOp::And,
                    vec![
                        leaf("voltage", CompareOp::Gt, 200.0),
                        leaf("current", CompareOp::Gt, 3.0),
                    ],
                ),
                leaf("frequency", CompareOp::Gt, 55.0),
            ],
        );
        let m = metrics(&[("voltage", 240.0), ("current", 4.0), ("frequency", 50.0)]);
        assert_eq!(eval_node(&tree, &m), Truth::True);
    }

    // Schedule tests

    #[test]
    fn test_always_scheduled() {
        let tz: Tz = "UTC".parse().unwrap();
        assert!(is_scheduled(ScheduleType::Always, None, Utc::now(), tz).unwrap());
    }

    fn weekday_window() -> ScheduleConfig {
        ScheduleConfig {
            start_time: Some("06:00".to_string()),
            end_time: Some("22:00".to_string()),
            days: Some(vec![1, 2, 3, 4, 5]),
            start_date: None,
            end_date: None,
        }
    }

    #[test]
    fn test_time_window_rejects_saturday() {
        let tz: Tz = "Asia/Kolkata".parse().unwrap();
        // 2026-03-14 is a Saturday; 10:00 IST = 04:30 UTC.
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 4, 30, 0).unwrap();
        let config = weekday_window();
        assert!(!is_scheduled(ScheduleType::TimeWindow, Some(&config), now, tz).unwrap());
    }

    #[test]
    fn test_time_window_accepts_monday_before_close() {
        let tz: Tz = "Asia/Kolkata".parse().unwrap();
        // 2026-03-16 is a Monday; 21:59 IST = 16:29 UTC.
        let now = Utc.with_ymd_and_hms(2026, 3, 16, 16, 29, 0).unwrap();
        let config = weekday_window();
        assert!(is_scheduled(ScheduleType::TimeWindow, Some(&config), now, tz).unwrap());
    }

    #[test]
    fn test_time_window_rejects_monday_after_close() {
        let tz: Tz = "Asia/Kolkata".parse().unwrap();
        // Monday 22:01 IST = 16:31 UTC.
        let now = Utc.with_ymd_and_hms(2026, 3, 16, 16, 31, 0).unwrap();
        let config = weekday_window();
        assert!(!is_scheduled(ScheduleType::TimeWindow, Some(&config), now, tz).unwrap());
    }

    #[test]
    fn test_time_window_wraps_past_midnight() {
        let tz: Tz = "UTC".parse().unwrap();
        let config = ScheduleConfig {
            start_time: Some("22:00".to_string()),
            end_time: Some("06:00".to_string()),
            days: Some(vec![1, 2, 3, 4, 5, 6, 7]),
            ..Default::default()
        };
        let inside = Utc.with_ymd_and_hms(2026, 3, 16, 23, 0, 0).unwrap();
        let early = Utc.with_ymd_and_hms(2026, 3, 16, 5, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2026, 3, 16, 12, 0, 0).unwrap();
        assert!(is_scheduled(ScheduleType::TimeWindow, Some(&config), inside, tz).unwrap());
        assert!(is_scheduled(ScheduleType::TimeWindow, Some(&config), early, tz).unwrap());
        assert!(!is_scheduled(ScheduleType::TimeWindow, Some(&config), outside, tz).unwrap());
    }

    #[test]
    fn test_date_range() {
        let tz: Tz = "UTC".parse().unwrap();
        let config = ScheduleConfig {
            start_date: Some("2026-03-01".to_string()),
            end_date: Some("2026-03-31".to_string()),
            ..Default::default()
        };
        let inside = Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
        assert!(is_scheduled(ScheduleType::DateRange, Some(&config), inside, tz).unwrap());
        assert!(!is_scheduled(ScheduleType::DateRange, Some(&config), outside, tz).unwrap());
    }

    #[test]
    fn test_missing_schedule_config_is_error() {
        let tz: Tz = "UTC".parse().unwrap();
        let result = is_scheduled(ScheduleType::TimeWindow, None, Utc::now(), tz);
        assert!(matches!(result, Err(EvalError::MalformedSchedule(_))));
    }

    // Full evaluation tests

    #[test]
    fn test_evaluate_fires() {
        let rule = make_rule(group(
            LogicalOp::And,
            vec![
                leaf("spindle_temp", CompareOp::Gt, 80.0),
                leaf("coolant_flow", CompareOp::Lt, 5.0),
            ],
        ));
        let m = metrics(&[("spindle_temp", 82.5), ("coolant_flow", 3.2)]);
        assert!(evaluate(&rule, &m, Utc::now(), "UTC").unwrap());
    }

    #[test]
    fn test_evaluate_undetermined_root_does_not_fire() {
        let rule = make_rule(leaf("spindle_temp", CompareOp::Gt, 80.0));
        let m = metrics(&[("coolant_flow", 3.2)]);
        assert!(!evaluate(&rule, &m, Utc::now(), "UTC").unwrap());
    }

    #[test]
    fn test_evaluate_unknown_timezone() {
        let rule = make_rule(leaf("x", CompareOp::Gt, 0.0));
        let result = evaluate(&rule, &metrics(&[("x", 1.0)]), Utc::now(), "Mars/Olympus");
        assert_eq!(result, Err(EvalError::UnknownTimezone("Mars/Olympus".into())));
    }

    #[test]
    fn test_evaluate_is_pure() {
        let rule = make_rule(leaf("temp", CompareOp::Gt, 50.0));
        let m = metrics(&[("temp", 60.0)]);
        let now = Utc.with_ymd_and_hms(2026, 3, 16, 12, 0, 0).unwrap();
        let first = evaluate(&rule, &m, now, "UTC").unwrap();
        let second = evaluate(&rule, &m, now, "UTC").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_evaluate_depth_exceeded() {
        let mut tree = leaf("x", CompareOp::Gt, 0.0);
        for _ in 0..MAX_CONDITION_DEPTH {
            tree = group(LogicalOp::And, vec![tree]);
        }
        let rule = make_rule(tree);
        let result = evaluate(&rule, &metrics(&[("x", 1.0)]), Utc::now(), "UTC");
        assert!(matches!(result, Err(EvalError::DepthExceeded(_))));
    }

    // Message template tests

    #[test]
    fn test_alert_message_lists_satisfied_leaves() {
        let mut rule = make_rule(group(
            LogicalOp::And,
            vec![
                leaf("spindle_temp", CompareOp::Gt, 80.0),
                leaf("coolant_flow", CompareOp::Lt, 5.0),
            ],
        ));
        rule.name = "Overheat".to_string();
        let m = metrics(&[("spindle_temp", 82.5), ("coolant_flow", 3.2)]);
        assert_eq!(
            build_alert_message(&rule, &m),
            "Rule 'Overheat' triggered: spindle_temp=82.5 (gt 80), coolant_flow=3.2 (lt 5)"
        );
    }

    #[test]
    fn test_alert_message_is_deterministic() {
        let rule = make_rule(leaf("temp", CompareOp::Gt, 50.0));
        let m = metrics(&[("temp", 60.0)]);
        assert_eq!(build_alert_message(&rule, &m), build_alert_message(&rule, &m));
    }
}
