//! Queue consumers of the alerting path.

mod notifications;
mod rule_engine;

pub use notifications::NotificationTask;
pub use rule_engine::{AlertingWorker, RuleEngineTask};
