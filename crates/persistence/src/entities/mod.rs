//! Entity definitions (database row mappings).

mod alert;
mod device;
mod factory;
mod parameter;
mod rule;

pub use alert::{AlertEntity, RuleCooldownEntity};
pub use device::DeviceEntity;
pub use factory::FactoryEntity;
pub use parameter::DeviceParameterEntity;
pub use rule::RuleWithDevicesEntity;
