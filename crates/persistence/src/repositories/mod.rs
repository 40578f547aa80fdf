//! Repository implementations.

mod alert;
mod dashboard;
mod device;
mod factory;
mod parameter;
mod rule;

pub use alert::AlertRepository;
pub use dashboard::DashboardRepository;
pub use device::DeviceRepository;
pub use factory::FactoryRepository;
pub use parameter::ParameterRepository;
pub use rule::RuleRepository;
