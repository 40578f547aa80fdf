//! Domain layer for the FactoryOps core.
//!
//! This crate contains:
//! - Domain models (Factory, Device, DeviceParameter, Rule, Alert)
//! - Pure business logic (rule evaluation, health scoring)
//! - Domain validation

pub mod models;
pub mod services;
