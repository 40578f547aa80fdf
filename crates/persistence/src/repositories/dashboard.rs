//! Dashboard repository: factory summary derivation.

use chrono::{Duration, Utc};
use sqlx::PgPool;

use super::{AlertRepository, DeviceRepository};
use domain::models::FactorySummary;
use domain::services::health;

/// Derives the factory-level operational summary.
///
/// This is a read-only derivation over devices and alerts; nothing is
/// stored. Callers may cache the result briefly.
#[derive(Clone)]
pub struct DashboardRepository {
    devices: DeviceRepository,
    alerts: AlertRepository,
}

impl DashboardRepository {
    /// Creates a new DashboardRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            devices: DeviceRepository::new(pool.clone()),
            alerts: AlertRepository::new(pool),
        }
    }

    /// Compute the summary for one factory. Queries never join beyond
    /// `factory_id`.
    pub async fn summary(&self, factory_id: i64) -> Result<FactorySummary, sqlx::Error> {
        let online_after = Utc::now() - Duration::minutes(health::ONLINE_WINDOW_MINUTES);
        let (total, active, online) = self
            .devices
            .count_for_summary(factory_id, online_after)
            .await?;
        let (active_alerts, critical, high) = self.alerts.count_active(factory_id).await?;

        Ok(health::summarize(
            total,
            active,
            online,
            active_alerts,
            critical,
            high,
        ))
    }
}
