//! Live KPI reads.
//!
//! Returns the most recent stored value per KPI-selected parameter of a
//! device. Values older than the staleness threshold are kept for
//! display but flagged `is_stale`; the API layer serves these verbatim.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::IngestError;
use crate::store::MetadataStore;
use crate::tsdb::{TimeSeriesBackend, TsdbError};
use domain::models::{display_name_from_key, LiveKpi};
use domain::services::health;

/// Window of the last-value query. Wider than the staleness threshold so
/// a stale-but-recent value is still shown rather than blank.
const LIVE_WINDOW: Duration = Duration::from_secs(300);

pub struct LiveKpiReader {
    backend: Arc<dyn TimeSeriesBackend>,
    store: Arc<dyn MetadataStore>,
    staleness_threshold_secs: i64,
}

impl LiveKpiReader {
    pub fn new(backend: Arc<dyn TimeSeriesBackend>, store: Arc<dyn MetadataStore>) -> Self {
        Self {
            backend,
            store,
            staleness_threshold_secs: health::DEFAULT_KPI_STALENESS_SECS,
        }
    }

    pub fn with_staleness_threshold(mut self, threshold_secs: i64) -> Self {
        self.staleness_threshold_secs = threshold_secs;
        self
    }

    /// Latest value per KPI parameter of one device, staleness-flagged.
    ///
    /// Fields without a KPI-selected parameter row are skipped; the
    /// caller's `factory_id` scopes both the metadata lookup and the
    /// time-series query tags.
    pub async fn live_kpis(
        &self,
        factory_id: i64,
        device_id: i64,
    ) -> Result<Vec<LiveKpi>, IngestError> {
        let parameters = self.store.kpi_parameters(factory_id, device_id).await?;
        if parameters.is_empty() {
            return Ok(Vec::new());
        }
        let metadata: HashMap<&str, &domain::models::DeviceParameter> = parameters
            .iter()
            .map(|p| (p.parameter_key.as_str(), p))
            .collect();

        let points = self
            .backend
            .latest_points(factory_id, device_id, LIVE_WINDOW)
            .await
            .map_err(|e| match e {
                TsdbError::Transient(reason) => IngestError::TransientStore(reason),
                TsdbError::Rejected(reason) => IngestError::PermanentStore(reason),
            })?;

        let now = Utc::now();
        let mut kpis: Vec<LiveKpi> = points
            .into_iter()
            .filter_map(|point| {
                let parameter = metadata.get(point.field.as_str())?;
                Some(LiveKpi {
                    display_name: parameter
                        .display_name
                        .clone()
                        .unwrap_or_else(|| display_name_from_key(&point.field)),
                    unit: parameter.unit.clone(),
                    value: point.value,
                    sampled_at: point.timestamp,
                    is_stale: health::is_stale(point.timestamp, now, self.staleness_threshold_secs),
                    parameter_key: point.field,
                })
            })
            .collect();
        kpis.sort_by(|a, b| a.parameter_key.cmp(&b.parameter_key));
        Ok(kpis)
    }
}
