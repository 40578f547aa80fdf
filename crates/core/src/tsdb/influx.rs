//! InfluxDB v2 HTTP backend: line-protocol writes, Flux last-value reads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;

use super::{LatestPoint, TimeSeriesBackend, TsdbError};
use crate::config::TimeSeriesConfig;

/// Talks to the InfluxDB v2 `/api/v2/write` and `/api/v2/query`
/// endpoints.
pub struct InfluxBackend {
    client: Client,
    write_url: String,
    query_url: String,
    bucket: String,
    token: String,
}

impl InfluxBackend {
    pub fn new(config: &TimeSeriesConfig) -> Result<Self, TsdbError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.flush_deadline_secs))
            .build()
            .map_err(|e| TsdbError::Transient(e.to_string()))?;

        let base = config.url.trim_end_matches('/');
        let write_url = format!(
            "{}/api/v2/write?org={}&bucket={}&precision=ns",
            base, config.org, config.bucket
        );
        let query_url = format!("{}/api/v2/query?org={}", base, config.org);

        Ok(Self {
            client,
            write_url,
            query_url,
            bucket: config.bucket.clone(),
            token: config.token.clone(),
        })
    }

    fn classify(status: reqwest::StatusCode, body: String) -> TsdbError {
        // 429 and 5xx are load or availability; everything else 4xx means
        // the request itself was rejected.
        if status.as_u16() == 429 || status.is_server_error() {
            TsdbError::Transient(format!("{}: {}", status, body))
        } else {
            TsdbError::Rejected(format!("{}: {}", status, body))
        }
    }
}

#[async_trait]
impl TimeSeriesBackend for InfluxBackend {
    async fn write_lines(&self, lines: &str) -> Result<(), TsdbError> {
        let response = self
            .client
            .post(&self.write_url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(lines.to_string())
            .send()
            .await
            .map_err(|e| TsdbError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Self::classify(status, body))
    }

    async fn latest_points(
        &self,
        factory_id: i64,
        device_id: i64,
        window: Duration,
    ) -> Result<Vec<LatestPoint>, TsdbError> {
        let flux = format!(
            r#"from(bucket: "{bucket}")
  |> range(start: -{window}s)
  |> filter(fn: (r) => r._measurement == "telemetry")
  |> filter(fn: (r) => r.factory_id == "{factory_id}")
  |> filter(fn: (r) => r.device_id == "{device_id}")
  |> last()"#,
            bucket = self.bucket,
            window = window.as_secs(),
            factory_id = factory_id,
            device_id = device_id,
        );

        let response = self
            .client
            .post(&self.query_url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(flux)
            .send()
            .await
            .map_err(|e| TsdbError::Transient(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TsdbError::Transient(e.to_string()))?;
        if !status.is_success() {
            return Err(Self::classify(status, body));
        }

        Ok(parse_query_csv(&body))
    }
}

/// Parse the annotated CSV of a Flux `last()` query into points.
///
/// The response repeats a header row per result table; `_field`, `_value`
/// and `_time` column positions are re-resolved at each header. Rows that
/// fail to parse are skipped, not fatal.
pub(crate) fn parse_query_csv(body: &str) -> Vec<LatestPoint> {
    let mut points = Vec::new();
    let mut columns: Option<(usize, usize, usize)> = None;

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let cells: Vec<&str> = line.split(',').collect();

        let field_pos = cells.iter().position(|c| *c == "_field");
        if let (Some(field), Some(value), Some(time)) = (
            field_pos,
            cells.iter().position(|c| *c == "_value"),
            cells.iter().position(|c| *c == "_time"),
        ) {
            columns = Some((field, value, time));
            continue;
        }

        let Some((field, value, time)) = columns else {
            continue;
        };
        if cells.len() <= field.max(value).max(time) {
            continue;
        }

        let Ok(parsed_value) = cells[value].parse::<f64>() else {
            continue;
        };
        let Ok(parsed_time) = DateTime::parse_from_rfc3339(cells[time]) else {
            continue;
        };

        points.push(LatestPoint {
            field: cells[field].to_string(),
            value: parsed_value,
            timestamp: parsed_time.with_timezone(&Utc),
        });
    }

    points
}
