/// GridStatus API Client
///
/// Retrieves the latest published hourly load forecast for an ISO dataset
/// (ISO-NE, NYISO, MISO, ERCOT, SPP, PJM) from the GridStatus hosted API.
/// Requires an API key, read from the environment.
///
/// API Documentation: https://docs.gridstatus.io/

use chrono::NaiveDate;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::analysis::series::to_finite;
use crate::config::{Fetch, GridStatus};
use crate::ingest::http::{read_json, send_with_retry};
use crate::model::{HarvestError, Result};

/// Column carrying the first forecast hour of each record.
pub const INTERVAL_START_COLUMN: &str = "interval_start_utc";

// ============================================================================
// GridStatus API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub data: Vec<Map<String, Value>>,
}

/// One dataset's forecast split into per-zone hourly columns
#[derive(Debug, Clone, PartialEq)]
pub struct LoadForecast {
    pub dataset: String,
    /// `interval_start_utc` of the first record, as published.
    pub first_interval_start: Option<String>,
    /// Zone name -> one value per record, in record order.
    pub zones: Vec<(String, Vec<Option<f64>>)>,
}

/// Interval and publish-time columns; everything else is a zone.
pub fn is_time_column(name: &str) -> bool {
    name.starts_with("interval_")
        || name.starts_with("publish_time")
        || name.ends_with("_utc")
        || name.ends_with("_local")
}

// ============================================================================
// API Client Functions
// ============================================================================

pub fn query_url(gridstatus: &GridStatus, dataset: &str, start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "{}/datasets/{}/query?start_time={}&end_time={}&publish_time=latest&timezone=market&limit={}",
        gridstatus.base_url.trim_end_matches('/'),
        dataset,
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d"),
        gridstatus.query_limit
    )
}

/// Fetch the latest load forecast for `dataset` between `start` and `end`
pub fn fetch_load_forecast(
    client: &Client,
    gridstatus: &GridStatus,
    fetch: &Fetch,
    api_key: &str,
    dataset: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<LoadForecast> {
    let url = query_url(gridstatus, dataset, start, end);
    let response = send_with_retry(fetch, || {
        client
            .get(&url)
            .header("x-api-key", api_key)
            .header("Accept", "application/json")
    })?;
    let body: QueryResponse = read_json(response)?;
    into_load_forecast(dataset, body)
}

/// Split query records into zone columns.
pub fn into_load_forecast(dataset: &str, response: QueryResponse) -> Result<LoadForecast> {
    let records = response.data;
    let first = records
        .first()
        .ok_or_else(|| HarvestError::NoData(dataset.to_string()))?;

    let first_interval_start = first
        .get(INTERVAL_START_COLUMN)
        .and_then(Value::as_str)
        .map(str::to_string);

    let zone_names: Vec<String> = first
        .keys()
        .filter(|k| !is_time_column(k))
        .cloned()
        .collect();
    if zone_names.is_empty() {
        return Err(HarvestError::Parse(format!("{} has no zone columns", dataset)));
    }

    let zones = zone_names
        .into_iter()
        .map(|zone| {
            let values = records
                .iter()
                .map(|r| r.get(&zone).and_then(to_finite))
                .collect();
            (zone, values)
        })
        .collect();

    Ok(LoadForecast {
        dataset: dataset.to_string(),
        first_interval_start,
        zones,
    })
}

/// Parse a query body (used by tests and offline replays)
pub fn parse_load_forecast(dataset: &str, body: &str) -> Result<LoadForecast> {
    let response: QueryResponse = serde_json::from_str(body)?;
    into_load_forecast(dataset, response)
}

// ============================================================================
// Tests
// ============================================================================
