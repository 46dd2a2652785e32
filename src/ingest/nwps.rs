/// NWPS (National Water Prediction Service) API Client
///
/// Retrieves the national gauge index, per-gauge metadata, and the hourly
/// stage/flow forecast for river gauges from NOAA's NWPS API.
///
/// API Documentation: https://api.water.noaa.gov/nwps/v1/docs/
/// Gauge pages: https://water.noaa.gov/gauges/{lid}

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::{Fetch, ForecastField, Nwps};
use crate::ingest::http::get_json;
use crate::model::{HarvestError, RawObservation, Result};

// ============================================================================
// NWPS API Response Structures
// ============================================================================

/// `GET /gauges` response
#[derive(Debug, Deserialize)]
pub struct GaugeIndex {
    #[serde(default)]
    pub gauges: Vec<GaugeSummary>,
}

/// One entry of the gauge index; only the identifier is needed
#[derive(Debug, Clone, Deserialize)]
pub struct GaugeSummary {
    pub lid: Option<String>,
    pub name: Option<String>,
}

/// `GET /gauges/{lid}` response (subset)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GaugeMetadata {
    pub lid: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub forecast_reliability: Option<String>,
    #[serde(default)]
    pub state: Option<StateInfo>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateInfo {
    pub abbreviation: Option<String>,
    pub name: Option<String>,
}

/// `GET /gauges/{lid}/stageflow/forecast` response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageFlowForecast {
    pub issued_time: Option<String>,
    pub generated_time: Option<String>,
    pub primary_name: Option<String>,
    pub primary_units: Option<String>,
    pub secondary_name: Option<String>,
    pub secondary_units: Option<String>,
    #[serde(default)]
    pub data: Vec<StageFlowPoint>,
}

/// Single forecast point. Values are kept as raw JSON: the API mixes
/// numbers, nulls and the occasional string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageFlowPoint {
    pub valid_time: Option<String>,
    pub primary: Option<Value>,
    pub secondary: Option<Value>,
}

impl StageFlowForecast {
    /// Issuance time to stamp the CSV row with: `issuedTime`, else
    /// `generatedTime`.
    pub fn issued(&self) -> Option<&str> {
        self.issued_time
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.generated_time.as_deref().filter(|s| !s.trim().is_empty()))
    }

    /// Projects the selected field of every point into raw observations.
    pub fn observations(&self, field: ForecastField) -> Vec<RawObservation> {
        self.data
            .iter()
            .map(|p| RawObservation {
                valid_time: p.valid_time.clone(),
                value: match field {
                    ForecastField::Primary => p.primary.clone(),
                    ForecastField::Secondary => p.secondary.clone(),
                },
            })
            .collect()
    }
}

// ============================================================================
// URL construction
// ============================================================================

pub fn gauges_url(nwps: &Nwps) -> String {
    format!("{}/gauges", nwps.base_url.trim_end_matches('/'))
}

pub fn gauge_url(nwps: &Nwps, lid: &str) -> String {
    format!("{}/gauges/{}", nwps.base_url.trim_end_matches('/'), lid)
}

pub fn stageflow_forecast_url(nwps: &Nwps, lid: &str) -> String {
    format!("{}/stageflow/forecast", gauge_url(nwps, lid))
}

// ============================================================================
// API Client Functions
// ============================================================================

/// Fetch every gauge identifier known to NWPS
pub fn fetch_gauge_index(client: &Client, nwps: &Nwps, fetch: &Fetch) -> Result<Vec<String>> {
    let index: GaugeIndex = get_json(client, &gauges_url(nwps), fetch)?;
    Ok(index
        .gauges
        .into_iter()
        .filter_map(|g| g.lid)
        .map(|lid| lid.trim().to_string())
        .filter(|lid| !lid.is_empty())
        .collect())
}

/// Fetch metadata for a single gauge
pub fn fetch_gauge_metadata(
    client: &Client,
    nwps: &Nwps,
    fetch: &Fetch,
    lid: &str,
) -> Result<GaugeMetadata> {
    get_json(client, &gauge_url(nwps, lid), fetch)
}

/// Fetch the stage/flow forecast for a single gauge
///
/// An empty `data` array is reported as `NoData` so the caller skips the
/// gauge without touching its file.
pub fn fetch_stageflow_forecast(
    client: &Client,
    nwps: &Nwps,
    fetch: &Fetch,
    lid: &str,
) -> Result<StageFlowForecast> {
    let forecast: StageFlowForecast = get_json(client, &stageflow_forecast_url(nwps, lid), fetch)?;
    if forecast.data.is_empty() {
        return Err(HarvestError::NoData(lid.to_string()));
    }
    Ok(forecast)
}

/// Parse a stage/flow forecast body (used by tests and offline replays)
pub fn parse_stageflow_forecast(body: &str) -> Result<StageFlowForecast> {
    Ok(serde_json::from_str(body)?)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FORECAST_BODY: &str = r#"{
        "issuedTime": "2024-05-01T14:33:00Z",
        "generatedTime": "2024-05-01T15:00:00Z",
        "primaryName": "Stage",
        "primaryUnits": "ft",
        "secondaryName": "Flow",
        "secondaryUnits": "kcfs",
        "data": [
            {"validTime": "2024-05-01T18:00:00Z", "generatedTime": "2024-05-01T15:00:00Z", "primary": 17.2, "secondary": 41.3},
            {"validTime": "2024-05-02T00:00:00Z", "generatedTime": "2024-05-01T15:00:00Z", "primary": 17.5, "secondary": null}
        ]
    }"#;

    #[test]
    fn test_parse_stageflow_forecast() {
        let forecast = parse_stageflow_forecast(FORECAST_BODY).expect("valid body");
        assert_eq!(forecast.data.len(), 2);
        assert_eq!(forecast.primary_units.as_deref(), Some("ft"));
        assert_eq!(forecast.issued(), Some("2024-05-01T14:33:00Z"));
    }

    #[test]
    fn test_issued_falls_back_to_generated_time() {
        let forecast = StageFlowForecast {
            issued_time: Some("".into()),
            generated_time: Some("2024-05-01T15:00:00Z".into()),
            ..Default::default()
        };
        assert_eq!(forecast.issued(), Some("2024-05-01T15:00:00Z"));
        assert_eq!(StageFlowForecast::default().issued(), None);
    }

    #[test]
    fn test_observations_select_field() {
        let forecast = parse_stageflow_forecast(FORECAST_BODY).unwrap();
        let flow = forecast.observations(ForecastField::Secondary);
        assert_eq!(flow[0].value, Some(json!(41.3)));
        assert_eq!(flow[1].value, None); // null collapses to None
        let stage = forecast.observations(ForecastField::Primary);
        assert_eq!(stage[1].value, Some(json!(17.5)));
        assert_eq!(stage[0].valid_time.as_deref(), Some("2024-05-01T18:00:00Z"));
    }

    #[test]
    fn test_missing_fields_deserialize_as_none() {
        let forecast = parse_stageflow_forecast(r#"{"data": [{"primary": "x"}]}"#).unwrap();
        assert_eq!(forecast.data[0].valid_time, None);
        assert_eq!(forecast.data[0].secondary, None);
    }

    #[test]
    fn test_metadata_parses_nested_state() {
        let meta: GaugeMetadata = serde_json::from_str(
            r#"{"lid": "PIAI2", "forecastReliability": "Forecasts issued routinely",
                "state": {"abbreviation": "IL", "name": "Illinois"},
                "latitude": 40.69, "longitude": -89.59}"#,
        )
        .unwrap();
        assert_eq!(meta.state.and_then(|s| s.abbreviation).as_deref(), Some("IL"));
        assert_eq!(meta.latitude, Some(40.69));
    }

    #[test]
    fn test_urls() {
        let nwps = Nwps {
            base_url: "https://api.water.noaa.gov/nwps/v1/".into(),
            ..Nwps::default()
        };
        assert_eq!(gauges_url(&nwps), "https://api.water.noaa.gov/nwps/v1/gauges");
        assert_eq!(
            stageflow_forecast_url(&nwps, "PIAI2"),
            "https://api.water.noaa.gov/nwps/v1/gauges/PIAI2/stageflow/forecast"
        );
    }
}
