/// Open-Meteo Forecast API Client
///
/// Retrieves the 7-day hourly weather forecast for a single lat/lon point.
/// Open-Meteo is free for non-commercial use within 600 requests/minute
/// and 5000 requests/hour; `pause_before` paces a sequential run to that.
///
/// API Documentation: https://open-meteo.com/en/docs

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::analysis::series::parse_utc;
use crate::config::{Fetch, OpenMeteo};
use crate::ingest::http::get_json;
use crate::model::{HarvestError, Result};

// ============================================================================
// Open-Meteo API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ForecastResponse {
    pub latitude: f64,
    pub longitude: f64,
    pub hourly: Option<HourlyBlock>,
}

/// `hourly` object: a `time` array plus one array per requested variable.
#[derive(Debug, Deserialize)]
pub struct HourlyBlock {
    pub time: Vec<String>,
    #[serde(flatten)]
    pub variables: BTreeMap<String, Vec<Option<f64>>>,
}

/// Processed hourly forecast for one point
#[derive(Debug, Clone)]
pub struct WeatherForecast {
    pub latitude: f64,
    pub longitude: f64,
    pub times: Vec<DateTime<Utc>>,
    /// Requested variables in request order, each aligned with `times`.
    pub variables: Vec<(String, Vec<Option<f64>>)>,
}

impl WeatherForecast {
    pub fn first_hour(&self) -> Option<DateTime<Utc>> {
        self.times.first().copied()
    }

    pub fn hours(&self) -> usize {
        self.times.len()
    }
}

// ============================================================================
// API Client Functions
// ============================================================================

pub fn forecast_url(openmeteo: &OpenMeteo, lat: f64, lon: f64) -> String {
    format!(
        "{}/forecast?latitude={}&longitude={}&hourly={}&timezone=GMT",
        openmeteo.base_url.trim_end_matches('/'),
        lat,
        lon,
        openmeteo.variables.join(",")
    )
}

/// Fetch the hourly forecast for one point
pub fn fetch_forecast(
    client: &Client,
    openmeteo: &OpenMeteo,
    fetch: &Fetch,
    lat: f64,
    lon: f64,
) -> Result<WeatherForecast> {
    let response: ForecastResponse = get_json(client, &forecast_url(openmeteo, lat, lon), fetch)?;
    into_forecast(response, &openmeteo.variables)
}

/// Reshape a response into request-ordered variable columns.
///
/// A variable the API did not return becomes an all-missing column; a
/// column whose length disagrees with `time` is a parse error.
pub fn into_forecast(response: ForecastResponse, requested: &[String]) -> Result<WeatherForecast> {
    let location = format!("{},{}", response.latitude, response.longitude);
    let mut hourly = response
        .hourly
        .ok_or_else(|| HarvestError::NoData(location.clone()))?;

    let times = hourly
        .time
        .iter()
        .map(|t| parse_utc(t).ok_or_else(|| HarvestError::Parse(format!("bad hourly time '{}'", t))))
        .collect::<Result<Vec<_>>>()?;
    if times.is_empty() {
        return Err(HarvestError::NoData(location));
    }

    let mut variables = Vec::with_capacity(requested.len());
    for name in requested {
        let values = hourly
            .variables
            .remove(name)
            .unwrap_or_else(|| vec![None; times.len()]);
        if values.len() != times.len() {
            return Err(HarvestError::Parse(format!(
                "{} has {} values for {} hours",
                name,
                values.len(),
                times.len()
            )));
        }
        variables.push((name.clone(), values));
    }

    Ok(WeatherForecast {
        latitude: response.latitude,
        longitude: response.longitude,
        times,
        variables,
    })
}

/// Parse a forecast body (used by tests and offline replays)
pub fn parse_forecast(body: &str, requested: &[String]) -> Result<WeatherForecast> {
    let response: ForecastResponse = serde_json::from_str(body)?;
    into_forecast(response, requested)
}

// ============================================================================
// Rate budget
// ============================================================================

/// Pause to take before the request with zero-based `index` in a sequential
/// run: a minute every `per_minute - 1` requests and an hour every
/// `per_hour - 1` requests (both when both boundaries coincide).
pub fn pause_before(index: usize, per_minute: usize, per_hour: usize) -> Duration {
    if index == 0 {
        return Duration::ZERO;
    }
    let mut pause = Duration::ZERO;
    if index % (per_minute - 1) == 0 {
        pause += Duration::from_secs(60);
    }
    if index % (per_hour - 1) == 0 {
        pause += Duration::from_secs(3600);
    }
    pause
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn vars(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    const BODY: &str = r#"{
        "latitude": 40.7, "longitude": -89.6,
        "hourly_units": {"time": "iso8601", "temperature_2m": "°C"},
        "hourly": {
            "time": ["2024-05-01T00:00", "2024-05-01T01:00", "2024-05-01T02:00"],
            "temperature_2m": [11.2, null, 10.8],
            "precipitation": [0.0, 0.1, 0.0]
        }
    }"#;

    #[test]
    fn test_parse_forecast_keeps_request_order() {
        let forecast = parse_forecast(BODY, &vars(&["precipitation", "temperature_2m"])).unwrap();
        assert_eq!(forecast.hours(), 3);
        assert_eq!(forecast.variables[0].0, "precipitation");
        assert_eq!(forecast.variables[1].1, vec![Some(11.2), None, Some(10.8)]);
        assert_eq!(
            forecast.first_hour(),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_unreturned_variable_is_all_missing() {
        let forecast = parse_forecast(BODY, &vars(&["cloud_cover"])).unwrap();
        assert_eq!(forecast.variables[0].1, vec![None, None, None]);
    }

    #[test]
    fn test_length_mismatch_is_parse_error() {
        let body = r#"{"latitude": 1.0, "longitude": 2.0,
            "hourly": {"time": ["2024-05-01T00:00"], "precipitation": [0.0, 1.0]}}"#;
        let result = parse_forecast(body, &vars(&["precipitation"]));
        assert!(matches!(result, Err(HarvestError::Parse(_))));
    }

    #[test]
    fn test_missing_hourly_block_is_no_data() {
        let result = parse_forecast(r#"{"latitude": 1.0, "longitude": 2.0}"#, &vars(&["precipitation"]));
        assert!(matches!(result, Err(HarvestError::NoData(_))));
    }

    #[test]
    fn test_pause_before_follows_rate_budget() {
        assert_eq!(pause_before(0, 600, 5000), Duration::ZERO);
        assert_eq!(pause_before(1, 600, 5000), Duration::ZERO);
        assert_eq!(pause_before(599, 600, 5000), Duration::from_secs(60));
        assert_eq!(pause_before(1198, 600, 5000), Duration::from_secs(60));
        assert_eq!(pause_before(4999, 600, 5000), Duration::from_secs(3600));
        // both boundaries at once: 599 * 4999
        assert_eq!(pause_before(599 * 4999, 600, 5000), Duration::from_secs(3660));
    }

    #[test]
    fn test_forecast_url_lists_variables() {
        let om = OpenMeteo {
            variables: vars(&["temperature_2m", "precipitation"]),
            ..OpenMeteo::default()
        };
        let url = forecast_url(&om, 40.7, -89.6);
        assert!(url.starts_with("https://api.open-meteo.com/v1/forecast?latitude=40.7&longitude=-89.6"));
        assert!(url.contains("hourly=temperature_2m,precipitation"));
    }
}
