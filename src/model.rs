/// Core data types for the forecast harvester.
///
/// This module defines the shared domain model imported by all other modules:
/// raw and normalized forecast observations, registry rows, per-entity batch
/// outcomes, and the crate error type. It contains no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Series constants
// ---------------------------------------------------------------------------

/// Number of hourly slots in a normalized forecast series (7 days).
pub const FORECAST_HOURS: usize = 168;

/// Token written to CSV for a missing slot value.
pub const MISSING_TOKEN: &str = "NaN";

/// Placeholder values the NWPS API emits when it has no real forecast.
pub const SENTINEL_VALUES: [f64; 2] = [0.0, -999.0];

/// State directory used when a gauge has no state abbreviation.
pub const UNKNOWN_STATE: &str = "Unknown";

// ---------------------------------------------------------------------------
// Observation types
// ---------------------------------------------------------------------------

/// One forecast data point as it arrives from an API, before validation.
///
/// Either field may be absent or malformed; the normalizer decides what
/// survives.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawObservation {
    pub valid_time: Option<String>, // ISO 8601, e.g. "2024-05-01T12:00:00Z"
    pub value: Option<serde_json::Value>,
}

impl RawObservation {
    pub fn new(valid_time: &str, value: serde_json::Value) -> Self {
        Self {
            valid_time: Some(valid_time.to_string()),
            value: Some(value),
        }
    }
}

/// A validated observation: UTC instant plus a finite value or `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub valid_time: DateTime<Utc>,
    pub value: Option<f64>,
}

/// A fixed-width hourly forecast series for one entity.
///
/// Slot `i` holds the value valid at `anchor + i hours`. The slot count is
/// always `FORECAST_HOURS` regardless of how many observations existed.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastSeries {
    pub anchor: DateTime<Utc>,
    pub slots: [Option<f64>; FORECAST_HOURS],
}

impl ForecastSeries {
    /// Number of slots holding a real value.
    pub fn present_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_all_missing(&self) -> bool {
        self.present_count() == 0
    }
}

// ---------------------------------------------------------------------------
// Registry rows
// ---------------------------------------------------------------------------

/// One row of the continuous-forecast gauge list CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeRecord {
    pub lid: String,
    pub state_id: String,
    pub lat: f64,
    pub lng: f64,
}

/// One row of the city list CSV used for weather harvesting and the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub city: String,
    pub state_id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(rename = "Koppen", default)]
    pub koppen: Option<String>,
}

// ---------------------------------------------------------------------------
// Batch outcomes
// ---------------------------------------------------------------------------

/// Result of harvesting a single entity (gauge, city, zone, snapshot).
#[derive(Debug)]
pub enum EntityOutcome {
    /// A file was written or appended.
    Written(PathBuf),
    /// Nothing usable came back; no file was touched.
    Skipped(String),
    /// The fetch or write failed for this entity only.
    Failed(HarvestError),
}

/// Counts of per-entity outcomes for one harvest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: &EntityOutcome) {
        match outcome {
            EntityOutcome::Written(_) => self.written += 1,
            EntityOutcome::Skipped(_) => self.skipped += 1,
            EntityOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.written + self.skipped + self.failed
    }
}

impl<'a> FromIterator<&'a EntityOutcome> for BatchSummary {
    fn from_iter<I: IntoIterator<Item = &'a EntityOutcome>>(iter: I) -> Self {
        let mut summary = BatchSummary::default();
        for outcome in iter {
            summary.record(outcome);
        }
        summary
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise while fetching, reshaping, or storing forecasts.
///
/// The display prefixes ("HTTP error", "Request failed", "Parse error",
/// "No data available") are matched by `logging::classify_failure`.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Non-2xx HTTP response from an upstream API.
    #[error("HTTP error: {0}")]
    Http(u16),
    /// Transport-level failure (DNS, connect, timeout, TLS).
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The response body could not be deserialized or reshaped.
    #[error("Parse error: {0}")]
    Parse(String),
    /// The entity was found but returned no usable data.
    #[error("No data available for {0}")]
    NoData(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    /// A required secret was not present in the environment.
    #[error("Missing credential: {0}")]
    MissingCredential(String),
}

impl From<serde_json::Error> for HarvestError {
    fn from(e: serde_json::Error) -> Self {
        HarvestError::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_prefixes_are_stable() {
        assert_eq!(HarvestError::Http(503).to_string(), "HTTP error: 503");
        assert_eq!(
            HarvestError::Parse("bad json".into()).to_string(),
            "Parse error: bad json"
        );
        assert!(
            HarvestError::NoData("PEOI2".into())
                .to_string()
                .starts_with("No data available")
        );
    }

    #[test]
    fn test_batch_summary_counts_each_outcome() {
        let outcomes = vec![
            EntityOutcome::Written(PathBuf::from("a.csv")),
            EntityOutcome::Written(PathBuf::from("b.csv")),
            EntityOutcome::Skipped("empty".into()),
            EntityOutcome::Failed(HarvestError::Http(500)),
        ];
        let summary: BatchSummary = outcomes.iter().collect();
        assert_eq!(summary.written, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total(), 4);
    }
}
