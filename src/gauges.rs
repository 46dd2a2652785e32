/// Continuous-forecast gauge registry.
///
/// NWPS publishes thousands of gauges, but only those whose forecasts are
/// "issued routinely" carry a usable hourly stage/flow forecast. This module
/// discovers that subset from the live API and persists it as the gauge list
/// CSV (`lid,state_id,lat,lng`) that the forecast harvester reads back.
/// The list is the single source of truth for which gauges are harvested.

use std::path::Path;

use rayon::ThreadPool;
use rayon::prelude::*;
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::config::{Fetch, Nwps};
use crate::ingest::nwps::{self, GaugeMetadata};
use crate::logging::{self, DataSource};
use crate::model::{GaugeRecord, Result, UNKNOWN_STATE};
use crate::storage;

/// Phrase in `forecastReliability` marking a routinely forecast gauge.
pub const ROUTINE_RELIABILITY: &str = "issued routinely";

/// NWPS fills unknown gauge positions with (1, 1).
const PLACEHOLDER_COORD: f64 = 1.0;
const COORD_EPSILON: f64 = 1e-6;

pub const GAUGE_LIST_HEADER: [&str; 4] = ["lid", "state_id", "lat", "lng"];

// ---------------------------------------------------------------------------
// Qualification
// ---------------------------------------------------------------------------

/// False when either coordinate is absent or zero, or both sit on the
/// (1, 1) placeholder.
pub fn usable_coordinates(lat: Option<f64>, lng: Option<f64>) -> bool {
    match (lat, lng) {
        (Some(lat), Some(lng)) => {
            lat != 0.0
                && lng != 0.0
                && lat.is_finite()
                && lng.is_finite()
                && !((lat - PLACEHOLDER_COORD).abs() < COORD_EPSILON
                    && (lng - PLACEHOLDER_COORD).abs() < COORD_EPSILON)
        }
        _ => false,
    }
}

pub fn is_continuous_forecast(metadata: &GaugeMetadata) -> bool {
    let routine = metadata
        .forecast_reliability
        .as_deref()
        .map(|r| r.to_lowercase().contains(ROUTINE_RELIABILITY))
        .unwrap_or(false);
    routine && usable_coordinates(metadata.latitude, metadata.longitude)
}

/// Gauge list row for a qualifying gauge; `None` otherwise.
///
/// `lid` is the identifier the metadata was requested with, used when the
/// payload omits its own.
pub fn gauge_record_from_metadata(lid: &str, metadata: &GaugeMetadata) -> Option<GaugeRecord> {
    if !is_continuous_forecast(metadata) {
        return None;
    }
    let state_id = metadata
        .state
        .as_ref()
        .and_then(|s| s.abbreviation.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_STATE);
    Some(GaugeRecord {
        lid: metadata.lid.clone().unwrap_or_else(|| lid.to_string()),
        state_id: state_id.to_string(),
        lat: metadata.latitude?,
        lng: metadata.longitude?,
    })
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Rebuild the continuous-forecast gauge list from the live API.
///
/// Metadata requests fan out over `pool`. A gauge whose metadata cannot be
/// fetched is logged and left out; only a failed index fetch is an error.
pub fn discover_continuous_gauges(
    pool: &ThreadPool,
    client: &Client,
    nwps_cfg: &Nwps,
    fetch: &Fetch,
) -> Result<Vec<GaugeRecord>> {
    let lids = nwps::fetch_gauge_index(client, nwps_cfg, fetch)?;
    logging::info(
        DataSource::Nwps,
        None,
        &format!("gauge index returned {} gauges", lids.len()),
    );

    let mut gauges: Vec<GaugeRecord> = pool.install(|| {
        lids.par_iter()
            .filter_map(|lid| match nwps::fetch_gauge_metadata(client, nwps_cfg, fetch, lid) {
                Ok(metadata) => gauge_record_from_metadata(lid, &metadata),
                Err(e) => {
                    logging::log_fetch_failure(DataSource::Nwps, lid, "metadata fetch", &e);
                    None
                }
            })
            .collect()
    });

    gauges.sort_by(|a, b| a.lid.cmp(&b.lid));
    logging::info(
        DataSource::Nwps,
        None,
        &format!("{} gauges with continuous forecasts", gauges.len()),
    );
    Ok(gauges)
}

// ---------------------------------------------------------------------------
// Gauge list CSV
// ---------------------------------------------------------------------------

pub fn write_gauge_list(path: &Path, gauges: &[GaugeRecord]) -> Result<()> {
    let rows: Vec<Vec<String>> = gauges
        .iter()
        .map(|g| {
            vec![
                g.lid.clone(),
                g.state_id.clone(),
                g.lat.to_string(),
                g.lng.to_string(),
            ]
        })
        .collect();
    storage::write_table(path, &GAUGE_LIST_HEADER, &rows)
}

/// Gauge list row as written by hand or by older tooling: every field
/// optional, untrimmed.
#[derive(Debug, Deserialize)]
struct GaugeListRow {
    lid: Option<String>,
    state_id: Option<String>,
    lat: Option<String>,
    lng: Option<String>,
}

fn parse_coord(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or(f64::NAN)
}

/// Read the gauge list.
///
/// Rows without a `lid` are skipped, values trimmed, and an empty state
/// becomes `Unknown`. Unparseable coordinates load as NaN; they are only
/// needed by the map, which skips such gauges.
pub fn load_gauge_list(path: &Path) -> Result<Vec<GaugeRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut gauges = Vec::new();
    for row in reader.deserialize::<GaugeListRow>() {
        let row = row?;
        let lid = match row.lid.as_deref().map(str::trim) {
            Some(lid) if !lid.is_empty() => lid.to_string(),
            _ => continue,
        };
        let state_id = row
            .state_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_STATE)
            .to_string();
        gauges.push(GaugeRecord {
            lid,
            state_id,
            lat: parse_coord(row.lat.as_deref()),
            lng: parse_coord(row.lng.as_deref()),
        });
    }
    Ok(gauges)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::nwps::StateInfo;
    use std::fs;

    fn metadata(reliability: &str, lat: Option<f64>, lng: Option<f64>) -> GaugeMetadata {
        GaugeMetadata {
            lid: Some("PEOI2".into()),
            name: Some("Illinois River at Peoria".into()),
            forecast_reliability: Some(reliability.into()),
            state: Some(StateInfo {
                abbreviation: Some("IL".into()),
                name: Some("Illinois".into()),
            }),
            latitude: lat,
            longitude: lng,
        }
    }

    #[test]
    fn test_routine_forecast_gauge_qualifies() {
        let meta = metadata("Forecasts Issued Routinely", Some(40.69), Some(-89.59));
        let record = gauge_record_from_metadata("PEOI2", &meta).expect("qualifies");
        assert_eq!(record.state_id, "IL");
        assert_eq!(record.lat, 40.69);
    }

    #[test]
    fn test_non_routine_gauge_is_rejected() {
        let meta = metadata("Forecasts issued during high water", Some(40.69), Some(-89.59));
        assert!(!is_continuous_forecast(&meta));
        let meta = GaugeMetadata {
            forecast_reliability: None,
            ..metadata("", Some(40.69), Some(-89.59))
        };
        assert!(!is_continuous_forecast(&meta));
    }

    #[test]
    fn test_placeholder_coordinates_are_rejected() {
        assert!(!usable_coordinates(Some(1.0), Some(1.0)));
        assert!(!usable_coordinates(Some(1.0000001), Some(0.9999999)));
        assert!(!usable_coordinates(Some(0.0), Some(-89.0)));
        assert!(!usable_coordinates(None, Some(-89.0)));
        // only one coordinate at 1.0 is a real position
        assert!(usable_coordinates(Some(1.0), Some(-89.0)));
        assert!(usable_coordinates(Some(40.69), Some(-89.59)));
    }

    #[test]
    fn test_missing_state_becomes_unknown() {
        let meta = GaugeMetadata {
            state: None,
            ..metadata("issued routinely", Some(40.0), Some(-90.0))
        };
        let record = gauge_record_from_metadata("XXXX1", &meta).unwrap();
        assert_eq!(record.state_id, UNKNOWN_STATE);
    }

    #[test]
    fn test_gauge_list_round_trip_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("water/continuous_forecast_gauges.csv");
        let gauges = vec![
            GaugeRecord { lid: "HAVI2".into(), state_id: "IL".into(), lat: 40.3, lng: -90.06 },
            GaugeRecord { lid: "PEOI2".into(), state_id: "IL".into(), lat: 40.69, lng: -89.59 },
        ];
        write_gauge_list(&path, &gauges).unwrap();
        assert_eq!(load_gauge_list(&path).unwrap(), gauges);
    }

    #[test]
    fn test_load_gauge_list_cleans_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gauges.csv");
        fs::write(
            &path,
            "lid,state_id,lat,lng\n PEOI2 , IL ,40.69,-89.59\n,IL,1,2\nXXXX1,,35.0,-100.5\n",
        )
        .unwrap();

        let gauges = load_gauge_list(&path).unwrap();
        assert_eq!(gauges.len(), 2);
        assert_eq!(gauges[0].lid, "PEOI2");
        assert_eq!(gauges[0].state_id, "IL");
        assert_eq!(gauges[1].state_id, "Unknown");
        assert_eq!(gauges[1].lng, -100.5);
    }

    #[test]
    fn test_missing_gauge_list_is_an_error() {
        assert!(load_gauge_list(Path::new("/nonexistent/gauges.csv")).is_err());
    }
}
