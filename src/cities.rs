/// City registry and synthetic grid for weather harvesting.
///
/// Weather is requested either for every row of the city list CSV or for an
/// `n×n` lattice over the contiguous US.

use std::path::Path;

use serde::Deserialize;

use crate::logging::{self, DataSource};
use crate::model::{City, Result};

/// Lattice bounds: latitude degrees north, longitude degrees west.
pub const GRID_LAT_RANGE: (f64, f64) = (25.0, 49.0);
pub const GRID_LON_RANGE: (f64, f64) = (67.0, 125.0);

#[derive(Debug, Deserialize)]
struct CityListRow {
    city: Option<String>,
    state_id: Option<String>,
    lat: Option<String>,
    lng: Option<String>,
    #[serde(rename = "Koppen", default)]
    koppen: Option<String>,
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_coord(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Load the city list. Extra columns are ignored; `Koppen` is optional.
///
/// A row without a city name or with unparseable coordinates is logged and
/// skipped; the rest of the list still loads.
pub fn load_cities(path: &Path) -> Result<Vec<City>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut cities = Vec::new();
    for (i, row) in reader.deserialize::<CityListRow>().enumerate() {
        // header is line 1
        let line = i + 2;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                logging::warn(
                    DataSource::System,
                    None,
                    &format!("city list line {} skipped: {}", line, e),
                );
                continue;
            }
        };
        let name = non_empty(row.city);
        let coords = parse_coord(row.lat.as_deref()).zip(parse_coord(row.lng.as_deref()));
        match (name, coords) {
            (Some(city), Some((lat, lng))) => cities.push(City {
                city,
                state_id: non_empty(row.state_id).unwrap_or_default(),
                lat,
                lng,
                koppen: non_empty(row.koppen),
            }),
            (name, _) => logging::warn(
                DataSource::System,
                name.as_deref(),
                &format!("city list line {} skipped: missing name or coordinates", line),
            ),
        }
    }
    Ok(cities)
}

/// `n` evenly spaced values over `[start, end]`, endpoints included.
fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// `(lat, lon)` pairs of an `n×n` lattice, latitude-major, rounded to two
/// decimals. Longitudes are degrees west (positive).
pub fn grid_points(n: usize) -> Vec<(f64, f64)> {
    let lats = linspace(GRID_LAT_RANGE.0, GRID_LAT_RANGE.1, n);
    let lons = linspace(GRID_LON_RANGE.0, GRID_LON_RANGE.1, n);
    lats.iter()
        .flat_map(|&lat| lons.iter().map(move |&lon| (round2(lat), round2(lon))))
        .collect()
}
