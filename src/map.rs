/// Interactive map renderer
///
/// Fills the Leaflet HTML template with the city list, the gauge list and a
/// compressed Köppen climate grid, producing one self-contained HTML page.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;

use crate::cities;
use crate::config::Paths;
use crate::gauges;
use crate::logging::{self, DataSource};
use crate::model::{City, GaugeRecord, HarvestError, Result};
use crate::storage::{WEATHER_DIR, fmt_coord};

pub const CITIES_PLACEHOLDER: &str = "CITIES_DATA_PLACEHOLDER";
pub const GAUGES_PLACEHOLDER: &str = "GAUGES_DATA_PLACEHOLDER";
pub const KOPPEN_PLACEHOLDER: &str = "KOPPEN_COMPRESSED_PLACEHOLDER";

pub const GAUGE_PAGE_URL: &str = "https://water.noaa.gov/gauges";

#[derive(Debug, Serialize)]
pub struct CityMarker {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub koppen: Option<String>,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct GaugeMarker {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub url: String,
}

impl From<&City> for CityMarker {
    fn from(city: &City) -> Self {
        Self {
            name: format!("{}, {}", city.city, city.state_id),
            lat: city.lat,
            lon: city.lng,
            koppen: city.koppen.clone(),
            // relative link into the weather tree next to the page
            url: format!(
                "data/{}/{}/{}_{}N_{}W/",
                WEATHER_DIR,
                city.state_id,
                city.city,
                fmt_coord(city.lat),
                fmt_coord(city.lng)
            ),
        }
    }
}

impl From<&GaugeRecord> for GaugeMarker {
    fn from(gauge: &GaugeRecord) -> Self {
        Self {
            name: format!("{}, {}", gauge.lid, gauge.state_id),
            lat: gauge.lat,
            lon: gauge.lng,
            url: format!("{}/{}", GAUGE_PAGE_URL, gauge.lid),
        }
    }
}

/// Gauges without finite coordinates cannot be placed and are left off.
pub fn gauge_markers(gauges: &[GaugeRecord]) -> Vec<GaugeMarker> {
    gauges
        .iter()
        .filter(|g| g.lat.is_finite() && g.lng.is_finite())
        .map(GaugeMarker::from)
        .collect()
}

/// Gzip then standard base64, as decoded by the page's inflate step.
pub fn compress_koppen(json: &str) -> Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(json.as_bytes())?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

/// Substitute all three placeholders into `template`.
pub fn render(template: &str, cities: &[City], gauges: &[GaugeRecord], koppen_json: &str) -> Result<String> {
    let city_markers: Vec<CityMarker> = cities.iter().map(CityMarker::from).collect();
    let cities_json = serde_json::to_string(&city_markers)?;
    let gauges_json = serde_json::to_string(&gauge_markers(gauges))?;
    let koppen = compress_koppen(koppen_json)?;

    Ok(template
        .replace(CITIES_PLACEHOLDER, &cities_json)
        .replace(GAUGES_PLACEHOLDER, &gauges_json)
        .replace(KOPPEN_PLACEHOLDER, &koppen))
}

fn read_text(path: &Path, what: &str) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| HarvestError::Config(format!("cannot read {} {}: {}", what, path.display(), e)))
}

/// Render the map from the configured inputs and write it; returns the
/// output path.
pub fn render_map(paths: &Paths) -> Result<PathBuf> {
    let template = read_text(&paths.map_template, "map template")?;
    let koppen_json = read_text(&paths.koppen_grid, "Köppen grid")?;
    let city_list = cities::load_cities(&paths.city_list)?;
    let gauge_list = gauges::load_gauge_list(&paths.gauge_list_path())?;

    let html = render(&template, &city_list, &gauge_list, &koppen_json)?;
    if let Some(parent) = paths.map_output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(&paths.map_output, html)?;

    logging::info(
        DataSource::Storage,
        None,
        &format!(
            "map written to {} ({} cities, {} gauges)",
            paths.map_output.display(),
            city_list.len(),
            gauge_list.len()
        ),
    );
    Ok(paths.map_output.clone())
}
