/// CSV storage layout
///
/// Every harvester writes under a single `data_dir`:
///
/// ```text
/// water/continuous_forecast_gauges.csv                     gauge list
/// water/{state}/{lid}_forecast.csv                         overwritten
/// weather/{state}/{city}_{lat}N_{lon}W/{year}/...          appended
/// weather/{lat}N_{lon}W/{year}/...                         appended (grid)
/// electricity/{ISO}/{year}/{zone}.csv                      appended
/// electricity/ERCOT/{year}/{ISO}/{zone}.csv                appended (ERCOT_*)
/// {category}/{id}/{YYYY}/{MM}/{DD}.csv                     overwritten
/// ```
///
/// Parent directories are created on demand. Names that come from upstream
/// APIs or the config (lids, states, cities, zones, ids) pass through
/// `path_component` so each one stays a single directory level.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};

use crate::model::{Result, UNKNOWN_STATE};

pub const WATER_DIR: &str = "water";
pub const WEATHER_DIR: &str = "weather";
pub const ELECTRICITY_DIR: &str = "electricity";

/// Coordinate as it appears in directory and file names ("40.69", "25.0").
pub fn fmt_coord(value: f64) -> String {
    format!("{:?}", value)
}

/// Make an external name safe as one path component.
///
/// Separators (and NUL) become `_`; an empty, `.` or `..` name becomes `_`.
pub fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

// ---------------------------------------------------------------------------
// Path builders
// ---------------------------------------------------------------------------

pub fn gauge_forecast_path(data_dir: &Path, state: &str, lid: &str) -> PathBuf {
    let state = if state.trim().is_empty() {
        UNKNOWN_STATE.to_string()
    } else {
        path_component(state)
    };
    data_dir
        .join(WATER_DIR)
        .join(state)
        .join(format!("{}_forecast.csv", path_component(lid)))
}

/// Where a weather forecast is filed: a named city, or a bare grid point.
#[derive(Debug, Clone, PartialEq)]
pub enum WeatherSite {
    City {
        name: String,
        state: String,
        lat: f64,
        lon: f64,
    },
    Grid {
        lat: f64,
        lon: f64,
    },
}

impl WeatherSite {
    fn coords(&self) -> String {
        let (lat, lon) = match self {
            WeatherSite::City { lat, lon, .. } | WeatherSite::Grid { lat, lon } => (*lat, *lon),
        };
        format!("{}N_{}W", fmt_coord(lat), fmt_coord(lon))
    }

    /// Log/entity label for this site.
    pub fn label(&self) -> String {
        match self {
            WeatherSite::City { name, state, .. } => format!("{}, {}", name, state),
            WeatherSite::Grid { .. } => self.coords(),
        }
    }

    /// Directory holding this site's files for `year`.
    pub fn dir(&self, data_dir: &Path, year: i32) -> PathBuf {
        let base = data_dir.join(WEATHER_DIR);
        let site_dir = match self {
            WeatherSite::City { name, state, .. } => base
                .join(path_component(state))
                .join(format!("{}_{}", path_component(name), self.coords())),
            WeatherSite::Grid { .. } => base.join(self.coords()),
        };
        site_dir.join(year.to_string())
    }

    /// Per-variable append file.
    pub fn variable_path(&self, data_dir: &Path, variable: &str, year: i32) -> PathBuf {
        let stem = match self {
            WeatherSite::City { name, .. } => path_component(name),
            WeatherSite::Grid { .. } => self.coords(),
        };
        self.dir(data_dir, year)
            .join(format!("{}_{}_{}.csv", stem, path_component(variable), year))
    }

    /// One-file-per-request block layout.
    pub fn block_path(&self, data_dir: &Path, requested_at: &str, year: i32) -> PathBuf {
        self.dir(data_dir, year)
            .join(format!("{}_7DA_{}.csv", path_component(requested_at), self.coords()))
    }
}

/// `ERCOT_*` datasets share one ERCOT tree, split by dataset name below the year.
pub fn electricity_path(data_dir: &Path, iso: &str, year: i32, zone: &str) -> PathBuf {
    let base = data_dir.join(ELECTRICITY_DIR);
    let iso = path_component(iso);
    let dir = if iso.starts_with("ERCOT_") {
        base.join("ERCOT").join(year.to_string()).join(iso)
    } else {
        base.join(iso).join(year.to_string())
    };
    dir.join(format!("{}.csv", path_component(zone)))
}

pub fn snapshot_path(data_dir: &Path, category: &str, id: &str, date: NaiveDate) -> PathBuf {
    data_dir
        .join(path_component(category))
        .join(path_component(id))
        .join(format!("{:04}", date.year()))
        .join(format!("{:02}", date.month()))
        .join(format!("{:02}.csv", date.day()))
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Write `header` and `rows` to `path`, replacing any existing file.
pub fn write_table<S: AsRef<str>>(path: &Path, header: &[S], rows: &[Vec<String>]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::WriterBuilder::new().flexible(true).from_path(path)?;
    writer.write_record(header.iter().map(AsRef::<str>::as_ref))?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Append one row to `path`; the header is written only when the file is new.
///
/// Returns `true` when the file was created by this call.
pub fn append_row<S: AsRef<str>>(path: &Path, header: &[S], row: &[String]) -> Result<bool> {
    ensure_parent(path)?;
    let is_new = !path.exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
    if is_new {
        writer.write_record(header.iter().map(AsRef::<str>::as_ref))?;
    }
    writer.write_record(row)?;
    writer.flush()?;
    Ok(is_new)
}
