/// Harvester configuration.
///
/// Settings come from a TOML file (`harvest.toml` by default). Every field
/// has a default, so a partial file (or none at all) is valid. Secrets are
/// never read from the file; they come from the environment, optionally
/// populated from a `.env` file.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::logging::LogLevel;
use crate::model::{HarvestError, Result};

/// Environment variable holding the GridStatus API key.
pub const GRIDSTATUS_KEY_VAR: &str = "GRIDSTATUS_API_KEY";

/// Upper bound on a single retry sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Paths {
    /// Root of the CSV tree.
    pub data_dir: PathBuf,
    /// Continuous-forecast gauge list; relative paths resolve against `data_dir`.
    pub gauge_list: PathBuf,
    pub city_list: PathBuf,
    pub map_template: PathBuf,
    pub koppen_grid: PathBuf,
    pub map_output: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            gauge_list: PathBuf::from("water/continuous_forecast_gauges.csv"),
            city_list: PathBuf::from("scripts/county_weighted_city_with_hydro_final.csv"),
            map_template: PathBuf::from("scripts/map-template-leaflet.html"),
            koppen_grid: PathBuf::from("scripts/koppen_grid.json"),
            map_output: PathBuf::from("interactive_city_map_leaflet3_search.html"),
        }
    }
}

impl Paths {
    pub fn gauge_list_path(&self) -> PathBuf {
        if self.gauge_list.is_absolute() {
            self.gauge_list.clone()
        } else {
            self.data_dir.join(&self.gauge_list)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: LogLevel,
    /// Append-only log file, in addition to the console.
    pub file: Option<PathBuf>,
    pub console_timestamps: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
            console_timestamps: false,
        }
    }
}

/// HTTP and worker pool settings shared by every harvester.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Fetch {
    /// Fixed size of the worker pool used for fan-out requests.
    pub workers: usize,
    pub timeout_secs: u64,
    /// Extra attempts after the first, for transport errors and 5xx/429.
    pub retries: u32,
    /// Base backoff; attempt `n` sleeps `backoff_secs * 2^n`, capped at
    /// `MAX_BACKOFF`.
    pub backoff_secs: f64,
    pub user_agent: String,
}

impl Default for Fetch {
    fn default() -> Self {
        Self {
            workers: 16,
            timeout_secs: 20,
            retries: 3,
            backoff_secs: 0.2,
            user_agent: format!("forecast_harvest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Fetch {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = self.backoff_secs.max(0.0) * 2f64.powi(attempt.min(64) as i32);
        Duration::try_from_secs_f64(secs).map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
    }
}

/// Which NWPS stage/flow field feeds the gauge forecast series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastField {
    /// Stage, usually feet.
    Primary,
    /// Flow, usually kcfs.
    Secondary,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Nwps {
    pub base_url: String,
    pub field: ForecastField,
}

impl Default for Nwps {
    fn default() -> Self {
        Self {
            base_url: "https://api.water.noaa.gov/nwps/v1".to_string(),
            field: ForecastField::Secondary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherLayout {
    /// One appended CSV per variable per location.
    PerVariable,
    /// One CSV per request holding every variable.
    Block,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenMeteo {
    pub base_url: String,
    pub variables: Vec<String>,
    pub layout: WeatherLayout,
    pub per_minute_limit: usize,
    pub per_hour_limit: usize,
}

impl Default for OpenMeteo {
    fn default() -> Self {
        Self {
            base_url: "https://api.open-meteo.com/v1".to_string(),
            variables: [
                "temperature_2m",
                "wind_speed_10m",
                "relative_humidity_2m",
                "dew_point_2m",
                "precipitation_probability",
                "precipitation",
                "surface_pressure",
                "cloud_cover",
                "wind_direction_10m",
                "evapotranspiration",
                "shortwave_radiation",
            ]
            .iter()
            .map(|v| v.to_string())
            .collect(),
            layout: WeatherLayout::PerVariable,
            per_minute_limit: 600,
            per_hour_limit: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GridStatus {
    pub base_url: String,
    pub query_limit: u32,
    /// Forecast window end, in days after today.
    pub horizon_days: i64,
    /// ISO name -> dataset id.
    pub datasets: BTreeMap<String, String>,
}

impl Default for GridStatus {
    fn default() -> Self {
        let datasets = [
            ("NE", "isone_load_forecast_hourly"),
            ("NY", "nyiso_zonal_load_forecast_hourly"),
            ("MISO", "miso_load_forecast_mid_term"),
            ("ERCOT_Zone", "ercot_load_forecast_by_forecast_zone"),
            ("ERCOT_Weather", "ercot_load_forecast_by_weather_zone"),
            ("SPP", "spp_load_forecast_mid_term"),
            ("PJM", "pjm_load_forecast_hourly"),
        ]
        .iter()
        .map(|(iso, ds)| (iso.to_string(), ds.to_string()))
        .collect();

        Self {
            base_url: "https://api.gridstatus.io/v1".to_string(),
            query_limit: 10_000,
            horizon_days: 8,
            datasets,
        }
    }
}

/// A generic JSON endpoint captured as a daily CSV.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotSource {
    pub category: String,
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: Paths,
    pub logging: Logging,
    pub fetch: Fetch,
    pub nwps: Nwps,
    pub openmeteo: OpenMeteo,
    pub gridstatus: GridStatus,
    pub snapshots: Vec<SnapshotSource>,
}

impl Config {
    fn validate(self) -> Result<Self> {
        if self.fetch.workers == 0 {
            return Err(HarvestError::Config("fetch.workers must be at least 1".into()));
        }
        if self.openmeteo.per_minute_limit < 2 || self.openmeteo.per_hour_limit < 2 {
            return Err(HarvestError::Config(
                "openmeteo rate limits must be at least 2".into(),
            ));
        }
        if self.openmeteo.variables.is_empty() {
            return Err(HarvestError::Config("openmeteo.variables is empty".into()));
        }
        Ok(self)
    }
}

/// Parses configuration from TOML text.
pub fn parse_config(toml_text: &str) -> Result<Config> {
    let config: Config =
        toml::from_str(toml_text).map_err(|e| HarvestError::Config(e.to_string()))?;
    config.validate()
}

/// Loads the configuration file at `path`.
///
/// A missing file yields the defaults; an unreadable or invalid one is an
/// error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Config::default().validate();
    }
    let text = fs::read_to_string(path)?;
    parse_config(&text)
}

/// Reads the GridStatus API key from the environment (after `.env`).
pub fn gridstatus_api_key() -> Result<String> {
    dotenv::dotenv().ok();
    match env::var(GRIDSTATUS_KEY_VAR) {
        Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(HarvestError::MissingCredential(GRIDSTATUS_KEY_VAR.to_string())),
    }
}
