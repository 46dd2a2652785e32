/// Harvest runners
///
/// One `run_*` function per harvester. Each loads its targets, fetches every
/// entity (on the worker pool where the upstream allows it), reshapes the
/// payload into CSV rows and writes them under `data_dir`. Every entity ends
/// as an `EntityOutcome`; only setup failures (unreadable target list, pool
/// construction) are returned as errors.

use std::path::Path;
use std::thread;

use chrono::{DateTime, Duration as ChronoDuration, Datelike, Utc};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use reqwest::blocking::Client;

use crate::analysis::series::{self, format_slot, hourly_header};
use crate::cities;
use crate::config::{self, Config, ForecastField, WeatherLayout};
use crate::gauges;
use crate::ingest::gridstatus::{self, LoadForecast};
use crate::ingest::nwps::{self, StageFlowForecast};
use crate::ingest::openmeteo::{self, WeatherForecast};
use crate::ingest::snapshot;
use crate::logging::{self, DataSource};
use crate::model::{BatchSummary, EntityOutcome, GaugeRecord, HarvestError, Result};
use crate::storage::{self, WeatherSite};

/// Timestamp format for weather and block rows, e.g. `2024-05-01 13:00:00+00:00`.
pub const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S+00:00";

pub fn format_stamp(dt: DateTime<Utc>) -> String {
    dt.format(STAMP_FORMAT).to_string()
}

/// Fixed-size pool shared by every fan-out in a run.
pub fn worker_pool(workers: usize) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("harvest-{}", i))
        .build()
        .map_err(|e| HarvestError::Config(format!("cannot build worker pool: {}", e)))
}

/// Turn one entity's result into its outcome, logging failures.
fn settle(
    source: DataSource,
    entity: &str,
    operation: &str,
    result: Result<EntityOutcome>,
) -> EntityOutcome {
    match result {
        Ok(EntityOutcome::Skipped(reason)) => {
            logging::info(source, Some(entity), &format!("skipped: {}", reason));
            EntityOutcome::Skipped(reason)
        }
        Ok(outcome) => outcome,
        Err(HarvestError::NoData(what)) => {
            logging::info(source, Some(entity), &format!("skipped: no data for {}", what));
            EntityOutcome::Skipped(format!("no data for {}", what))
        }
        Err(e) => {
            logging::log_fetch_failure(source, entity, operation, &e);
            EntityOutcome::Failed(e)
        }
    }
}

fn finish(source: DataSource, label: &str, outcomes: &[EntityOutcome]) -> BatchSummary {
    let summary: BatchSummary = outcomes.iter().collect();
    logging::log_batch_summary(source, label, &summary);
    summary
}

// ---------------------------------------------------------------------------
// Gauge discovery
// ---------------------------------------------------------------------------

/// Rebuild and write the continuous-forecast gauge list; returns its length.
pub fn run_discover(config: &Config, client: &Client, pool: &ThreadPool) -> Result<usize> {
    let gauge_list = gauges::discover_continuous_gauges(pool, client, &config.nwps, &config.fetch)?;
    let path = config.paths.gauge_list_path();
    gauges::write_gauge_list(&path, &gauge_list)?;
    logging::info(
        DataSource::Storage,
        None,
        &format!("gauge list written to {}", path.display()),
    );
    Ok(gauge_list.len())
}

// ---------------------------------------------------------------------------
// Gauge forecasts
// ---------------------------------------------------------------------------

/// The data row for a gauge forecast file, or `None` when no observation has
/// a usable timestamp.
pub fn gauge_forecast_row(
    forecast: &StageFlowForecast,
    field: ForecastField,
    now: DateTime<Utc>,
) -> Option<Vec<String>> {
    let series = series::normalize(&forecast.observations(field))?;
    Some(series::forecast_row(&series, forecast.issued(), now))
}

/// Write one gauge's forecast file, replacing the previous run's.
///
/// Skipped, with no file touched, when no observation has a usable timestamp.
pub fn write_gauge_forecast(
    data_dir: &Path,
    gauge: &GaugeRecord,
    forecast: &StageFlowForecast,
    field: ForecastField,
    now: DateTime<Utc>,
) -> Result<EntityOutcome> {
    let row = match gauge_forecast_row(forecast, field, now) {
        Some(row) => row,
        None => return Ok(EntityOutcome::Skipped("no valid forecast timestamps".into())),
    };
    let path = storage::gauge_forecast_path(data_dir, &gauge.state_id, &gauge.lid);
    storage::write_table(&path, &series::forecast_header(), &[row])?;
    logging::debug(DataSource::Nwps, Some(&gauge.lid), &format!("wrote {}", path.display()));
    Ok(EntityOutcome::Written(path))
}

fn harvest_gauge(
    client: &Client,
    config: &Config,
    gauge: &GaugeRecord,
    now: DateTime<Utc>,
) -> Result<EntityOutcome> {
    let forecast =
        nwps::fetch_stageflow_forecast(client, &config.nwps, &config.fetch, &gauge.lid)?;
    write_gauge_forecast(&config.paths.data_dir, gauge, &forecast, config.nwps.field, now)
}

/// Harvest the stage/flow forecast of every gauge in the gauge list.
pub fn run_gauge_forecasts(
    config: &Config,
    client: &Client,
    pool: &ThreadPool,
    now: DateTime<Utc>,
) -> Result<BatchSummary> {
    let gauge_list = gauges::load_gauge_list(&config.paths.gauge_list_path())?;
    logging::info(
        DataSource::Nwps,
        None,
        &format!("harvesting forecasts for {} gauges", gauge_list.len()),
    );

    let outcomes: Vec<EntityOutcome> = pool.install(|| {
        gauge_list
            .par_iter()
            .map(|gauge| {
                settle(
                    DataSource::Nwps,
                    &gauge.lid,
                    "stageflow forecast",
                    harvest_gauge(client, config, gauge, now),
                )
            })
            .collect()
    });
    Ok(finish(DataSource::Nwps, "gauge forecasts", &outcomes))
}

// ---------------------------------------------------------------------------
// Weather
// ---------------------------------------------------------------------------

/// Coordinates sent to Open-Meteo. Grid longitudes are degrees west, so
/// they are negated for the request.
pub fn request_coords(site: &WeatherSite) -> (f64, f64) {
    match site {
        WeatherSite::City { lat, lon, .. } => (*lat, *lon),
        WeatherSite::Grid { lat, lon } => (*lat, -*lon),
    }
}

/// One appended row per variable: `[requested_at, first_hour, v1..vN]`.
pub fn weather_variable_rows(
    forecast: &WeatherForecast,
    requested_at: &str,
) -> Vec<(String, Vec<String>)> {
    let first_hour = forecast.first_hour().map(format_stamp).unwrap_or_default();
    forecast
        .variables
        .iter()
        .map(|(name, values)| {
            let mut row = Vec::with_capacity(values.len() + 2);
            row.push(requested_at.to_string());
            row.push(first_hour.clone());
            row.extend(values.iter().map(|v| format_slot(*v)));
            (name.clone(), row)
        })
        .collect()
}

/// Block layout: `date` plus one column per variable, one row per hour.
pub fn weather_block_table(forecast: &WeatherForecast) -> (Vec<String>, Vec<Vec<String>>) {
    let mut header = vec!["date".to_string()];
    header.extend(forecast.variables.iter().map(|(name, _)| name.clone()));

    let rows = forecast
        .times
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let mut row = vec![format_stamp(*t)];
            row.extend(forecast.variables.iter().map(|(_, values)| format_slot(values[i])));
            row
        })
        .collect();
    (header, rows)
}

fn harvest_weather_site(
    client: &Client,
    config: &Config,
    site: &WeatherSite,
    layout: WeatherLayout,
    requested: DateTime<Utc>,
) -> Result<EntityOutcome> {
    let (lat, lon) = request_coords(site);
    let forecast = openmeteo::fetch_forecast(client, &config.openmeteo, &config.fetch, lat, lon)?;
    let requested_at = format_stamp(requested);
    let year = requested.year();
    let data_dir = &config.paths.data_dir;

    match layout {
        WeatherLayout::PerVariable => {
            let header = hourly_header(forecast.hours());
            for (variable, row) in weather_variable_rows(&forecast, &requested_at) {
                let path = site.variable_path(data_dir, &variable, year);
                storage::append_row(&path, &header, &row)?;
            }
            Ok(EntityOutcome::Written(site.dir(data_dir, year)))
        }
        WeatherLayout::Block => {
            let path = site.block_path(data_dir, &requested_at, year);
            let (header, rows) = weather_block_table(&forecast);
            storage::write_table(&path, &header, &rows)?;
            Ok(EntityOutcome::Written(path))
        }
    }
}

/// Weather targets: the city list, or an `n×n` grid when `grid` is given.
pub fn weather_sites(config: &Config, grid: Option<usize>) -> Result<Vec<WeatherSite>> {
    match grid {
        Some(n) => Ok(cities::grid_points(n)
            .into_iter()
            .map(|(lat, lon)| WeatherSite::Grid { lat, lon })
            .collect()),
        None => Ok(cities::load_cities(&config.paths.city_list)?
            .into_iter()
            .map(|c| WeatherSite::City {
                name: c.city,
                state: c.state_id,
                lat: c.lat,
                lon: c.lng,
            })
            .collect()),
    }
}

/// Harvest Open-Meteo forecasts, one site at a time within the rate budget.
pub fn run_weather(
    config: &Config,
    client: &Client,
    grid: Option<usize>,
    layout: WeatherLayout,
) -> Result<BatchSummary> {
    let sites = weather_sites(config, grid)?;
    logging::info(
        DataSource::OpenMeteo,
        None,
        &format!("harvesting weather for {} sites", sites.len()),
    );

    let mut outcomes = Vec::with_capacity(sites.len());
    for (i, site) in sites.iter().enumerate() {
        let pause = openmeteo::pause_before(
            i,
            config.openmeteo.per_minute_limit,
            config.openmeteo.per_hour_limit,
        );
        if !pause.is_zero() {
            logging::info(
                DataSource::OpenMeteo,
                None,
                &format!("rate budget reached after {} requests, pausing {}s", i, pause.as_secs()),
            );
            thread::sleep(pause);
        }

        let label = site.label();
        let result = harvest_weather_site(client, config, site, layout, Utc::now());
        outcomes.push(settle(DataSource::OpenMeteo, &label, "forecast", result));
    }
    Ok(finish(DataSource::OpenMeteo, "weather forecasts", &outcomes))
}

// ---------------------------------------------------------------------------
// Electricity
// ---------------------------------------------------------------------------

/// One appended row per zone: `[today, first interval start, v1..vN]`.
pub fn electricity_rows(forecast: &LoadForecast, today: &str) -> Vec<(String, Vec<String>)> {
    let first_interval = forecast.first_interval_start.clone().unwrap_or_default();
    forecast
        .zones
        .iter()
        .map(|(zone, values)| {
            let mut row = Vec::with_capacity(values.len() + 2);
            row.push(today.to_string());
            row.push(first_interval.clone());
            row.extend(values.iter().map(|v| format_slot(*v)));
            (zone.clone(), row)
        })
        .collect()
}

fn harvest_iso(
    client: &Client,
    config: &Config,
    api_key: &str,
    iso: &str,
    dataset: &str,
    now: DateTime<Utc>,
) -> Result<EntityOutcome> {
    let today = now.date_naive();
    let end = today + ChronoDuration::days(config.gridstatus.horizon_days);
    let forecast = gridstatus::fetch_load_forecast(
        client,
        &config.gridstatus,
        &config.fetch,
        api_key,
        dataset,
        today,
        end,
    )?;

    let today_str = today.format("%Y-%m-%d").to_string();
    let mut last_path = None;
    for (zone, row) in electricity_rows(&forecast, &today_str) {
        let header = hourly_header(row.len() - 2);
        let path = storage::electricity_path(&config.paths.data_dir, iso, now.year(), &zone);
        storage::append_row(&path, &header, &row)?;
        last_path = Some(path);
    }
    match last_path.and_then(|p| p.parent().map(|d| d.to_path_buf())) {
        Some(dir) => Ok(EntityOutcome::Written(dir)),
        None => Ok(EntityOutcome::Skipped("no zones".into())),
    }
}

/// Harvest every configured GridStatus load forecast.
///
/// Without an API key the whole harvest is skipped with an error log.
pub fn run_electricity(
    config: &Config,
    client: &Client,
    now: DateTime<Utc>,
) -> Result<BatchSummary> {
    let api_key = match config::gridstatus_api_key() {
        Ok(key) => key,
        Err(e) => {
            logging::error(
                DataSource::GridStatus,
                None,
                &format!("electricity harvest skipped: {}", e),
            );
            return Ok(BatchSummary::default());
        }
    };

    let outcomes: Vec<EntityOutcome> = config
        .gridstatus
        .datasets
        .iter()
        .map(|(iso, dataset)| {
            settle(
                DataSource::GridStatus,
                iso,
                "load forecast",
                harvest_iso(client, config, &api_key, iso, dataset, now),
            )
        })
        .collect();
    Ok(finish(DataSource::GridStatus, "electricity forecasts", &outcomes))
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Capture every configured snapshot endpoint as today's CSV.
pub fn run_snapshots(config: &Config, client: &Client, now: DateTime<Utc>) -> Result<BatchSummary> {
    let outcomes: Vec<EntityOutcome> = config
        .snapshots
        .iter()
        .map(|source| {
            let entity = format!("{}/{}", source.category, source.id);
            let result = snapshot::fetch_snapshot(client, &config.fetch, source).and_then(|table| {
                let path = storage::snapshot_path(
                    &config.paths.data_dir,
                    &source.category,
                    &source.id,
                    now.date_naive(),
                );
                storage::write_table(&path, &table.header, &table.rows)?;
                Ok(EntityOutcome::Written(path))
            });
            settle(DataSource::Snapshot, &entity, "snapshot", result)
        })
        .collect();
    Ok(finish(DataSource::Snapshot, "snapshots", &outcomes))
}
