use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::{Parser, Subcommand};

use forecast_harvest::config::{self, Config, WeatherLayout};
use forecast_harvest::harvest;
use forecast_harvest::ingest::http;
use forecast_harvest::logging::{self, DataSource};
use forecast_harvest::map;
use forecast_harvest::model::Result;
use reqwest::blocking::Client;

#[derive(Parser)]
#[command(version, about, long_about = None)]
/// Harvests river, weather and grid load forecasts into CSV files
struct Cli {
    /// Configuration file; defaults apply when it does not exist
    #[arg(long, default_value = "harvest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the continuous-forecast gauge list
    Discover,
    /// Harvest stage/flow forecasts for every listed gauge
    Gauges,
    /// Harvest Open-Meteo forecasts for the city list
    Weather {
        /// Use an N×N lattice over the contiguous US instead of the city list
        #[arg(long, value_name = "N")]
        grid: Option<usize>,
        /// One CSV per request holding every variable
        #[arg(long)]
        block: bool,
    },
    /// Harvest GridStatus load forecasts
    Electricity,
    /// Capture the configured JSON snapshots
    Snapshot,
    /// Render the interactive map page
    Map,
    /// discover, gauges, weather, electricity and map in order
    All,
}

/// Logs a failed stage of `all` and remembers its name.
fn record_stage<T>(stage: &'static str, result: Result<T>, failed: &mut Vec<&'static str>) {
    if let Err(e) = result {
        logging::error(DataSource::System, Some(stage), &format!("stage failed: {}", e));
        failed.push(stage);
    }
}

/// Runs every stage of `all` even when an earlier one fails; returns the
/// names of the stages that failed.
fn run_all(config: &Config, client: &Client) -> Result<Vec<&'static str>> {
    let pool = harvest::worker_pool(config.fetch.workers)?;
    let mut failed = Vec::new();

    record_stage("discover", harvest::run_discover(config, client, &pool), &mut failed);
    if !failed.is_empty() {
        logging::warn(
            DataSource::Nwps,
            None,
            "gauge discovery failed, harvesting the existing gauge list",
        );
    }
    record_stage(
        "gauges",
        harvest::run_gauge_forecasts(config, client, &pool, Utc::now()),
        &mut failed,
    );
    record_stage(
        "weather",
        harvest::run_weather(config, client, None, config.openmeteo.layout),
        &mut failed,
    );
    record_stage(
        "electricity",
        harvest::run_electricity(config, client, Utc::now()),
        &mut failed,
    );
    record_stage("map", map::render_map(&config.paths), &mut failed);
    Ok(failed)
}

fn run(command: &Commands, config: &Config) -> Result<ExitCode> {
    let client = http::build_client(&config.fetch)?;

    match command {
        Commands::Discover => {
            let pool = harvest::worker_pool(config.fetch.workers)?;
            harvest::run_discover(config, &client, &pool)?;
        }
        Commands::Gauges => {
            let pool = harvest::worker_pool(config.fetch.workers)?;
            harvest::run_gauge_forecasts(config, &client, &pool, Utc::now())?;
        }
        Commands::Weather { grid, block } => {
            let layout = if *block { WeatherLayout::Block } else { config.openmeteo.layout };
            harvest::run_weather(config, &client, *grid, layout)?;
        }
        Commands::Electricity => {
            harvest::run_electricity(config, &client, Utc::now())?;
        }
        Commands::Snapshot => {
            harvest::run_snapshots(config, &client, Utc::now())?;
        }
        Commands::Map => {
            map::render_map(&config.paths)?;
        }
        Commands::All => {
            let failed = run_all(config, &client)?;
            if !failed.is_empty() {
                logging::error(
                    DataSource::System,
                    None,
                    &format!("failed stages: {}", failed.join(", ")),
                );
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config::load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    logging::init_logger(
        config.logging.level,
        config.logging.file.clone(),
        config.logging.console_timestamps,
    );

    match run(&cli.command, &config) {
        Ok(code) => code,
        Err(e) => {
            logging::error(DataSource::System, None, &e.to_string());
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forecast_harvest::model::HarvestError;

    #[test]
    fn test_record_stage_keeps_going_after_failure() {
        let mut failed = Vec::new();
        record_stage("discover", Err::<usize, _>(HarvestError::Http(503)), &mut failed);
        record_stage("gauges", Ok(3usize), &mut failed);
        record_stage("map", Err::<(), _>(HarvestError::NoData("koppen".into())), &mut failed);
        assert_eq!(failed, vec!["discover", "map"]);
    }
}
