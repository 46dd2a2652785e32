/// Forecast harvester: river gauge stage/flow, gridded weather and grid load
/// forecasts pulled from public APIs into a dated CSV tree.

pub mod analysis;
pub mod cities;
pub mod config;
pub mod gauges;
pub mod harvest;
pub mod ingest;
pub mod logging;
pub mod map;
pub mod model;
pub mod storage;
