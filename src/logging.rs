/// Structured logging for the forecast harvester
///
/// Provides context-rich logging with data source and entity identifiers
/// (gauge LID, city, grid zone), timestamps, and severity levels. Installed
/// as the `log` facade's global logger, so `log::warn!` etc. from inside the
/// crate land in the same console/file sinks.

use chrono::Utc;
use serde::Deserialize;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use crate::model::BatchSummary;

const CRATE_TARGET: &str = "forecast_harvest";

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => LogLevel::Error,
            log::Level::Warn => LogLevel::Warning,
            log::Level::Info => LogLevel::Info,
            log::Level::Debug | log::Level::Trace => LogLevel::Debug,
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        }
    }
}

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// NOAA National Water Prediction Service (river gauges)
    Nwps,
    OpenMeteo,
    GridStatus,
    Snapshot,
    Storage,
    System,
}

impl DataSource {
    pub const ALL: [DataSource; 6] = [
        DataSource::Nwps,
        DataSource::OpenMeteo,
        DataSource::GridStatus,
        DataSource::Snapshot,
        DataSource::Storage,
        DataSource::System,
    ];

    /// Short label, also used as the `log` target.
    pub fn label(&self) -> &'static str {
        match self {
            DataSource::Nwps => "NWPS",
            DataSource::OpenMeteo => "OMET",
            DataSource::GridStatus => "GRID",
            DataSource::Snapshot => "SNAP",
            DataSource::Storage => "FS",
            DataSource::System => "SYS",
        }
    }

    fn is_label(target: &str) -> bool {
        DataSource::ALL.iter().any(|s| s.label() == target)
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - entity has no forecast product or was retired
    Expected,
    /// Unexpected failure - indicates service degradation or configuration issue
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<PathBuf>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    pub fn new(min_level: LogLevel, log_file: Option<PathBuf>, console_timestamps: bool) -> Self {
        Self {
            min_level,
            log_file,
            console_timestamps,
        }
    }

    fn append_to_file(path: &PathBuf, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        let target = metadata.target();
        LogLevel::from(metadata.level()) >= self.min_level
            && (DataSource::is_label(target) || target.starts_with(CRATE_TARGET))
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = LogLevel::from(record.level());
        let source = if DataSource::is_label(record.target()) {
            record.target()
        } else {
            DataSource::System.label()
        };
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let log_entry = format!("{} {} {} {}", timestamp, level, source, record.args());

        // Console output
        if self.console_timestamps {
            match level {
                LogLevel::Error => eprintln!("{}", log_entry),
                LogLevel::Warning => eprintln!("   {}", log_entry),
                LogLevel::Info => println!("   {}", record.args()),
                LogLevel::Debug => println!("   [DEBUG] {}", record.args()),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {} {}", source, record.args()),
                LogLevel::Warning => eprintln!("   ⚠ {} {}", source, record.args()),
                LogLevel::Info => println!("   {}", record.args()),
                LogLevel::Debug => {} // Skip debug in non-timestamp mode
            }
        }

        // File output
        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path.display(), e);
            }
        }
    }

    fn flush(&self) {}
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Install the global logger. Returns `false` if one was already installed.
pub fn init_logger(min_level: LogLevel, log_file: Option<PathBuf>, console_timestamps: bool) -> bool {
    let logger = Logger::new(min_level, log_file, console_timestamps);
    match log::set_boxed_logger(Box::new(logger)) {
        Ok(()) => {
            log::set_max_level(log::Level::from(min_level).to_level_filter());
            true
        }
        Err(_) => false,
    }
}

fn emit(level: LogLevel, source: DataSource, entity: Option<&str>, message: &str) {
    match entity {
        Some(id) => log::log!(target: source.label(), log::Level::from(level), "[{}]: {}", id, message),
        None => log::log!(target: source.label(), log::Level::from(level), "{}", message),
    }
}

/// Log a general informational message
pub fn info(source: DataSource, entity: Option<&str>, message: &str) {
    emit(LogLevel::Info, source, entity, message);
}

/// Log a warning message
pub fn warn(source: DataSource, entity: Option<&str>, message: &str) {
    emit(LogLevel::Warning, source, entity, message);
}

/// Log an error message
pub fn error(source: DataSource, entity: Option<&str>, message: &str) {
    emit(LogLevel::Error, source, entity, message);
}

/// Log a debug message
pub fn debug(source: DataSource, entity: Option<&str>, message: &str) {
    emit(LogLevel::Debug, source, entity, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a fetch failure from its error text.
pub fn classify_failure(error_message: &str) -> FailureType {
    // A 404 means the entity has no product at this endpoint (e.g. a gauge
    // without a stage/flow forecast); everything else HTTP-ish is the service.
    if error_message.contains("HTTP error: 404") {
        FailureType::Expected
    } else if error_message.contains("HTTP error")
        || error_message.contains("Request failed")
        || error_message.contains("timeout")
    {
        FailureType::Unexpected
    }
    // Parse errors suggest API changes or bugs
    else if error_message.contains("Parse error") {
        FailureType::Unexpected
    } else if error_message.contains("No data available") {
        FailureType::Unknown
    } else {
        FailureType::Unknown
    }
}

/// Log a data source failure with automatic classification
pub fn log_fetch_failure(
    source: DataSource,
    entity: &str,
    operation: &str,
    err: &dyn std::error::Error,
) {
    let error_msg = err.to_string();
    let failure_type = classify_failure(&error_msg);

    let message = format!("{} failed [{}]: {}", operation, failure_type, error_msg);

    match failure_type {
        FailureType::Expected => debug(source, Some(entity), &message),
        FailureType::Unexpected => error(source, Some(entity), &message),
        FailureType::Unknown => warn(source, Some(entity), &message),
    }
}

// ---------------------------------------------------------------------------
// Batch Summary Logging
// ---------------------------------------------------------------------------

/// Severity a batch summary is reported at.
pub fn summary_level(summary: &BatchSummary) -> LogLevel {
    if summary.failed == 0 {
        LogLevel::Info
    } else if summary.written == 0 {
        LogLevel::Error
    } else {
        LogLevel::Warning
    }
}

/// Log a summary of a harvest batch
pub fn log_batch_summary(source: DataSource, label: &str, summary: &BatchSummary) {
    let message = format!(
        "{} complete: {}/{} written, {} skipped, {} failed",
        label,
        summary.written,
        summary.total(),
        summary.skipped,
        summary.failed
    );
    emit(summary_level(summary), source, None, &message);
}
