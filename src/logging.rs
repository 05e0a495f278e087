/// Structured logging for the blocking pipeline
///
/// Provides context-rich logging with stage tags, optional season scope,
/// timestamps, and severity levels. Supports both console output and
/// file-based logging for long batch runs.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use crate::model::{BlockingError, ErrorKind};

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
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

impl LogLevel {
    /// Parses a level name from configuration ("debug", "info", "warn", "error").
    pub fn parse(name: &str) -> Option<LogLevel> {
        match name.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Ingest,
    Cbl,
    Ibl,
    Gibl,
    Track,
    Pipeline,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Config => write!(f, "CONFIG"),
            Stage::Ingest => write!(f, "INGEST"),
            Stage::Cbl => write!(f, "CBL"),
            Stage::Ibl => write!(f, "IBL"),
            Stage::Gibl => write!(f, "GIBL"),
            Stage::Track => write!(f, "TRACK"),
            Stage::Pipeline => write!(f, "PIPE"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };

        if let Ok(mut slot) = LOGGER.lock() {
            *slot = Some(logger);
        }
    }

    fn log(&self, level: LogLevel, stage: Stage, scope: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");

        let scope_part = scope.map(|s| format!(" [{}]", s)).unwrap_or_default();
        let log_entry = format!(
            "{} {} {}{}: {}",
            timestamp, level, stage, scope_part, message
        );

        // Console output
        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", log_entry),
                LogLevel::Info | LogLevel::Debug => println!("{}", log_entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", stage, scope_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", stage, scope_part, message),
                LogLevel::Info => println!("   {}{}: {}", stage, scope_part, message),
                LogLevel::Debug => {} // Skip debug in non-timestamp mode
            }
        }

        // File output
        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn dispatch(level: LogLevel, stage: Stage, scope: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, stage, scope, message);
        }
    }
}

/// Log a general informational message
pub fn info(stage: Stage, scope: Option<&str>, message: &str) {
    dispatch(LogLevel::Info, stage, scope, message);
}

/// Log a warning message
pub fn warn(stage: Stage, scope: Option<&str>, message: &str) {
    dispatch(LogLevel::Warning, stage, scope, message);
}

/// Log an error message
pub fn error(stage: Stage, scope: Option<&str>, message: &str) {
    dispatch(LogLevel::Error, stage, scope, message);
}

/// Log a debug message
pub fn debug(stage: Stage, scope: Option<&str>, message: &str) {
    dispatch(LogLevel::Debug, stage, scope, message);
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Level a failure of the given kind is reported at.
///
/// Configuration and shape problems mean the run itself is wrong; missing or
/// misaligned data may just be an incomplete archive.
pub fn failure_level(kind: ErrorKind) -> LogLevel {
    match kind {
        ErrorKind::Configuration | ErrorKind::Shape => LogLevel::Error,
        ErrorKind::DataAvailability => LogLevel::Warning,
    }
}

/// Log a stage failure with its classification
pub fn log_stage_failure(stage: Stage, operation: &str, err: &BlockingError) {
    let kind = err.kind();
    let message = format!("{} failed [{}]: {}", operation, kind, err);
    dispatch(failure_level(kind), stage, None, &message);
}

// ---------------------------------------------------------------------------
// Stage Summary Logging
// ---------------------------------------------------------------------------

/// Log how many candidates a stage accepted out of those it examined
pub fn log_stage_summary(stage: Stage, scope: Option<&str>, total: usize, accepted: usize) {
    let rejected = total.saturating_sub(accepted);
    let message = format!(
        "{}/{} candidates accepted, {} rejected",
        accepted, total, rejected
    );

    if accepted == 0 && total > 0 {
        warn(stage, scope, &message);
    } else {
        info(stage, scope, &message);
    }
}
