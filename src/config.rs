//! Blocking configuration loading.
//!
//! Options are read from a TOML file with a `[blocking]` table whose keys keep
//! the upper-case names used by the verification driver (`BLOCKING_VAR`,
//! `LAT_DELTA`, `IBL_IN_GIBL`, ...) and an optional `[logging]` table.
//! Everything is validated up front so that configuration errors surface
//! before any field is processed.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

use crate::analysis::ibl::MethodTag;
use crate::calendar::{SeasonCalendar, parse_valid_date};
use crate::logging::{self, LogLevel, Stage};
use crate::model::{BlockingError, Result};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_VAR: &str = "BLOCKING_CONFIG";

/// Configuration file used when `BLOCKING_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "./blocking.toml";

// ---------------------------------------------------------------------------
// File layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfigFile {
    pub blocking: BlockingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Options consumed by the blocking pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct BlockingConfig {
    /// Name of the anomaly variable in the input grids.
    pub blocking_var: String,
    /// Basis for the CBL longitude-smoothing half-width.
    #[serde(default = "default_smoothing_pts")]
    pub smoothing_pts: usize,
    /// Comma-separated latitude offsets in degrees, e.g. "-5,0,5".
    #[serde(default = "default_lat_delta")]
    pub lat_delta: String,
    /// Largest longitude gap bridged inside a GIBL. Defaults to IBL_IN_GIBL / 2.
    #[serde(default)]
    pub ibl_dist: Option<usize>,
    /// Minimum number of longitudes in a GIBL.
    #[serde(default = "default_ibl_in_gibl")]
    pub ibl_in_gibl: usize,
    /// Shared longitudes required to link GIBLs on consecutive days.
    #[serde(default = "default_gibl_overlap")]
    pub gibl_overlap: usize,
    /// Minimum number of linked days for an accepted block.
    #[serde(default = "default_block_time")]
    pub block_time: usize,
    /// Largest allowed centroid drift from the first day, in degrees.
    #[serde(default = "default_block_travel")]
    pub block_travel: f64,
    #[serde(default = "default_block_method")]
    pub block_method: String,
    /// First valid time of the analysis window, `%Y%m%d%H`.
    pub valid_beg: String,
    /// Last valid time of the analysis window, `%Y%m%d%H`.
    pub valid_end: String,
    /// Separate window for the CBL climatology; falls back to VALID_BEG/END.
    #[serde(default)]
    pub cbl_valid_beg: Option<String>,
    #[serde(default)]
    pub cbl_valid_end: Option<String>,
    /// Months of the season in order, starting with the month that opens it.
    #[serde(default = "default_season_months")]
    pub season_months: Vec<u32>,
    /// Reuse an externally supplied CBL instead of estimating one.
    #[serde(default)]
    pub use_cbl_obs: bool,
}

fn default_smoothing_pts() -> usize {
    9
}

fn default_lat_delta() -> String {
    "-5,0,5".to_string()
}

fn default_ibl_in_gibl() -> usize {
    15
}

fn default_gibl_overlap() -> usize {
    10
}

fn default_block_time() -> usize {
    5
}

fn default_block_travel() -> f64 {
    45.0
}

fn default_block_method() -> String {
    "PH".to_string()
}

fn default_season_months() -> Vec<u32> {
    vec![12, 1, 2]
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub console_timestamps: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            console_timestamps: false,
        }
    }
}

impl LoggingConfig {
    /// Installs the global logger described by this section.
    pub fn init(&self) -> Result<()> {
        let level = LogLevel::parse(&self.level).ok_or_else(|| {
            BlockingError::invalid("logging.level", format!("unknown level '{}'", self.level))
        })?;
        logging::init_logger(level, self.file.as_deref(), self.console_timestamps);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Reads and validates a configuration file.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let contents = fs::read_to_string(path)?;
    let config = parse_config(&contents)?;
    logging::debug(
        Stage::Config,
        None,
        &format!("Loaded configuration from {}", path.display()),
    );
    Ok(config)
}

/// Parses and validates configuration text.
pub fn parse_config(contents: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(contents)?;
    config.blocking.validate()?;
    Ok(config)
}

/// Loads `.env` if present, then reads the file named by `BLOCKING_CONFIG`.
pub fn load_config_from_env() -> Result<ConfigFile> {
    dotenv::dotenv().ok();
    let path = env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_config(Path::new(&path))
}

// ---------------------------------------------------------------------------
// Derived values and validation
// ---------------------------------------------------------------------------

impl BlockingConfig {
    /// Checks every option; returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.blocking_var.trim().is_empty() {
            return Err(BlockingError::invalid("BLOCKING_VAR", "must not be empty"));
        }
        if self.smoothing_pts == 0 {
            return Err(BlockingError::invalid("SMOOTHING_PTS", "must be at least 1"));
        }
        if self.ibl_in_gibl == 0 {
            return Err(BlockingError::invalid("IBL_IN_GIBL", "must be at least 1"));
        }
        if self.ibl_dist == Some(0) {
            return Err(BlockingError::invalid("IBL_DIST", "must be at least 1"));
        }
        if self.ibl_dist.is_none() && self.gap_threshold() < 1.0 {
            return Err(BlockingError::invalid(
                "IBL_IN_GIBL",
                format!(
                    "must be at least 2 when IBL_DIST is unset (gap threshold {})",
                    self.gap_threshold()
                ),
            ));
        }
        if self.block_time == 0 {
            return Err(BlockingError::invalid("BLOCK_TIME", "must be at least 1"));
        }
        if !self.block_travel.is_finite() || self.block_travel < 0.0 {
            return Err(BlockingError::invalid(
                "BLOCK_TRAVEL",
                format!("must be a non-negative number of degrees, got {}", self.block_travel),
            ));
        }
        self.lat_deltas()?;
        self.method()?;
        self.calendar()?;
        self.cbl_calendar()?;
        Ok(())
    }

    /// Latitude offsets parsed from `LAT_DELTA`.
    pub fn lat_deltas(&self) -> Result<Vec<f64>> {
        let offsets = self
            .lat_delta
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| {
                        BlockingError::invalid("LAT_DELTA", format!("'{}' is not a number", part))
                    })
            })
            .collect::<Result<Vec<f64>>>()?;
        if offsets.is_empty() {
            return Err(BlockingError::invalid("LAT_DELTA", "no offsets given"));
        }
        Ok(offsets)
    }

    pub fn method(&self) -> Result<MethodTag> {
        MethodTag::parse(&self.block_method)
    }

    /// Largest longitude gap (in grid steps) bridged when grouping IBLs.
    pub fn gap_threshold(&self) -> f64 {
        match self.ibl_dist {
            Some(dist) => dist as f64,
            None => self.ibl_in_gibl as f64 / 2.0,
        }
    }

    pub fn valid_window(&self) -> Result<(NaiveDate, NaiveDate)> {
        window("VALID_BEG", &self.valid_beg, "VALID_END", &self.valid_end)
    }

    pub fn cbl_window(&self) -> Result<(NaiveDate, NaiveDate)> {
        match (&self.cbl_valid_beg, &self.cbl_valid_end) {
            (Some(beg), Some(end)) => window("CBL_VALID_BEG", beg, "CBL_VALID_END", end),
            (None, None) => self.valid_window(),
            _ => Err(BlockingError::invalid(
                "CBL_VALID_BEG",
                "CBL_VALID_BEG and CBL_VALID_END must be set together",
            )),
        }
    }

    /// Season calendar for the daily (IBL) window.
    pub fn calendar(&self) -> Result<SeasonCalendar> {
        let (start, end) = self.valid_window()?;
        SeasonCalendar::new(self.season_months.clone(), start, end)
    }

    /// Season calendar for the CBL climatology window.
    pub fn cbl_calendar(&self) -> Result<SeasonCalendar> {
        let (start, end) = self.cbl_window()?;
        SeasonCalendar::new(self.season_months.clone(), start, end)
    }
}

fn window(beg_name: &str, beg: &str, end_name: &str, end: &str) -> Result<(NaiveDate, NaiveDate)> {
    let start = parse_valid_date(beg)
        .map_err(|_| BlockingError::invalid(beg_name, format!("'{}' is not a valid time", beg)))?;
    let stop = parse_valid_date(end)
        .map_err(|_| BlockingError::invalid(end_name, format!("'{}' is not a valid time", end)))?;
    if start > stop {
        return Err(BlockingError::invalid(
            end_name,
            format!("{} is before {} {}", end, beg_name, beg),
        ));
    }
    Ok((start, stop))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
