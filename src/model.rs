/// Core data types for the blocking detection pipeline.
///
/// This module defines the shared domain model imported by all other modules:
/// the anomaly stack handed to us by the external anomaly pipeline, the grids
/// each stage produces, and the error taxonomy. It contains no pipeline logic.

use chrono::NaiveDate;
use ndarray::{Array1, Array2, Array3, Array4, Axis};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Degrees of longitude in a full circle.
pub const FULL_CIRCLE_DEG: f64 = 360.0;

/// Total latitude width of the Pelly-Hoskins north + south bands, in degrees.
pub const PH_BAND_WIDTH_DEG: f64 = 30.0;

/// Tracks with at most this many linked days are kept as "failed" candidates.
pub const FAILED_TRACK_MAX_DAYS: usize = 2;

/// Tolerance used when checking that an axis is uniformly spaced.
const AXIS_SPACING_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Broad classification of a [`BlockingError`].
///
/// Every class is fatal for the run (or season) that raised it; data-quality
/// conditions such as missing days are never errors, they become NaN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    DataAvailability,
    Shape,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "CONFIGURATION"),
            ErrorKind::DataAvailability => write!(f, "DATA"),
            ErrorKind::Shape => write!(f, "SHAPE"),
        }
    }
}

/// Errors that can arise while configuring or running the blocking pipeline.
#[derive(Debug, Error)]
pub enum BlockingError {
    /// A threshold or option is missing, malformed or out of range.
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The configured detection method has no implementation.
    #[error("Unsupported blocking method: {0}")]
    UnsupportedMethod(String),

    /// A latitude offset would place a detection band outside the latitude axis.
    #[error("Latitude offset {offset_deg} at longitude index {lon} needs row {row}, axis has {n_lat} rows")]
    LatitudeOffsetOutOfRange {
        offset_deg: f64,
        lon: usize,
        row: isize,
        n_lat: usize,
    },

    /// No input grids were supplied.
    #[error("No input data: {0}")]
    NoInputData(String),

    /// Observed data starts before the first expected calendar day.
    #[error("Data valid at {valid} precedes the expected calendar start {expected_start}")]
    DataPrecedesCalendar {
        valid: NaiveDate,
        expected_start: NaiveDate,
    },

    /// A grid is valid on a date that the season calendar does not contain.
    #[error("Date {0} is outside the season calendar")]
    DateOutsideCalendar(NaiveDate),

    /// Two input grids claim the same valid date.
    #[error("Duplicate grid for valid date {0}")]
    DuplicateValidDate(NaiveDate),

    /// A timestamp attribute could not be parsed.
    #[error("Unparseable timestamp '{value}'")]
    TimestampParse { value: String },

    /// An input grid carries a different variable than the one configured.
    #[error("Expected variable {expected}, found {found}")]
    VariableMismatch { expected: String, found: String },

    /// Array dimensions disagree at a stage boundary.
    #[error("Shape mismatch in {stage}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        stage: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// Latitude or longitude coordinates disagree, or an axis is unusable.
    #[error("Axis mismatch in {stage}: {detail}")]
    AxisMismatch { stage: &'static str, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl BlockingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BlockingError::InvalidParameter { .. }
            | BlockingError::UnsupportedMethod(_)
            | BlockingError::LatitudeOffsetOutOfRange { .. }
            | BlockingError::Io(_)
            | BlockingError::ConfigParse(_) => ErrorKind::Configuration,
            BlockingError::NoInputData(_)
            | BlockingError::DataPrecedesCalendar { .. }
            | BlockingError::DateOutsideCalendar(_)
            | BlockingError::DuplicateValidDate(_)
            | BlockingError::TimestampParse { .. }
            | BlockingError::VariableMismatch { .. } => ErrorKind::DataAvailability,
            BlockingError::ShapeMismatch { .. } | BlockingError::AxisMismatch { .. } => {
                ErrorKind::Shape
            }
        }
    }

    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        BlockingError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BlockingError>;

// ---------------------------------------------------------------------------
// Grid axes
// ---------------------------------------------------------------------------

/// Latitude and longitude coordinates shared by every grid in a run.
///
/// Latitudes may run north-to-south or south-to-north but must be uniformly
/// spaced. Longitudes must be uniformly spaced and cover the full circle,
/// because every longitude computation treats the axis as a ring.
#[derive(Debug, Clone, PartialEq)]
pub struct GridAxes {
    pub lats: Array1<f64>,
    pub lons: Array1<f64>,
}

impl GridAxes {
    pub fn new(lats: Array1<f64>, lons: Array1<f64>) -> Result<Self> {
        let axes = Self { lats, lons };
        axes.validate()?;
        Ok(axes)
    }

    pub fn n_lat(&self) -> usize {
        self.lats.len()
    }

    pub fn n_lon(&self) -> usize {
        self.lons.len()
    }

    /// Signed latitude increment between consecutive rows.
    pub fn lat_step(&self) -> f64 {
        self.lats[1] - self.lats[0]
    }

    pub fn validate(&self) -> Result<()> {
        if self.lats.len() < 2 {
            return Err(BlockingError::AxisMismatch {
                stage: "axes",
                detail: format!("latitude axis needs at least 2 points, has {}", self.lats.len()),
            });
        }
        if self.lons.is_empty() {
            return Err(BlockingError::AxisMismatch {
                stage: "axes",
                detail: "longitude axis is empty".to_string(),
            });
        }
        let lat_step = self.lat_step();
        if lat_step == 0.0 || !uniform(&self.lats, lat_step) {
            return Err(BlockingError::AxisMismatch {
                stage: "axes",
                detail: "latitude axis is not uniformly spaced".to_string(),
            });
        }
        if self.lons.len() > 1 {
            let lon_step = self.lons[1] - self.lons[0];
            let covers_circle =
                (lon_step.abs() * self.lons.len() as f64 - FULL_CIRCLE_DEG).abs() < 1e-3;
            if !uniform(&self.lons, lon_step) || !covers_circle {
                return Err(BlockingError::AxisMismatch {
                    stage: "axes",
                    detail: format!(
                        "longitude axis must be uniform and span 360 degrees ({} points, step {})",
                        self.lons.len(),
                        lon_step
                    ),
                });
            }
        }
        Ok(())
    }

    /// Errors unless `other` has the same coordinates.
    pub fn ensure_matches(&self, other: &GridAxes, stage: &'static str) -> Result<()> {
        if !same_axis(&self.lats, &other.lats) {
            return Err(BlockingError::AxisMismatch {
                stage,
                detail: "latitude coordinates differ".to_string(),
            });
        }
        if !same_axis(&self.lons, &other.lons) {
            return Err(BlockingError::AxisMismatch {
                stage,
                detail: "longitude coordinates differ".to_string(),
            });
        }
        Ok(())
    }
}

fn uniform(axis: &Array1<f64>, step: f64) -> bool {
    axis.windows(2)
        .into_iter()
        .all(|w| ((w[1] - w[0]) - step).abs() < AXIS_SPACING_TOLERANCE)
}

fn same_axis(a: &Array1<f64>, b: &Array1<f64>) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| (x - y).abs() < AXIS_SPACING_TOLERANCE)
}

/// sqrt(cos(latitude)) per latitude row, used to damp polar variability.
pub fn latitude_weights(lats: &Array1<f64>) -> Array1<f64> {
    lats.mapv(|lat| lat.to_radians().cos().max(0.0).sqrt())
}

// ---------------------------------------------------------------------------
// Anomaly field
// ---------------------------------------------------------------------------

/// Daily anomalies indexed by (season, day-of-season, latitude, longitude).
///
/// Missing days are whole NaN slices. `years` holds one season label per
/// entry of the first axis.
#[derive(Debug, Clone)]
pub struct AnomalyField {
    pub data: Array4<f64>,
    pub axes: GridAxes,
    pub years: Vec<i32>,
}

impl AnomalyField {
    pub fn new(data: Array4<f64>, axes: GridAxes, years: Vec<i32>) -> Result<Self> {
        let (n_years, n_days, n_lat, n_lon) = data.dim();
        if n_years == 0 || n_days == 0 {
            return Err(BlockingError::NoInputData(format!(
                "anomaly stack has shape {:?}",
                data.shape()
            )));
        }
        let expected = vec![years.len(), n_days, axes.n_lat(), axes.n_lon()];
        let found = vec![n_years, n_days, n_lat, n_lon];
        if expected != found {
            return Err(BlockingError::ShapeMismatch {
                stage: "anomaly field",
                expected,
                found,
            });
        }
        Ok(Self { data, axes, years })
    }

    pub fn n_years(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn n_days(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn n_lat(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn n_lon(&self) -> usize {
        self.data.len_of(Axis(3))
    }
}

// ---------------------------------------------------------------------------
// Stage outputs
// ---------------------------------------------------------------------------

/// Central Blocking Latitude per (season, longitude), in degrees.
#[derive(Debug, Clone)]
pub struct CblGrid {
    pub latitudes: Array2<f64>,
    /// Latitude-weighted day-axis standard deviation, (season, lat, lon).
    pub weighted_std: Array3<f64>,
    pub axes: GridAxes,
    pub years: Vec<i32>,
}

impl CblGrid {
    /// Mean CBL over seasons, ignoring NaN. NaN where no season has a value.
    pub fn long_term_mean(&self) -> Array1<f64> {
        self.latitudes
            .axis_iter(Axis(1))
            .map(|column| nan_mean(column.iter().copied()))
            .collect()
    }
}

/// Instantaneously blocked longitudes per (season, day, longitude).
#[derive(Debug, Clone)]
pub struct IblGrid {
    pub blocked: Array3<u8>,
    /// Maximum north-minus-south gradient across offsets (`BI`).
    pub intensity: Array3<f64>,
}

/// Grouped blocked longitudes per (season, day, longitude).
#[derive(Debug, Clone)]
pub struct GiblGrid {
    pub blocked: Array3<u8>,
}

/// Sum of accepted track band indicators per (season, day, longitude).
pub type BlockFrequencyGrid = Array3<u32>;

// ---------------------------------------------------------------------------
// NaN-aware aggregation
// ---------------------------------------------------------------------------

/// Mean of the finite values; NaN when there are none.
pub fn nan_mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 { f64::NAN } else { sum / count as f64 }
}

/// Population standard deviation of the non-NaN values; NaN when there are none.
pub fn nan_std(values: &[f64]) -> f64 {
    let mean = nan_mean(values.iter().copied());
    if mean.is_nan() {
        return f64::NAN;
    }
    let variance = nan_mean(values.iter().map(|v| (v - mean) * (v - mean)));
    variance.sqrt()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
