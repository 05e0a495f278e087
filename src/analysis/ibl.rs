//! Instantaneous Blocking Longitude detection.
//!
//! A detection method looks at one day's (lat, lon) anomaly grid and decides
//! for a single longitude whether the meridional gradient is reversed. Methods
//! are chosen by tag; only Pelly-Hoskins (`PH`) is implemented and any other
//! tag is rejected when the detector is built.

use ndarray::{Array3, ArrayView2, Axis, s};

use crate::logging::{self, Stage};
use crate::model::{
    AnomalyField, BlockingError, CblGrid, GridAxes, IblGrid, PH_BAND_WIDTH_DEG, Result, nan_mean,
};

// ============================================================================
// Method selection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodTag {
    PellyHoskins,
}

impl MethodTag {
    /// Parses a `BLOCK_METHOD` value.
    pub fn parse(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "PH" => Ok(MethodTag::PellyHoskins),
            _ => Err(BlockingError::UnsupportedMethod(tag.trim().to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MethodTag::PellyHoskins => "PH",
        }
    }
}

impl std::fmt::Display for MethodTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of testing one longitude on one day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub blocked: bool,
    /// Blocking intensity `BI`; NaN when the day has no usable data there.
    pub intensity: f64,
}

/// A blocking-detection rule evaluated one longitude at a time.
pub trait BlockingMethod {
    fn tag(&self) -> MethodTag;

    /// Tests longitude `lon` of a single day's (lat, lon) grid.
    fn evaluate(&self, day: ArrayView2<f64>, lon: usize) -> Detection;
}

// ============================================================================
// Pelly-Hoskins
// ============================================================================

/// Inclusive latitude row range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RowSpan {
    first: usize,
    last: usize,
}

impl RowSpan {
    fn between(a: usize, b: usize) -> Self {
        Self {
            first: a.min(b),
            last: a.max(b),
        }
    }

    fn mean(&self, day: ArrayView2<f64>, lon: usize) -> f64 {
        let column = day.slice(s![self.first..=self.last, lon]);
        column.sum() / column.len() as f64
    }
}

/// North and south bands for one latitude offset at one longitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BandPair {
    north: RowSpan,
    south: RowSpan,
}

/// Meridional gradient-reversal test of Pelly and Hoskins.
///
/// For each offset `d` the reference row moves `d` degrees poleward of the
/// long-term CBL; the north band spans 15 degrees poleward of it and the south
/// band 15 degrees equatorward, both including the reference row. The
/// intensity is the largest north-minus-south mean difference over offsets.
/// Band rows are resolved once per longitude when the method is built.
#[derive(Debug, Clone)]
pub struct PellyHoskins {
    /// bands[lon][offset]
    bands: Vec<Vec<BandPair>>,
}

impl PellyHoskins {
    pub fn new(axes: &GridAxes, cbl_mean: &[f64], offsets: &[f64]) -> Result<Self> {
        if cbl_mean.len() != axes.n_lon() {
            return Err(BlockingError::ShapeMismatch {
                stage: "ibl",
                expected: vec![axes.n_lon()],
                found: vec![cbl_mean.len()],
            });
        }
        if offsets.is_empty() {
            return Err(BlockingError::invalid("LAT_DELTA", "no offsets given"));
        }

        let n_lat = axes.n_lat();
        let step = axes.lat_step();
        let poleward_lat = if step < 0.0 { axes.lats[0] } else { axes.lats[n_lat - 1] };
        let north_dir: isize = if step < 0.0 { -1 } else { 1 };
        let half = (PH_BAND_WIDTH_DEG / 2.0 / step.abs()).trunc() as isize;

        let to_row = |row: isize, offset_deg: f64, lon: usize| -> Result<usize> {
            if row < 0 || row >= n_lat as isize {
                return Err(BlockingError::LatitudeOffsetOutOfRange {
                    offset_deg,
                    lon,
                    row,
                    n_lat,
                });
            }
            Ok(row as usize)
        };

        let mut bands = Vec::with_capacity(cbl_mean.len());
        for (lon, cbl) in cbl_mean.iter().enumerate() {
            if cbl.is_nan() {
                return Err(BlockingError::NoInputData(format!(
                    "no central blocking latitude at longitude index {}",
                    lon
                )));
            }
            // Rows below the poleward edge, truncated the same way for either axis order.
            let below_edge = ((poleward_lat - cbl) / step.abs()).trunc() as isize;
            let center = if step < 0.0 { below_edge } else { n_lat as isize - 1 - below_edge };
            let mut pairs = Vec::with_capacity(offsets.len());
            for &offset_deg in offsets {
                let shift = (offset_deg / step.abs()).trunc() as isize;
                let reference = center + north_dir * shift;
                let reference_row = to_row(reference, offset_deg, lon)?;
                let north_row = to_row(reference + north_dir * half, offset_deg, lon)?;
                let south_row = to_row(reference - north_dir * half, offset_deg, lon)?;
                pairs.push(BandPair {
                    north: RowSpan::between(reference_row, north_row),
                    south: RowSpan::between(reference_row, south_row),
                });
            }
            bands.push(pairs);
        }
        Ok(Self { bands })
    }
}

impl BlockingMethod for PellyHoskins {
    fn tag(&self) -> MethodTag {
        MethodTag::PellyHoskins
    }

    fn evaluate(&self, day: ArrayView2<f64>, lon: usize) -> Detection {
        let gradients = self.bands[lon]
            .iter()
            .map(|pair| pair.north.mean(day, lon) - pair.south.mean(day, lon));
        let intensity = gradients.fold(f64::NAN, |best, g| {
            if g.is_nan() || g <= best { best } else { g }
        });
        Detection {
            blocked: intensity > 0.0,
            intensity,
        }
    }
}

// ============================================================================
// Detector
// ============================================================================

/// Applies a [`BlockingMethod`] to every (season, day, longitude) of a field.
pub struct IblDetector {
    method: Box<dyn BlockingMethod>,
    axes: GridAxes,
}

impl IblDetector {
    /// Builds the detector for `tag` against the long-term mean of `cbl`.
    ///
    /// # Errors
    /// - `LatitudeOffsetOutOfRange` if any offset puts a band off the axis
    /// - `NoInputData` if the mean CBL is missing at some longitude
    pub fn new(tag: MethodTag, cbl: &CblGrid, offsets: &[f64]) -> Result<Self> {
        let mean = cbl.long_term_mean();
        let method: Box<dyn BlockingMethod> = match tag {
            MethodTag::PellyHoskins => {
                Box::new(PellyHoskins::new(&cbl.axes, &mean.to_vec(), offsets)?)
            }
        };
        logging::debug(
            Stage::Ibl,
            None,
            &format!("Detector {} ready with {} offset(s)", tag, offsets.len()),
        );
        Ok(Self::with_method(method, cbl.axes.clone()))
    }

    pub fn with_method(method: Box<dyn BlockingMethod>, axes: GridAxes) -> Self {
        Self { method, axes }
    }

    pub fn tag(&self) -> MethodTag {
        self.method.tag()
    }

    pub fn detect(&self, field: &AnomalyField) -> Result<IblGrid> {
        self.axes.ensure_matches(&field.axes, "ibl")?;
        let (n_years, n_days, _, n_lon) = field.data.dim();

        let mut blocked = Array3::<u8>::zeros((n_years, n_days, n_lon));
        let mut intensity = Array3::<f64>::from_elem((n_years, n_days, n_lon), f64::NAN);

        for (y, season) in field.data.outer_iter().enumerate() {
            for (d, day) in season.outer_iter().enumerate() {
                if nan_mean(day.iter().copied()).is_nan() {
                    continue;
                }
                for lon in 0..n_lon {
                    let detection = self.method.evaluate(day, lon);
                    intensity[[y, d, lon]] = detection.intensity;
                    if detection.blocked {
                        blocked[[y, d, lon]] = 1;
                    }
                }
            }

            let season_blocked = blocked.index_axis(Axis(0), y);
            let cells = season_blocked.iter().filter(|v| **v != 0).count();
            let days = season_blocked
                .outer_iter()
                .filter(|row| row.iter().any(|v| *v != 0))
                .count();
            logging::debug(
                Stage::Ibl,
                Some(&field.years[y].to_string()),
                &format!("{} blocked longitude-days over {} day(s)", cells, days),
            );
        }

        Ok(IblGrid { blocked, intensity })
    }
}

// ============================================================================
// Tests
// ============================================================================
