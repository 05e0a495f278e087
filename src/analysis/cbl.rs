//! Central Blocking Latitude estimation.
//!
//! For each season and longitude the CBL is the latitude where the
//! latitude-weighted day-to-day standard deviation of the anomaly peaks,
//! smoothed with a circular running mean over longitude.

use ndarray::{Array1, Array2, Array3, ArrayView1, Axis, Zip};

use crate::analysis::ring::LonRing;
use crate::logging::{self, Stage};
use crate::model::{
    AnomalyField, BlockingError, CblGrid, Result, latitude_weights, nan_mean, nan_std,
};

/// Computes [`CblGrid`]s from an anomaly stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CblEstimator {
    half_width: usize,
}

impl CblEstimator {
    /// Half-width `m = (smoothing_pts - 1) / 2 + 1`; the window spans `2m + 1`
    /// longitudes.
    pub fn new(smoothing_pts: usize) -> Result<Self> {
        if smoothing_pts == 0 {
            return Err(BlockingError::invalid("SMOOTHING_PTS", "must be at least 1"));
        }
        Ok(Self {
            half_width: (smoothing_pts - 1) / 2 + 1,
        })
    }

    pub fn half_width(&self) -> usize {
        self.half_width
    }

    pub fn estimate(&self, field: &AnomalyField) -> Result<CblGrid> {
        let (n_years, n_days, n_lat, n_lon) = field.data.dim();
        if n_years == 0 || n_days == 0 {
            return Err(BlockingError::NoInputData(
                "anomaly stack has no seasons or days".to_string(),
            ));
        }
        if n_lat != field.axes.n_lat() || n_lon != field.axes.n_lon() {
            return Err(BlockingError::ShapeMismatch {
                stage: "cbl",
                expected: vec![n_years, n_days, field.axes.n_lat(), field.axes.n_lon()],
                found: field.data.shape().to_vec(),
            });
        }
        if 2 * self.half_width + 1 > n_lon {
            return Err(BlockingError::invalid(
                "SMOOTHING_PTS",
                format!(
                    "smoothing window of {} points exceeds {} longitudes",
                    2 * self.half_width + 1,
                    n_lon
                ),
            ));
        }

        let weighted_std = weighted_variability(field);
        let lats = &field.axes.lats;

        let mut raw = Array2::<f64>::from_elem((n_years, n_lon), f64::NAN);
        Zip::from(&mut raw)
            .and(weighted_std.lanes(Axis(1)))
            .for_each(|cbl, column| {
                if let Some(row) = nan_argmax(column) {
                    *cbl = lats[row];
                }
            });

        let ring = LonRing::new(n_lon);
        let mut latitudes = Array2::<f64>::zeros((n_years, n_lon));
        for (mut out, season) in latitudes.outer_iter_mut().zip(raw.outer_iter()) {
            out.assign(&smooth_circular(season, self.half_width, &ring));
        }

        for (season, row) in latitudes.outer_iter().enumerate() {
            let missing = row.iter().filter(|v| v.is_nan()).count();
            let label = field.years[season].to_string();
            if missing > 0 {
                logging::warn(
                    Stage::Cbl,
                    Some(&label),
                    &format!("{} longitude(s) have no CBL (no finite variability)", missing),
                );
            } else {
                logging::debug(
                    Stage::Cbl,
                    Some(&label),
                    &format!("CBL mean latitude {:.1}", nan_mean(row.iter().copied())),
                );
            }
        }

        Ok(CblGrid {
            latitudes,
            weighted_std,
            axes: field.axes.clone(),
            years: field.years.clone(),
        })
    }
}

/// NaN-aware standard deviation over days, times sqrt(cos(lat)).
///
/// Shape (season, lat, lon).
pub fn weighted_variability(field: &AnomalyField) -> Array3<f64> {
    let (n_years, _, n_lat, n_lon) = field.data.dim();
    let weights = latitude_weights(&field.axes.lats);
    let mut out = Array3::<f64>::zeros((n_years, n_lat, n_lon));
    let mut scratch: Vec<f64> = Vec::with_capacity(field.n_days());
    Zip::indexed(&mut out)
        .and(field.data.lanes(Axis(1)))
        .for_each(|(_, lat, _), value, days| {
            scratch.clear();
            scratch.extend(days.iter().copied());
            *value = nan_std(&scratch) * weights[lat];
        });
    out
}

/// Row of the largest finite value; first row wins ties.
fn nan_argmax(column: ArrayView1<f64>) -> Option<usize> {
    column
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, v)| match best {
            Some((_, b)) if *v <= b => best,
            _ => Some((i, *v)),
        })
        .map(|(i, _)| i)
}

/// Circular running mean of half-width `m`, truncated toward zero.
///
/// Each output averages the `2m + 1` longitudes centred on it, taking
/// neighbours from the opposite end of the axis near the seam. NaN inputs are
/// skipped; an all-NaN window stays NaN.
pub fn smooth_circular(row: ArrayView1<f64>, half_width: usize, ring: &LonRing) -> Array1<f64> {
    let m = half_width as isize;
    (0..row.len())
        .map(|i| {
            let mean = nan_mean((-m..=m).map(|k| row[ring.neighbor(i, k)]));
            mean.trunc()
        })
        .collect()
}
