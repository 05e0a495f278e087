//! Grouping of instantaneously blocked longitudes into bands.
//!
//! Blocked longitudes closer than the gap threshold are chained into one
//! extent; the extent keeps every longitude it spans, gaps included, when it
//! covers at least `min_group` longitudes. Each day is grouped on its own.

use ndarray::{Array1, Array3, ArrayView1, Axis};

use crate::analysis::ring::{LonBand, LonRing};
use crate::config::BlockingConfig;
use crate::logging::{self, Stage};
use crate::model::{BlockingError, GiblGrid, IblGrid, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GiblGrouper {
    min_group: usize,
    gap_threshold: f64,
}

impl GiblGrouper {
    /// `gap_threshold` is the largest index gap (in grid steps) that still
    /// chains two blocked longitudes together.
    pub fn new(min_group: usize, gap_threshold: f64) -> Result<Self> {
        if min_group == 0 {
            return Err(BlockingError::invalid("IBL_IN_GIBL", "must be at least 1"));
        }
        if !gap_threshold.is_finite() || gap_threshold < 1.0 {
            return Err(BlockingError::invalid(
                "IBL_DIST",
                format!("gap threshold must be at least 1, got {}", gap_threshold),
            ));
        }
        Ok(Self {
            min_group,
            gap_threshold,
        })
    }

    pub fn from_config(config: &BlockingConfig) -> Result<Self> {
        Self::new(config.ibl_in_gibl, config.gap_threshold())
    }

    pub fn min_group(&self) -> usize {
        self.min_group
    }

    pub fn gap_threshold(&self) -> f64 {
        self.gap_threshold
    }

    /// Bands of one day's IBL row that survive grouping.
    pub fn bands(&self, row: ArrayView1<u8>) -> Vec<LonBand> {
        let ring = LonRing::new(row.len());
        let blocked: Vec<usize> = row
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0)
            .map(|(i, _)| i)
            .collect();
        if blocked.is_empty() {
            return Vec::new();
        }

        let k = blocked.len();
        let gap_after = |i: usize| -> usize {
            if k == 1 {
                ring.len()
            } else {
                ring.forward(blocked[i], blocked[(i + 1) % k])
            }
        };
        let breaks: Vec<usize> = (0..k)
            .filter(|i| gap_after(*i) as f64 > self.gap_threshold)
            .collect();

        if breaks.is_empty() {
            // Every gap is bridged, including the one across the seam.
            return if ring.len() >= self.min_group {
                vec![LonBand::new(0, ring.len())]
            } else {
                Vec::new()
            };
        }

        let mut bands = Vec::new();
        for (n, b) in breaks.iter().enumerate() {
            let next_break = breaks[(n + 1) % breaks.len()];
            let start = blocked[(b + 1) % k];
            let end = blocked[next_break];
            let span = ring.forward(start, end) + 1;
            if span >= self.min_group {
                bands.push(LonBand::new(start, span));
            }
        }
        bands.sort_by_key(|band| band.start);
        bands
    }

    /// Groups one day's IBL row into its GIBL row.
    pub fn group_row(&self, row: ArrayView1<u8>) -> Array1<u8> {
        let ring = LonRing::new(row.len());
        let mut out = Array1::<u8>::zeros(row.len());
        for band in self.bands(row) {
            for i in band.indices(ring) {
                out[i] = 1;
            }
        }
        out
    }

    pub fn group(&self, ibl: &IblGrid, years: &[i32]) -> GiblGrid {
        let mut blocked = Array3::<u8>::zeros(ibl.blocked.dim());
        for (y, (mut out_season, in_season)) in blocked
            .outer_iter_mut()
            .zip(ibl.blocked.outer_iter())
            .enumerate()
        {
            for (mut out_row, in_row) in out_season.outer_iter_mut().zip(in_season.outer_iter()) {
                if in_row.iter().all(|v| *v == 0) {
                    continue;
                }
                out_row.assign(&self.group_row(in_row));
            }

            let days = out_season
                .axis_iter(Axis(0))
                .filter(|row| row.iter().any(|v| *v != 0))
                .count();
            let label = years.get(y).map(|l| l.to_string());
            logging::debug(
                Stage::Gibl,
                label.as_deref(),
                &format!("{} day(s) with a grouped band", days),
            );
        }
        GiblGrid { blocked }
    }
}

// ============================================================================
// Tests
// ============================================================================
