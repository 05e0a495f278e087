/// Day-grid stacking with missing-day detection
///
/// Each input grid is tagged with its valid time. Grids are placed by
/// calendar date, never by input order; calendar days with no grid become
/// NaN slices so that day-of-season indices stay aligned across seasons.
///
/// Data valid before the first expected calendar day is a fatal error: the
/// stacker does not guess how the caller meant the window to be truncated.

use chrono::{Datelike, NaiveDate};
use ndarray::{Array2, Array4, s};

use crate::calendar::{SeasonCalendar, parse_valid_date};
use crate::logging::{self, Stage};
use crate::model::{AnomalyField, BlockingError, GridAxes, Result};

// ============================================================================
// Input / output records
// ============================================================================

/// One day of anomaly data as written by the external anomaly pipeline.
#[derive(Debug, Clone)]
pub struct DayGrid {
    /// Initialization time attribute (kept for diagnostics).
    pub init_time: String,
    /// Valid time attribute, e.g. `20001201_000000`.
    pub valid_time: String,
    /// Variable name, compared against `BLOCKING_VAR`.
    pub variable: String,
    pub axes: GridAxes,
    /// (lat, lon) values.
    pub values: Array2<f64>,
}

/// What the stacker had to fill in or leave out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestSummary {
    /// Number of in-season days in the requested window.
    pub expected_days: usize,
    /// Number of grids placed into the stack.
    pub placed_days: usize,
    /// Expected dates for which no grid was supplied (now NaN).
    pub filled: Vec<NaiveDate>,
    /// Grids that were dropped because their date is never part of a season
    /// (Feb 29).
    pub skipped: Vec<NaiveDate>,
}

// ============================================================================
// Assembly
// ============================================================================

/// Builds an `AnomalyField` from day grids for the given calendar window.
///
/// # Errors
/// - `NoInputData` if `grids` is empty or the window has no season days
/// - `VariableMismatch`, `AxisMismatch`, `ShapeMismatch` for inconsistent grids
/// - `TimestampParse` for an unreadable valid time
/// - `DataPrecedesCalendar` if a grid is valid before the window opens
/// - `DateOutsideCalendar` for grids after the window or outside the season
/// - `DuplicateValidDate` if two grids share a valid date
pub fn assemble_stack(
    grids: &[DayGrid],
    variable: &str,
    calendar: &SeasonCalendar,
) -> Result<(AnomalyField, IngestSummary)> {
    let first = grids
        .first()
        .ok_or_else(|| BlockingError::NoInputData("no day grids supplied".to_string()))?;
    let axes = first.axes.clone();
    axes.validate()?;
    let (n_lat, n_lon) = (axes.n_lat(), axes.n_lon());

    for grid in grids {
        if grid.variable != variable {
            return Err(BlockingError::VariableMismatch {
                expected: variable.to_string(),
                found: grid.variable.clone(),
            });
        }
        axes.ensure_matches(&grid.axes, "ingest")?;
        if grid.values.dim() != (n_lat, n_lon) {
            return Err(BlockingError::ShapeMismatch {
                stage: "ingest",
                expected: vec![n_lat, n_lon],
                found: grid.values.shape().to_vec(),
            });
        }
    }

    let expected = calendar.expected_dates();
    let expected_start = *expected.first().ok_or_else(|| {
        BlockingError::NoInputData(format!(
            "window {}..{} contains no season days",
            calendar.start(),
            calendar.end()
        ))
    })?;
    let labels = calendar.season_labels();
    let season_len = calendar.season_length();

    let mut data = Array4::from_elem((labels.len(), season_len, n_lat, n_lon), f64::NAN);
    let mut occupied = Array2::from_elem((labels.len(), season_len), false);
    let mut summary = IngestSummary {
        expected_days: expected.len(),
        ..IngestSummary::default()
    };

    for grid in grids {
        let valid = parse_valid_date(&grid.valid_time)?;
        if valid < expected_start {
            return Err(BlockingError::DataPrecedesCalendar {
                valid,
                expected_start,
            });
        }
        if valid > calendar.end() {
            return Err(BlockingError::DateOutsideCalendar(valid));
        }
        let position = match calendar.position(valid) {
            Some(position) => position,
            None if is_leap_day(valid) => {
                logging::debug(
                    Stage::Ingest,
                    Some(&grid.init_time),
                    &format!("Skipping leap day grid valid {}", valid),
                );
                summary.skipped.push(valid);
                continue;
            }
            None => return Err(BlockingError::DateOutsideCalendar(valid)),
        };
        let season = labels
            .iter()
            .position(|label| *label == position.label)
            .ok_or(BlockingError::DateOutsideCalendar(valid))?;

        if occupied[[season, position.day]] {
            return Err(BlockingError::DuplicateValidDate(valid));
        }
        occupied[[season, position.day]] = true;
        data.slice_mut(s![season, position.day, .., ..])
            .assign(&grid.values);
        summary.placed_days += 1;
    }

    for date in &expected {
        if let Some(position) = calendar.position(*date) {
            let season = labels.iter().position(|label| *label == position.label);
            if season.map_or(true, |season| !occupied[[season, position.day]]) {
                summary.filled.push(*date);
            }
        }
    }

    if summary.filled.is_empty() {
        logging::info(
            Stage::Ingest,
            None,
            &format!(
                "Stacked {} grids into {} season(s) of {} days",
                summary.placed_days,
                labels.len(),
                season_len
            ),
        );
    } else {
        logging::warn(
            Stage::Ingest,
            None,
            &format!(
                "Stacked {} grids, filled {} missing day(s) with NaN (first {})",
                summary.placed_days,
                summary.filled.len(),
                summary.filled[0]
            ),
        );
    }

    let field = AnomalyField::new(data, axes, labels)?;
    Ok((field, summary))
}

fn is_leap_day(date: NaiveDate) -> bool {
    date.month() == 2 && date.day() == 29
}

// ============================================================================
// Tests
// ============================================================================
