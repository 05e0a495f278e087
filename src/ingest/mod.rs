/// Ingestion of externally produced anomaly grids.
///
/// The regridding / running-mean / anomaly executables are external; this
/// module only turns their per-day output into the calendar-aligned
/// four-dimensional stack the analysis stages consume.
///
/// Submodules:
/// - `stack` — assembles day grids into an `AnomalyField`, filling gaps.

pub mod stack;

pub use stack::{DayGrid, IngestSummary, assemble_stack};
