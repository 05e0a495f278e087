//! Atmospheric blocking detection and tracking.
//!
//! Takes a season-indexed stack of daily anomaly grids and runs the four
//! blocking stages: Central Blocking Latitude, Instantaneous Blocking
//! Longitudes, Grouped IBLs and multi-day block tracks, ending in a
//! per-(season, day, longitude) block-frequency grid.

pub mod analysis;
pub mod calendar;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod report;

pub use analysis::{BlockingOutput, BlockingPipeline};
pub use config::{BlockingConfig, ConfigFile, load_config, load_config_from_env, parse_config};
pub use model::{BlockingError, ErrorKind, Result};
