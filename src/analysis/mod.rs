/// Blocking detection stages.
///
/// Data flows strictly forward through the stages, each consuming the
/// previous stage's grid:
///
/// - `cbl` — Central Blocking Latitude per season and longitude.
/// - `ibl` — instantaneously blocked longitudes (Pelly-Hoskins test).
/// - `gibl` — blocked longitudes grouped into wide bands.
/// - `tracker` — multi-day tracks and the block-frequency grid.
/// - `pipeline` — runs the stages in order.
///
/// `ring` holds the circular longitude indexing shared by all of them.

pub mod cbl;
pub mod gibl;
pub mod ibl;
pub mod pipeline;
pub mod ring;
pub mod tracker;

pub use cbl::CblEstimator;
pub use gibl::GiblGrouper;
pub use ibl::{BlockingMethod, Detection, IblDetector, MethodTag, PellyHoskins};
pub use pipeline::{BlockingOutput, BlockingPipeline};
pub use ring::{LonBand, LonRing};
pub use tracker::{BlockEvent, BlockTrack, BlockTracker, TrackParams, TrackState, TrackerOutput};
