/// End-to-end blocking pipeline.
///
/// `BlockingPipeline` is built once from a validated configuration, so every
/// configuration error surfaces before any field is touched. A run then
/// executes CBL -> IBL -> GIBL -> tracking in order; the first failing stage
/// aborts the run and nothing partial is returned.

use crate::analysis::cbl::CblEstimator;
use crate::analysis::gibl::GiblGrouper;
use crate::analysis::ibl::{IblDetector, MethodTag};
use crate::analysis::tracker::{BlockTracker, TrackParams, TrackerOutput};
use crate::config::BlockingConfig;
use crate::ingest::{DayGrid, assemble_stack};
use crate::logging::{self, Stage};
use crate::model::{
    AnomalyField, BlockFrequencyGrid, BlockingError, CblGrid, GiblGrid, IblGrid, Result,
};

/// Every grid a run produces.
#[derive(Debug, Clone)]
pub struct BlockingOutput {
    pub method: MethodTag,
    pub cbl: CblGrid,
    pub ibl: IblGrid,
    pub gibl: GiblGrid,
    pub tracks: TrackerOutput,
    /// Season labels of the daily field.
    pub years: Vec<i32>,
}

impl BlockingOutput {
    pub fn frequency(&self) -> &BlockFrequencyGrid {
        &self.tracks.frequency
    }
}

pub struct BlockingPipeline {
    config: BlockingConfig,
    method: MethodTag,
    offsets: Vec<f64>,
    estimator: CblEstimator,
    grouper: GiblGrouper,
    tracker: BlockTracker,
}

impl BlockingPipeline {
    pub fn new(config: BlockingConfig) -> Result<Self> {
        let built = Self::build(config);
        if let Err(e) = &built {
            logging::log_stage_failure(Stage::Config, "pipeline setup", e);
        }
        built
    }

    fn build(config: BlockingConfig) -> Result<Self> {
        config.validate()?;
        let method = config.method()?;
        let offsets = config.lat_deltas()?;
        let estimator = CblEstimator::new(config.smoothing_pts)?;
        let grouper = GiblGrouper::from_config(&config)?;
        let tracker = BlockTracker::new(TrackParams::from_config(&config))?;
        logging::debug(
            Stage::Config,
            None,
            &format!(
                "Method {} offsets {:?} group>={} gap<={} overlap>{} days>={} drift<={}",
                method,
                offsets,
                grouper.min_group(),
                grouper.gap_threshold(),
                config.gibl_overlap,
                config.block_time,
                config.block_travel
            ),
        );
        Ok(Self {
            config,
            method,
            offsets,
            estimator,
            grouper,
            tracker,
        })
    }

    pub fn config(&self) -> &BlockingConfig {
        &self.config
    }

    pub fn method(&self) -> MethodTag {
        self.method
    }

    pub fn estimate_cbl(&self, field: &AnomalyField) -> Result<CblGrid> {
        logged(Stage::Cbl, "estimate", self.estimator.estimate(field))
    }

    /// Estimates the CBL from `cbl_field`, then detects and tracks blocks in
    /// `daily`. The two fields may cover different windows but must share axes.
    pub fn run(&self, cbl_field: &AnomalyField, daily: &AnomalyField) -> Result<BlockingOutput> {
        if self.config.use_cbl_obs {
            logging::warn(
                Stage::Pipeline,
                None,
                "USE_CBL_OBS is set but no CBL was supplied; estimating one",
            );
        }
        let axes_check = cbl_field.axes.ensure_matches(&daily.axes, "pipeline");
        logged(Stage::Pipeline, "axis check", axes_check)?;
        let cbl = self.estimate_cbl(cbl_field)?;
        self.run_with_cbl(cbl, daily)
    }

    /// Detects and tracks blocks in `daily` against a precomputed CBL.
    pub fn run_with_cbl(&self, cbl: CblGrid, daily: &AnomalyField) -> Result<BlockingOutput> {
        logged(Stage::Pipeline, "axis check", check_cbl(&cbl, daily))?;
        logging::info(
            Stage::Pipeline,
            None,
            &format!(
                "Running {} over {} season(s) x {} days on a {}x{} grid",
                self.method,
                daily.n_years(),
                daily.n_days(),
                daily.n_lat(),
                daily.n_lon()
            ),
        );

        let detector = logged(
            Stage::Ibl,
            "setup",
            IblDetector::new(self.method, &cbl, &self.offsets),
        )?;
        let ibl = logged(Stage::Ibl, "detect", detector.detect(daily))?;
        let gibl = self.grouper.group(&ibl, &daily.years);
        let tracks = logged(
            Stage::Track,
            "track",
            self.tracker.track(&ibl, &gibl, &daily.years),
        )?;

        let accepted = tracks.accepted().count();
        logging::log_stage_summary(Stage::Pipeline, None, tracks.tracks.len(), accepted);

        Ok(BlockingOutput {
            method: self.method,
            cbl,
            ibl,
            gibl,
            tracks,
            years: daily.years.clone(),
        })
    }

    /// Stacks raw day grids with the configured calendars, then runs.
    ///
    /// `cbl_grids` cover the CBL window (`CBL_VALID_BEG..CBL_VALID_END`, or
    /// the daily window when unset); `daily_grids` cover `VALID_BEG..VALID_END`.
    pub fn run_from_grids(
        &self,
        cbl_grids: &[DayGrid],
        daily_grids: &[DayGrid],
    ) -> Result<BlockingOutput> {
        let var = &self.config.blocking_var;
        let (cbl_field, _) = logged(
            Stage::Ingest,
            "stack CBL window",
            self.config
                .cbl_calendar()
                .and_then(|cal| assemble_stack(cbl_grids, var, &cal)),
        )?;
        let (daily, _) = logged(
            Stage::Ingest,
            "stack daily window",
            self.config
                .calendar()
                .and_then(|cal| assemble_stack(daily_grids, var, &cal)),
        )?;
        self.run(&cbl_field, &daily)
    }
}

fn check_cbl(cbl: &CblGrid, daily: &AnomalyField) -> Result<()> {
    cbl.axes.ensure_matches(&daily.axes, "pipeline")?;
    let expected = vec![cbl.years.len(), cbl.axes.n_lon()];
    let found = cbl.latitudes.shape().to_vec();
    if expected != found {
        return Err(BlockingError::ShapeMismatch {
            stage: "pipeline",
            expected,
            found,
        });
    }
    Ok(())
}

/// Logs a stage failure before handing the result back.
fn logged<T>(stage: Stage, operation: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        logging::log_stage_failure(stage, operation, e);
    }
    result
}

// ============================================================================
// Tests
// ============================================================================
