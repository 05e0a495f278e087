/// Multi-day block tracking.
///
/// Candidate events are GIBL bands at least `min_group` longitudes wide. Within
/// each season they are linked day to day into tracks when consecutive bands
/// share enough longitudes; tracks that are too short or whose centre drifts
/// too far from where it started are rejected. Accepted tracks add their band
/// indicators into the block-frequency grid.
///
/// Track lifecycle per season:
///
/// ```text
/// Candidate -> Linking -> Accepted  (long enough, drift bounded)
///                      -> Rejected  (too short, or drift-bounded prefix too short)
/// ```

use ndarray::{Array3, s};

use crate::analysis::ring::{LonBand, LonRing};
use crate::config::BlockingConfig;
use crate::logging::{self, Stage};
use crate::model::{
    BlockFrequencyGrid, BlockingError, FAILED_TRACK_MAX_DAYS, FULL_CIRCLE_DEG, GiblGrid, IblGrid,
    Result,
};

/// Largest day separation between events that can belong to one track.
pub const MAX_DAY_GAP: usize = 2;

// ============================================================================
// Parameters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackParams {
    /// Band width (longitudes) that makes a GIBL row a candidate event.
    pub min_group: usize,
    /// Shared longitudes must exceed this to link two days.
    pub min_overlap: usize,
    /// Minimum linked days for an accepted track.
    pub min_days: usize,
    /// Largest centroid drift from the first day, in degrees.
    pub max_drift_deg: f64,
}

impl TrackParams {
    pub fn from_config(config: &BlockingConfig) -> Self {
        Self {
            min_group: config.ibl_in_gibl,
            min_overlap: config.gibl_overlap,
            min_days: config.block_time,
            max_drift_deg: config.block_travel,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_group == 0 {
            return Err(BlockingError::invalid("IBL_IN_GIBL", "must be at least 1"));
        }
        if self.min_days == 0 {
            return Err(BlockingError::invalid("BLOCK_TIME", "must be at least 1"));
        }
        if !self.max_drift_deg.is_finite() || self.max_drift_deg < 0.0 {
            return Err(BlockingError::invalid(
                "BLOCK_TRAVEL",
                format!("must be a non-negative number of degrees, got {}", self.max_drift_deg),
            ));
        }
        Ok(())
    }
}

impl Default for TrackParams {
    fn default() -> Self {
        Self {
            min_group: 15,
            min_overlap: 10,
            min_days: 5,
            max_drift_deg: 45.0,
        }
    }
}

// ============================================================================
// Events and tracks
// ============================================================================

/// One candidate blocked band on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEvent {
    /// Index into the season axis.
    pub season: usize,
    pub day: usize,
    /// Longitude where the run count reaches `min_group`.
    pub anchor: usize,
    pub band: LonBand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Candidate,
    Linking,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockTrack {
    season: usize,
    events: Vec<BlockEvent>,
    state: TrackState,
    /// Number of leading days kept before the drift limit was crossed.
    drift_prefix: Option<usize>,
}

impl BlockTrack {
    fn candidate(seed: BlockEvent) -> Self {
        Self {
            season: seed.season,
            events: vec![seed],
            state: TrackState::Candidate,
            drift_prefix: None,
        }
    }

    pub fn season(&self) -> usize {
        self.season
    }

    pub fn events(&self) -> &[BlockEvent] {
        &self.events
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Days covered by the track, in order.
    pub fn days(&self) -> Vec<usize> {
        self.events.iter().map(|e| e.day).collect()
    }

    /// Whether drift filtering cut the track short.
    pub fn drift_truncated(&self) -> bool {
        self.drift_prefix.is_some()
    }

    /// Rejected tracks short enough to be kept as failed candidates.
    pub fn is_failed(&self) -> bool {
        if self.state != TrackState::Rejected {
            return false;
        }
        let kept = self.drift_prefix.unwrap_or(self.events.len());
        kept <= FAILED_TRACK_MAX_DAYS
    }

    fn begin_linking(&mut self) {
        if self.state == TrackState::Candidate {
            self.state = TrackState::Linking;
        }
    }

    /// Appends `event` if it follows the latest day closely enough and
    /// overlaps its band by more than `min_overlap` longitudes.
    fn try_link(&mut self, event: &BlockEvent, ring: &LonRing, min_overlap: usize) -> bool {
        if self.state != TrackState::Linking {
            return false;
        }
        let Some(last) = self.events.last() else {
            return false;
        };
        let gap = event.day.saturating_sub(last.day);
        if !(1..=MAX_DAY_GAP).contains(&gap) {
            return false;
        }
        if last.band.overlap(&event.band, ring) <= min_overlap {
            return false;
        }
        self.events.push(*event);
        true
    }

    /// Ends linking: applies the length and drift limits.
    fn settle(&mut self, params: &TrackParams, ring: &LonRing, lon_step: f64) {
        if self.state != TrackState::Linking {
            return;
        }
        if self.events.len() < params.min_days {
            self.state = TrackState::Rejected;
            return;
        }
        match first_excessive_drift(&self.events, ring, lon_step, params.max_drift_deg) {
            None => self.state = TrackState::Accepted,
            Some(prefix) => {
                self.drift_prefix = Some(prefix);
                if prefix >= params.min_days {
                    self.events.truncate(prefix);
                    self.state = TrackState::Accepted;
                } else {
                    self.state = TrackState::Rejected;
                }
            }
        }
    }
}

/// Signed drift of each day's band centroid from the first day's, in degrees.
pub fn centroid_drift(events: &[BlockEvent], ring: &LonRing, lon_step: f64) -> Vec<f64> {
    let Some(first) = events.first() else {
        return Vec::new();
    };
    let origin = first.band.centroid(ring);
    events
        .iter()
        .map(|e| ring.signed_offset(origin, e.band.centroid(ring)) as f64 * lon_step)
        .collect()
}

/// Index of the first day whose drift exceeds `max_drift_deg`.
fn first_excessive_drift(
    events: &[BlockEvent],
    ring: &LonRing,
    lon_step: f64,
    max_drift_deg: f64,
) -> Option<usize> {
    centroid_drift(events, ring, lon_step)
        .iter()
        .position(|drift| drift.abs() > max_drift_deg)
}

// ============================================================================
// Per-season builder
// ============================================================================

/// Greedy track linkage for one season.
///
/// The oldest pending event seeds a track; later events within the seed's
/// day-gap chain are linked left to right. Linked events leave the pending
/// list, the rest stay for the next seed. Building stops once fewer pending
/// events remain than an accepted track needs.
pub struct TrackBuilder<'a> {
    params: &'a TrackParams,
    ring: LonRing,
    lon_step: f64,
    pending: Vec<BlockEvent>,
    tracks: Vec<BlockTrack>,
}

impl<'a> TrackBuilder<'a> {
    /// `events` must belong to one season and be sorted by (day, anchor).
    pub fn new(params: &'a TrackParams, ring: LonRing, events: Vec<BlockEvent>) -> Self {
        Self {
            params,
            ring,
            lon_step: FULL_CIRCLE_DEG / ring.len() as f64,
            pending: events,
            tracks: Vec::new(),
        }
    }

    /// Builds the next track, or `None` when too few events remain.
    pub fn step(&mut self) -> Option<&BlockTrack> {
        if self.pending.is_empty() || self.pending.len() < self.params.min_days {
            return None;
        }

        let mut track = BlockTrack::candidate(self.pending[0]);
        track.begin_linking();

        let mut window_end = 1;
        let mut chain_day = self.pending[0].day;
        while window_end < self.pending.len()
            && self.pending[window_end].day <= chain_day + MAX_DAY_GAP
        {
            chain_day = self.pending[window_end].day;
            window_end += 1;
        }

        let mut linked = vec![true];
        linked.extend(
            self.pending[1..window_end]
                .iter()
                .map(|event| track.try_link(event, &self.ring, self.params.min_overlap)),
        );
        linked.resize(self.pending.len(), false);
        let mut flags = linked.into_iter();
        self.pending.retain(|_| !flags.next().unwrap_or(false));

        track.settle(self.params, &self.ring, self.lon_step);
        self.tracks.push(track);
        self.tracks.last()
    }

    /// Runs linkage to completion.
    pub fn finish(mut self) -> Vec<BlockTrack> {
        while self.step().is_some() {}
        self.tracks
    }
}

// ============================================================================
// Event extraction
// ============================================================================

/// Candidate events of every (season, day), sorted by (season, day, anchor).
///
/// Each run whose count reaches exactly `min_group` yields one event whose band
/// is the whole run.
pub fn extract_events(gibl: &GiblGrid, min_group: usize) -> Vec<BlockEvent> {
    let (_, _, n_lon) = gibl.blocked.dim();
    let ring = LonRing::new(n_lon);
    let target = min_group as u32;
    let mut events = Vec::new();

    for (season, days) in gibl.blocked.outer_iter().enumerate() {
        for (day, row) in days.outer_iter().enumerate() {
            if row.iter().all(|v| *v == 0) {
                continue;
            }
            let counts = ring.run_counts(row);
            let runs = ring.runs(row);
            for (anchor, _) in counts.iter().enumerate().filter(|(_, c)| **c == target) {
                if let Some(band) = runs.iter().find(|band| band.contains(&ring, anchor)) {
                    events.push(BlockEvent {
                        season,
                        day,
                        anchor,
                        band: *band,
                    });
                }
            }
        }
    }
    events
}

/// Drops events with no same-season neighbour within `MAX_DAY_GAP` days.
pub fn consolidate(events: &[BlockEvent]) -> Vec<BlockEvent> {
    let close = |a: &BlockEvent, b: &BlockEvent| {
        a.season == b.season && a.day.abs_diff(b.day) <= MAX_DAY_GAP
    };
    events
        .iter()
        .enumerate()
        .filter(|(i, event)| {
            let before = i.checked_sub(1).and_then(|p| events.get(p));
            let after = events.get(i + 1);
            before.is_some_and(|p| close(p, *event)) || after.is_some_and(|n| close(*event, n))
        })
        .map(|(_, event)| *event)
        .collect()
}

// ============================================================================
// Tracker
// ============================================================================

/// Everything the tracker produced for a run.
#[derive(Debug, Clone)]
pub struct TrackerOutput {
    /// Candidate events before gap consolidation.
    pub events: Vec<BlockEvent>,
    /// Events that survived gap consolidation.
    pub consolidated: usize,
    /// Every settled track, accepted or rejected, in season order.
    pub tracks: Vec<BlockTrack>,
    pub frequency: BlockFrequencyGrid,
}

impl TrackerOutput {
    pub fn accepted(&self) -> impl Iterator<Item = &BlockTrack> {
        self.tracks
            .iter()
            .filter(|t| t.state() == TrackState::Accepted)
    }

    pub fn rejected(&self) -> impl Iterator<Item = &BlockTrack> {
        self.tracks
            .iter()
            .filter(|t| t.state() == TrackState::Rejected)
    }

    /// Rejected tracks of at most `FAILED_TRACK_MAX_DAYS` days.
    pub fn failed(&self) -> impl Iterator<Item = &BlockTrack> {
        self.tracks.iter().filter(|t| t.is_failed())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BlockTracker {
    params: TrackParams,
}

impl BlockTracker {
    pub fn new(params: TrackParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &TrackParams {
        &self.params
    }

    /// Links GIBL bands into tracks and accumulates the frequency grid.
    ///
    /// # Errors
    /// `ShapeMismatch` if the IBL and GIBL grids or the season labels
    /// disagree; nothing is tracked in that case.
    pub fn track(&self, ibl: &IblGrid, gibl: &GiblGrid, years: &[i32]) -> Result<TrackerOutput> {
        let dim = gibl.blocked.dim();
        if ibl.blocked.dim() != dim {
            return Err(BlockingError::ShapeMismatch {
                stage: "track",
                expected: ibl.blocked.shape().to_vec(),
                found: gibl.blocked.shape().to_vec(),
            });
        }
        if years.len() != dim.0 {
            return Err(BlockingError::ShapeMismatch {
                stage: "track",
                expected: vec![dim.0],
                found: vec![years.len()],
            });
        }

        let ring = LonRing::new(dim.2);
        let events = extract_events(gibl, self.params.min_group);
        let kept = consolidate(&events);
        logging::debug(
            Stage::Track,
            None,
            &format!(
                "{} candidate event(s), {} after gap consolidation",
                events.len(),
                kept.len()
            ),
        );

        let mut tracks = Vec::new();
        let mut frequency: BlockFrequencyGrid = Array3::zeros(dim);
        for (season, label) in years.iter().enumerate() {
            let season_events: Vec<BlockEvent> =
                kept.iter().filter(|e| e.season == season).copied().collect();
            let season_tracks = TrackBuilder::new(&self.params, ring, season_events).finish();

            let accepted = season_tracks
                .iter()
                .filter(|t| t.state() == TrackState::Accepted)
                .count();
            logging::log_stage_summary(
                Stage::Track,
                Some(&label.to_string()),
                season_tracks.len(),
                accepted,
            );

            for track in season_tracks.iter().filter(|t| t.state() == TrackState::Accepted) {
                for event in track.events() {
                    let mut row = frequency.slice_mut(s![event.season, event.day, ..]);
                    for lon in event.band.indices(ring) {
                        row[lon] += 1;
                    }
                }
            }
            tracks.extend(season_tracks);
        }

        Ok(TrackerOutput {
            consolidated: kept.len(),
            events,
            tracks,
            frequency,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const N_LON: usize = 360;

    fn event(day: usize, start: usize, len: usize) -> BlockEvent {
        let ring = LonRing::new(N_LON);
        BlockEvent {
            season: 0,
            day,
            anchor: ring.neighbor(start, 14),
            band: LonBand::new(start, len),
        }
    }

    fn build(events: Vec<BlockEvent>) -> Vec<BlockTrack> {
        let params = TrackParams::default();
        TrackBuilder::new(&params, LonRing::new(N_LON), events).finish()
    }

    fn gibl_with_bands(n_days: usize, bands: &[(usize, usize, usize)]) -> GiblGrid {
        let ring = LonRing::new(N_LON);
        let mut blocked = Array3::<u8>::zeros((1, n_days, N_LON));
        for &(day, start, len) in bands {
            for lon in LonBand::new(start, len).indices(ring) {
                blocked[[0, day, lon]] = 1;
            }
        }
        GiblGrid { blocked }
    }

    // ------------------------------------------------------------------------
    // Event extraction and consolidation
    // ------------------------------------------------------------------------

    #[test]
    fn test_extract_one_event_per_wide_run() {
        let gibl = gibl_with_bands(3, &[(0, 100, 25), (0, 200, 10), (1, 350, 20)]);
        let events = extract_events(&gibl, 15);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].day, 0);
        assert_eq!(events[0].anchor, 114);
        assert_eq!(events[0].band, LonBand::new(100, 25));
        assert_eq!(events[1].day, 1);
        assert_eq!(events[1].anchor, 4);
        assert_eq!(events[1].band, LonBand::new(350, 20));
    }

    #[test]
    fn test_consolidation_drops_isolated_events() {
        let events = vec![event(1, 100, 20), event(3, 100, 20), event(9, 100, 20), event(20, 0, 20)];
        let kept = consolidate(&events);
        assert_eq!(kept.iter().map(|e| e.day).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_consolidation_does_not_cross_seasons() {
        let mut next_season = event(1, 100, 20);
        next_season.season = 1;
        let kept = consolidate(&[event(0, 100, 20), next_season]);
        assert!(kept.is_empty());
    }

    // ------------------------------------------------------------------------
    // Linkage and acceptance
    // ------------------------------------------------------------------------

    #[test]
    fn test_six_overlapping_days_make_one_accepted_track() {
        let events: Vec<BlockEvent> = (0..6).map(|d| event(10 + d, 100 + 2 * d, 25)).collect();
        let tracks = build(events);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].state(), TrackState::Accepted);
        assert_eq!(tracks[0].days(), vec![10, 11, 12, 13, 14, 15]);
        assert!(!tracks[0].drift_truncated());
    }

    #[test]
    fn test_four_days_never_become_a_track() {
        let events: Vec<BlockEvent> = (0..4).map(|d| event(10 + d, 100, 25)).collect();
        assert!(build(events).is_empty());
    }

    #[test]
    fn test_one_day_gap_is_bridged() {
        let days = [10, 11, 13, 14, 16];
        let events: Vec<BlockEvent> = days.iter().map(|d| event(*d, 100, 25)).collect();
        let tracks = build(events);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].state(), TrackState::Accepted);
        assert_eq!(tracks[0].len(), 5);
    }

    #[test]
    fn test_insufficient_overlap_breaks_linkage() {
        // Day 3 jumps 15 longitudes: overlap of 10 is not more than 10.
        let mut events: Vec<BlockEvent> = (0..3).map(|d| event(d, 100, 25)).collect();
        events.extend((3..6).map(|d| event(d, 115, 25)));
        let tracks = build(events);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].state(), TrackState::Rejected);
        assert_eq!(tracks[0].days(), vec![0, 1, 2]);
        assert!(!tracks[0].is_failed());
    }

    #[test]
    fn test_short_rejected_track_is_failed_candidate() {
        let mut events = vec![event(0, 10, 20), event(1, 10, 20)];
        events.extend((2..8).map(|d| event(d, 200, 20)));
        let tracks = build(events);
        assert_eq!(tracks.len(), 2);
        assert!(tracks[0].is_failed());
        assert_eq!(tracks[0].state(), TrackState::Rejected);
        assert_eq!(tracks[1].state(), TrackState::Accepted);
        assert_eq!(tracks[1].days(), vec![2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_parallel_bands_form_separate_tracks() {
        let mut events = Vec::new();
        for d in 0..5 {
            events.push(event(d, 20, 20));
            events.push(event(d, 200, 20));
        }
        let tracks = build(events);
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|t| t.state() == TrackState::Accepted));
        assert_eq!(tracks[0].events()[0].band.start, 20);
        assert_eq!(tracks[1].events()[0].band.start, 200);
    }

    #[test]
    fn test_track_across_seam_links() {
        let events: Vec<BlockEvent> = (0..5)
            .map(|d| event(d, LonRing::new(N_LON).neighbor(350, d as isize), 20))
            .collect();
        let tracks = build(events);
        assert_eq!(tracks[0].state(), TrackState::Accepted);
        assert_eq!(tracks[0].len(), 5);
    }

    // ------------------------------------------------------------------------
    // Drift
    // ------------------------------------------------------------------------

    #[test]
    fn test_drift_beyond_limit_discards_short_prefix() {
        let starts = [100, 112, 125, 137, 150];
        let events: Vec<BlockEvent> = starts.iter().enumerate().map(|(d, s)| event(d, *s, 30)).collect();
        let drift = centroid_drift(&events, &LonRing::new(N_LON), 1.0);
        assert_eq!(drift, vec![0.0, 12.0, 25.0, 37.0, 50.0]);

        let tracks = build(events);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].state(), TrackState::Rejected);
        assert!(tracks[0].drift_truncated());
        assert!(!tracks[0].is_failed());
    }

    #[test]
    fn test_drift_truncation_keeps_long_prefix() {
        let starts = [100, 105, 110, 115, 120, 125, 130, 160];
        let mut events: Vec<BlockEvent> = starts.iter().enumerate().map(|(d, s)| event(d, *s, 40)).collect();
        events[7].band = LonBand::new(150, 40);
        let tracks = build(events);
        assert_eq!(tracks[0].state(), TrackState::Accepted);
        assert!(tracks[0].drift_truncated());
        assert_eq!(tracks[0].len(), 7);
    }

    #[test]
    fn test_westward_drift_across_seam() {
        let ring = LonRing::new(N_LON);
        let events: Vec<BlockEvent> = (0..5)
            .map(|d| event(d, ring.neighbor(20, -(d as isize) * 5), 20))
            .collect();
        let drift = centroid_drift(&events, &ring, 1.0);
        assert_eq!(drift, vec![0.0, -5.0, -10.0, -15.0, -20.0]);
    }

    // ------------------------------------------------------------------------
    // Tracker
    // ------------------------------------------------------------------------

    #[test]
    fn test_tracker_accumulates_accepted_bands() {
        let bands: Vec<(usize, usize, usize)> = (5..11).map(|d| (d, 100, 20)).collect();
        let gibl = gibl_with_bands(30, &bands);
        let ibl = IblGrid {
            blocked: gibl.blocked.clone(),
            intensity: Array3::zeros((1, 30, N_LON)),
        };
        let tracker = BlockTracker::new(TrackParams::default()).unwrap();
        let output = tracker.track(&ibl, &gibl, &[2001]).unwrap();

        assert_eq!(output.accepted().count(), 1);
        assert_eq!(output.events.len(), 6);
        assert_eq!(output.consolidated, 6);
        assert_eq!(output.frequency.sum(), 6 * 20);
        assert_eq!(output.frequency[[0, 5, 100]], 1);
        assert_eq!(output.frequency[[0, 10, 119]], 1);
        assert_eq!(output.frequency[[0, 10, 120]], 0);
        assert_eq!(output.frequency[[0, 4, 100]], 0);
    }

    #[test]
    fn test_tracker_rejects_mismatched_grids() {
        let gibl = gibl_with_bands(10, &[]);
        let ibl = IblGrid {
            blocked: Array3::zeros((1, 9, N_LON)),
            intensity: Array3::zeros((1, 9, N_LON)),
        };
        let tracker = BlockTracker::new(TrackParams::default()).unwrap();
        let err = tracker.track(&ibl, &gibl, &[2001]).unwrap_err();
        assert!(matches!(err, BlockingError::ShapeMismatch { stage: "track", .. }));

        let ibl = IblGrid {
            blocked: Array3::zeros((1, 10, N_LON)),
            intensity: Array3::zeros((1, 10, N_LON)),
        };
        assert!(tracker.track(&ibl, &gibl, &[2001, 2002]).is_err());
    }

    #[test]
    fn test_zero_block_time_is_rejected() {
        let params = TrackParams {
            min_days: 0,
            ..TrackParams::default()
        };
        assert!(BlockTracker::new(params).is_err());
    }
}
