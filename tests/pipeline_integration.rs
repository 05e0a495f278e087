/// End-to-end tests for the blocking pipeline
///
/// Tests verify:
/// 1. A persistent, stationary ridge produces block frequency exactly where
///    and when it sits, and nowhere else
/// 2. Track acceptance depends on persistence (6 days kept, 4 days dropped)
/// 3. Drifting bands are truncated and discarded when the prefix is short
/// 4. Longitude grouping treats the axis as a ring
///
/// Fields are synthetic and built in memory; no files or network needed.
///
/// Run with: cargo test --test pipeline_integration

use ndarray::{Array, Array1, Array3, Array4, s};
use s2s_blocking::analysis::{
    BlockTracker, CblEstimator, GiblGrouper, LonRing, TrackParams, TrackState,
};
use s2s_blocking::config::parse_config;
use s2s_blocking::model::{AnomalyField, GiblGrid, GridAxes, IblGrid};
use s2s_blocking::report::{BlockingReport, SeasonStatus};
use s2s_blocking::{BlockingError, BlockingPipeline};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const CONFIG: &str = r#"
    [blocking]
    BLOCKING_VAR = "Z500_ANOM"
    SMOOTHING_PTS = 9
    LAT_DELTA = "-5,0,5"
    IBL_IN_GIBL = 15
    GIBL_OVERLAP = 10
    BLOCK_TIME = 5
    BLOCK_TRAVEL = 45
    BLOCK_METHOD = "PH"
    VALID_BEG = "2000120100"
    VALID_END = "2002022800"
"#;

fn one_degree_axes() -> GridAxes {
    GridAxes::new(
        Array::range(90.0, -1.0, -1.0),
        Array::range(0.0, 360.0, 1.0),
    )
    .expect("1-degree axes should validate")
}

/// Day-to-day variability peaking at 50N at every longitude.
fn storm_track_field(n_years: usize, n_days: usize) -> AnomalyField {
    let axes = one_degree_axes();
    let lats = axes.lats.clone();
    let data = Array4::from_shape_fn((n_years, n_days, axes.n_lat(), axes.n_lon()), |(_, d, j, _)| {
        let sign = if d % 2 == 0 { 1.0 } else { -1.0 };
        sign * 100.0 / (1.0 + (lats[j] - 50.0).abs())
    });
    AnomalyField::new(data, axes, vec![2001, 2002]).expect("field should build")
}

/// Zero field with a +100 ridge over 55-75N, 110-130E, days 10-20 of the
/// first season.
fn ridge_field(n_years: usize, n_days: usize) -> AnomalyField {
    let axes = one_degree_axes();
    let lats = axes.lats.clone();
    let data = Array4::from_shape_fn((n_years, n_days, axes.n_lat(), axes.n_lon()), |(y, d, j, i)| {
        let in_ridge = y == 0
            && (10..=20).contains(&d)
            && (110..=130).contains(&i)
            && (55.0..=75.0).contains(&lats[j]);
        if in_ridge { 100.0 } else { 0.0 }
    });
    AnomalyField::new(data, axes, vec![2001, 2002]).expect("field should build")
}

fn gibl_from_bands(n_days: usize, bands: &[(usize, usize, usize)]) -> (IblGrid, GiblGrid) {
    let ring = LonRing::new(360);
    let mut blocked = Array3::<u8>::zeros((1, n_days, 360));
    for &(day, start, len) in bands {
        for k in 0..len {
            blocked[[0, day, ring.neighbor(start, k as isize)]] = 1;
        }
    }
    let ibl = IblGrid {
        blocked: blocked.clone(),
        intensity: Array3::zeros((1, n_days, 360)),
    };
    (ibl, GiblGrid { blocked })
}

// ---------------------------------------------------------------------------
// End-to-end
// ---------------------------------------------------------------------------

#[test]
fn test_stationary_ridge_yields_frequency_only_where_it_sits() {
    let config = parse_config(CONFIG).expect("config should parse").blocking;
    let pipeline = BlockingPipeline::new(config).expect("pipeline should build");

    let output = pipeline
        .run(&storm_track_field(2, 90), &ridge_field(2, 90))
        .expect("pipeline should run");

    assert!(
        output.cbl.latitudes.iter().all(|lat| *lat == 50.0),
        "CBL should sit on the variability peak"
    );

    let frequency = output.frequency();
    assert_eq!(frequency.dim(), (2, 90, 360));
    for ((y, d, i), value) in frequency.indexed_iter() {
        let inside = y == 0 && (10..=20).contains(&d) && (110..=130).contains(&i);
        if inside {
            assert_eq!(*value, 1, "expected block at year {} day {} lon {}", y, d, i);
        } else {
            assert_eq!(*value, 0, "unexpected block at year {} day {} lon {}", y, d, i);
        }
    }

    assert_eq!(output.tracks.accepted().count(), 1);
    let track = output.tracks.accepted().next().expect("one accepted track");
    assert_eq!(track.days(), (10..=20).collect::<Vec<_>>());
    assert!(!track.drift_truncated());

    let report = BlockingReport::from_output(&output);
    assert_eq!(report.method, "PH");
    assert_eq!(report.seasons[0].status, SeasonStatus::Blocked);
    assert_eq!(report.seasons[0].blocked_days, 11);
    assert_eq!(report.seasons[1].status, SeasonStatus::Quiet);
    assert_eq!(report.summary.accepted_tracks, 1);
}

#[test]
fn test_supplied_cbl_matches_estimated_run() {
    let config = parse_config(CONFIG).unwrap().blocking;
    let pipeline = BlockingPipeline::new(config).unwrap();
    let cbl = pipeline.estimate_cbl(&storm_track_field(2, 30)).unwrap();
    let output = pipeline.run_with_cbl(cbl, &ridge_field(2, 30)).unwrap();
    assert_eq!(output.frequency().sum(), 11 * 21);
}

#[test]
fn test_unsupported_method_fails_before_any_processing() {
    let text = CONFIG.replace("BLOCK_METHOD = \"PH\"", "BLOCK_METHOD = \"TM\"");
    let err = parse_config(&text).expect_err("TM is not implemented");
    assert!(matches!(err, BlockingError::UnsupportedMethod(ref tag) if tag == "TM"));
}

// ---------------------------------------------------------------------------
// Tracking properties
// ---------------------------------------------------------------------------

#[test]
fn test_six_day_sequence_is_one_accepted_track() {
    let bands: Vec<_> = (0..6).map(|d| (20 + d, 100 + d, 20)).collect();
    let (ibl, gibl) = gibl_from_bands(40, &bands);
    let tracker = BlockTracker::new(TrackParams::default()).unwrap();
    let output = tracker.track(&ibl, &gibl, &[2001]).unwrap();

    let accepted: Vec<_> = output.accepted().collect();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].days(), vec![20, 21, 22, 23, 24, 25]);
    assert_eq!(accepted[0].state(), TrackState::Accepted);
}

#[test]
fn test_four_day_sequence_is_not_a_block() {
    let bands: Vec<_> = (0..4).map(|d| (20 + d, 100 + d, 20)).collect();
    let (ibl, gibl) = gibl_from_bands(40, &bands);
    let tracker = BlockTracker::new(TrackParams::default()).unwrap();
    let output = tracker.track(&ibl, &gibl, &[2001]).unwrap();
    assert_eq!(output.accepted().count(), 0);
    assert_eq!(output.frequency.sum(), 0);
}

#[test]
fn test_drift_of_fifty_degrees_discards_track() {
    let bands: Vec<_> = [100, 112, 125, 137, 150]
        .iter()
        .enumerate()
        .map(|(d, start)| (d, *start, 30))
        .collect();
    let (ibl, gibl) = gibl_from_bands(10, &bands);
    let tracker = BlockTracker::new(TrackParams::default()).unwrap();
    let output = tracker.track(&ibl, &gibl, &[2001]).unwrap();

    assert_eq!(output.accepted().count(), 0);
    let rejected: Vec<_> = output.rejected().collect();
    assert_eq!(rejected.len(), 1);
    assert!(rejected[0].drift_truncated());
    assert_eq!(output.frequency.sum(), 0);
}

#[test]
fn test_block_across_the_dateline_is_tracked() {
    let bands: Vec<_> = (0..6).map(|d| (d, 350, 25)).collect();
    let (ibl, gibl) = gibl_from_bands(10, &bands);
    let tracker = BlockTracker::new(TrackParams::default()).unwrap();
    let output = tracker.track(&ibl, &gibl, &[2001]).unwrap();

    assert_eq!(output.accepted().count(), 1);
    assert_eq!(output.frequency[[0, 3, 355]], 1);
    assert_eq!(output.frequency[[0, 3, 14]], 1);
    assert_eq!(output.frequency[[0, 3, 15]], 0);
}

// ---------------------------------------------------------------------------
// Circular geometry
// ---------------------------------------------------------------------------

#[test]
fn test_seam_longitudes_group_into_one_band() {
    let grouper = GiblGrouper::new(4, 2.0).unwrap();
    let mut row = Array1::<u8>::zeros(360);
    for i in [358, 359, 0, 1] {
        row[i] = 1;
    }
    let bands = grouper.bands(row.view());
    assert_eq!(bands.len(), 1);
    assert_eq!(bands[0].start, 358);
    assert_eq!(bands[0].len, 4);
}

#[test]
fn test_grouping_is_idempotent_on_default_thresholds() {
    let grouper = GiblGrouper::new(15, 7.5).unwrap();
    let mut row = Array1::<u8>::zeros(360);
    row.slice_mut(s![40..50]).fill(1);
    row.slice_mut(s![55..70]).fill(1);
    row.slice_mut(s![340..360]).fill(1);
    row.slice_mut(s![0..3]).fill(1);
    let once = grouper.group_row(row.view());
    assert_eq!(grouper.group_row(once.view()), once);
}

#[test]
fn test_cbl_rotates_with_the_field() {
    let axes = one_degree_axes();
    let lats = axes.lats.clone();
    // Peak latitude varies with longitude.
    let peak = |i: usize| 40.0 + ((i / 30) % 4) as f64 * 5.0;
    let base = Array4::from_shape_fn((1, 12, axes.n_lat(), axes.n_lon()), |(_, d, j, i)| {
        let sign = if d % 2 == 0 { 1.0 } else { -1.0 };
        sign * 100.0 / (1.0 + (lats[j] - peak(i)).abs())
    });
    let k = 47;
    let rotated = Array4::from_shape_fn(base.dim(), |(y, d, j, i)| base[[y, d, j, (i + 360 - k) % 360]]);

    let estimator = CblEstimator::new(9).unwrap();
    let a = estimator
        .estimate(&AnomalyField::new(base, axes.clone(), vec![2001]).unwrap())
        .unwrap();
    let b = estimator
        .estimate(&AnomalyField::new(rotated, axes, vec![2001]).unwrap())
        .unwrap();
    for i in 0..360 {
        assert_eq!(b.latitudes[[0, (i + k) % 360]], a.latitudes[[0, i]]);
    }
}
