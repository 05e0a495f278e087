//! Run Report Module
//!
//! Condenses a pipeline run into per-season counts that can be serialized
//! next to the output grids or printed at the end of a run.

use chrono::Utc;
use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::analysis::pipeline::BlockingOutput;
use crate::analysis::tracker::BlockTrack;

// ============================================================================
// Report records
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockingReport {
    pub timestamp: String,
    pub method: String,
    pub seasons: Vec<SeasonSummary>,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeasonSummary {
    pub year: i32,
    pub status: SeasonStatus,
    /// Blocked (day, longitude) cells after IBL detection.
    pub ibl_cells: usize,
    /// Blocked (day, longitude) cells after grouping.
    pub gibl_cells: usize,
    pub candidate_events: usize,
    pub accepted_tracks: usize,
    pub rejected_tracks: usize,
    pub failed_tracks: usize,
    pub drift_truncated: usize,
    /// Days covered by at least one accepted track.
    pub blocked_days: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub seasons: usize,
    pub days_per_season: usize,
    pub candidate_events: usize,
    pub consolidated_events: usize,
    pub accepted_tracks: usize,
    pub rejected_tracks: usize,
    pub failed_tracks: usize,
    pub blocked_days: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SeasonStatus {
    /// At least one track was accepted.
    Blocked,
    /// Candidate bands appeared but none formed an accepted track.
    CandidatesOnly,
    /// No band was wide enough to be a candidate.
    Quiet,
}

// ============================================================================
// Building
// ============================================================================

impl BlockingReport {
    pub fn from_output(output: &BlockingOutput) -> Self {
        let tracks = &output.tracks;
        let seasons: Vec<SeasonSummary> = output
            .years
            .iter()
            .enumerate()
            .map(|(season, year)| {
                let in_season = |t: &&BlockTrack| t.season() == season;
                let accepted: Vec<&BlockTrack> = tracks.accepted().filter(in_season).collect();
                let candidate_events = tracks.events.iter().filter(|e| e.season == season).count();

                let mut days: Vec<usize> = accepted.iter().flat_map(|t| t.days()).collect();
                days.sort_unstable();
                days.dedup();

                let status = if !accepted.is_empty() {
                    SeasonStatus::Blocked
                } else if candidate_events > 0 {
                    SeasonStatus::CandidatesOnly
                } else {
                    SeasonStatus::Quiet
                };

                SeasonSummary {
                    year: *year,
                    status,
                    ibl_cells: count_cells(output.ibl.blocked.index_axis(Axis(0), season)),
                    gibl_cells: count_cells(output.gibl.blocked.index_axis(Axis(0), season)),
                    candidate_events,
                    accepted_tracks: accepted.len(),
                    rejected_tracks: tracks.rejected().filter(in_season).count(),
                    failed_tracks: tracks.failed().filter(in_season).count(),
                    drift_truncated: tracks
                        .tracks
                        .iter()
                        .filter(in_season)
                        .filter(|t| t.drift_truncated())
                        .count(),
                    blocked_days: days.len(),
                }
            })
            .collect();

        let summary = RunSummary {
            seasons: seasons.len(),
            days_per_season: output.ibl.blocked.shape()[1],
            candidate_events: tracks.events.len(),
            consolidated_events: tracks.consolidated,
            accepted_tracks: seasons.iter().map(|s| s.accepted_tracks).sum(),
            rejected_tracks: seasons.iter().map(|s| s.rejected_tracks).sum(),
            failed_tracks: seasons.iter().map(|s| s.failed_tracks).sum(),
            blocked_days: seasons.iter().map(|s| s.blocked_days).sum(),
        };

        Self {
            timestamp: Utc::now().to_rfc3339(),
            method: output.method.to_string(),
            seasons,
            summary,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

fn count_cells(grid: ArrayView2<u8>) -> usize {
    grid.iter().filter(|v| **v != 0).count()
}

// ============================================================================
// Console output
// ============================================================================

pub fn print_summary(report: &BlockingReport) {
    println!("\n═══════════════════════════════════════════════════════════");
    println!("BLOCKING SUMMARY ({})", report.method);
    println!("═══════════════════════════════════════════════════════════");
    println!();
    println!("Season   IBL cells  GIBL cells  Events  Accepted  Rejected  Failed  Days");
    for season in &report.seasons {
        println!(
            "{:<8} {:>9}  {:>10}  {:>6}  {:>8}  {:>8}  {:>6}  {:>4}",
            season.year,
            season.ibl_cells,
            season.gibl_cells,
            season.candidate_events,
            season.accepted_tracks,
            season.rejected_tracks,
            season.failed_tracks,
            season.blocked_days
        );
    }
    println!();

    let total_days = report.summary.seasons * report.summary.days_per_season;
    let blocked_rate = if total_days > 0 {
        (report.summary.blocked_days as f64 / total_days as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Tracks: {} accepted, {} rejected ({} failed candidates)",
        report.summary.accepted_tracks, report.summary.rejected_tracks, report.summary.failed_tracks
    );
    println!(
        "Blocked days: {:.1}% ({}/{})",
        blocked_rate, report.summary.blocked_days, total_days
    );
    println!("═══════════════════════════════════════════════════════════");
}

// ============================================================================
// Tests
// ============================================================================
