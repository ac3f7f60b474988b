//! Summary reporting over the run history.
//!
//! Read-only aggregation: success rates, count totals, and flags for
//! facilities whose extractor looks silently broken (N consecutive
//! failed or zero-found runs).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::StoreResult;
use crate::history::HistoryLog;
use crate::traits::store::HistoryStore;
use crate::types::facility::FacilityId;
use crate::types::history::{RunHistoryEntry, RunStatus};

/// Per-facility aggregation over the report window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FacilityStats {
    pub runs: usize,
    pub successes: usize,
    pub failures: usize,
    pub found: usize,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub skipped: usize,
}

impl FacilityStats {
    pub fn success_rate(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            self.successes as f64 / self.runs as f64
        }
    }
}

/// Why a facility was flagged for operator attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    ConsecutiveFailures,
    /// Runs keep succeeding but extract zero records — the classic
    /// signature of a source that changed shape under a still-matching
    /// selector.
    ConsecutiveZeroFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlaggedFacility {
    pub facility_id: FacilityId,
    pub reason: FlagReason,
    pub streak: usize,
}

/// The report itself. Produced on demand; mutates nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub per_facility: BTreeMap<String, FacilityStats>,
    pub total_runs: usize,
    pub total_successes: usize,
    pub totals: FacilityStats,
    pub flagged: Vec<FlaggedFacility>,
}

impl SummaryReport {
    pub fn overall_success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.total_successes as f64 / self.total_runs as f64
        }
    }
}

/// Build a summary over entries in `[from, to)`.
///
/// `consecutive_threshold` is the streak length (of failed runs, or of
/// zero-found runs) that flags a facility. Streaks are evaluated over
/// the window's most recent runs per facility, in start order.
pub fn summarize(
    entries: &[RunHistoryEntry],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    consecutive_threshold: usize,
) -> SummaryReport {
    let mut per_facility: BTreeMap<String, FacilityStats> = BTreeMap::new();
    let mut by_facility: BTreeMap<String, Vec<&RunHistoryEntry>> = BTreeMap::new();
    let mut totals = FacilityStats::default();

    for entry in entries {
        let key = entry.facility_id.to_string();
        let stats = per_facility.entry(key.clone()).or_default();
        stats.runs += 1;
        totals.runs += 1;
        match entry.status {
            RunStatus::Success => {
                stats.successes += 1;
                totals.successes += 1;
            }
            RunStatus::Failed => {
                stats.failures += 1;
                totals.failures += 1;
            }
            RunStatus::Partial => {}
        }
        stats.found += entry.counts.found;
        stats.added += entry.counts.added;
        stats.updated += entry.counts.updated;
        stats.removed += entry.counts.removed;
        stats.skipped += entry.counts.skipped;
        totals.found += entry.counts.found;
        totals.added += entry.counts.added;
        totals.updated += entry.counts.updated;
        totals.removed += entry.counts.removed;
        totals.skipped += entry.counts.skipped;

        by_facility.entry(key).or_default().push(entry);
    }

    let mut flagged = Vec::new();
    for mut runs in by_facility.into_values() {
        runs.sort_by_key(|e| e.started_at);
        let facility_id = runs[0].facility_id;

        let failed_streak = trailing_streak(&runs, |e| e.status == RunStatus::Failed);
        if failed_streak >= consecutive_threshold {
            flagged.push(FlaggedFacility {
                facility_id,
                reason: FlagReason::ConsecutiveFailures,
                streak: failed_streak,
            });
            continue;
        }

        let zero_streak = trailing_streak(&runs, |e| {
            e.status != RunStatus::Failed && e.counts.found == 0
        });
        if zero_streak >= consecutive_threshold {
            flagged.push(FlaggedFacility {
                facility_id,
                reason: FlagReason::ConsecutiveZeroFound,
                streak: zero_streak,
            });
        }
    }

    let total_runs = totals.runs;
    let total_successes = totals.successes;
    SummaryReport {
        window_start: from,
        window_end: to,
        per_facility,
        total_runs,
        total_successes,
        totals,
        flagged,
    }
}

/// Convenience: read a trailing window from the ledger and summarize it.
pub async fn report_window<H: HistoryStore>(
    history: &HistoryLog<H>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    consecutive_threshold: usize,
) -> StoreResult<SummaryReport> {
    let entries = history.window(from, to).await?;
    Ok(summarize(&entries, from, to, consecutive_threshold))
}

fn trailing_streak(runs: &[&RunHistoryEntry], pred: impl Fn(&RunHistoryEntry) -> bool) -> usize {
    runs.iter().rev().take_while(|e| pred(e)).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::history::{RunCounts, RunHistoryEntry};
    use chrono::{Duration, TimeZone};

    fn entry(
        facility: FacilityId,
        offset_hours: i64,
        status: RunStatus,
        found: usize,
    ) -> RunHistoryEntry {
        let started = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap()
            + Duration::hours(offset_hours);
        let mut e = RunHistoryEntry::new(facility, started, status);
        e.counts = RunCounts {
            found,
            ..Default::default()
        };
        e
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let from = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        (from, from + Duration::days(7))
    }

    #[test]
    fn success_rate_per_facility() {
        let f = FacilityId::new();
        let entries = vec![
            entry(f, 0, RunStatus::Success, 10),
            entry(f, 1, RunStatus::Failed, 0),
            entry(f, 2, RunStatus::Success, 12),
            entry(f, 3, RunStatus::Success, 12),
        ];
        let (from, to) = window();
        let report = summarize(&entries, from, to, 3);

        let stats = &report.per_facility[&f.to_string()];
        assert_eq!(stats.runs, 4);
        assert_eq!(stats.successes, 3);
        assert!((stats.success_rate() - 0.75).abs() < 1e-9);
        assert_eq!(report.totals.found, 34);
        assert!(report.flagged.is_empty());
    }

    #[test]
    fn consecutive_failures_flag() {
        let f = FacilityId::new();
        let entries = vec![
            entry(f, 0, RunStatus::Success, 10),
            entry(f, 1, RunStatus::Failed, 0),
            entry(f, 2, RunStatus::Failed, 0),
            entry(f, 3, RunStatus::Failed, 0),
        ];
        let (from, to) = window();
        let report = summarize(&entries, from, to, 3);
        assert_eq!(report.flagged.len(), 1);
        assert_eq!(report.flagged[0].reason, FlagReason::ConsecutiveFailures);
        assert_eq!(report.flagged[0].streak, 3);
    }

    #[test]
    fn zero_found_streak_flags_silently_broken_extractor() {
        let f = FacilityId::new();
        let entries = vec![
            entry(f, 0, RunStatus::Success, 8),
            entry(f, 1, RunStatus::Success, 0),
            entry(f, 2, RunStatus::Success, 0),
            entry(f, 3, RunStatus::Success, 0),
        ];
        let (from, to) = window();
        let report = summarize(&entries, from, to, 3);
        assert_eq!(report.flagged.len(), 1);
        assert_eq!(report.flagged[0].reason, FlagReason::ConsecutiveZeroFound);
    }

    #[test]
    fn a_recent_success_resets_the_failure_streak() {
        let f = FacilityId::new();
        let entries = vec![
            entry(f, 0, RunStatus::Failed, 0),
            entry(f, 1, RunStatus::Failed, 0),
            entry(f, 2, RunStatus::Success, 9),
        ];
        let (from, to) = window();
        let report = summarize(&entries, from, to, 2);
        assert!(report.flagged.is_empty());
    }
}
