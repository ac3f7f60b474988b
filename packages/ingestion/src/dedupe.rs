//! Deduplication cleaner for raw captures.
//!
//! Re-runs and retries leave multiple captures of the same facility for
//! the same scrape window, some of them short (a transient site issue
//! extracted fewer records). Within each window exactly one capture
//! survives: the one that saw the most records, ties broken by the most
//! recent timestamp. The rest are physically deleted, so this must only
//! run after extraction has finished with the facility's captures.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::info;

use crate::error::StoreResult;
use crate::traits::store::CaptureStore;
use crate::types::capture::CaptureMeta;
use crate::types::facility::FacilityId;

/// Result of one dedupe pass over a facility.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupeOutcome {
    /// Captures deleted across all windows.
    pub removed: usize,
    /// Captures retained (one per window).
    pub retained: usize,
}

/// Pick the authoritative capture among duplicates: highest record
/// count, then most recent timestamp.
pub fn select_survivor(captures: &[CaptureMeta]) -> Option<&CaptureMeta> {
    captures
        .iter()
        .max_by_key(|c| (c.record_count, c.captured_at))
}

/// Group captures into logical scrape windows (same UTC calendar day).
fn by_window(captures: Vec<CaptureMeta>) -> BTreeMap<NaiveDate, Vec<CaptureMeta>> {
    let mut windows: BTreeMap<NaiveDate, Vec<CaptureMeta>> = BTreeMap::new();
    for capture in captures {
        windows
            .entry(capture.captured_at.date_naive())
            .or_default()
            .push(capture);
    }
    windows
}

/// Deduplicate a facility's captures, deleting everything but the
/// survivor of each window. Idempotent: a window that already holds a
/// single capture is a no-op.
pub async fn dedupe_facility<C: CaptureStore>(
    store: &C,
    facility_id: FacilityId,
) -> StoreResult<DedupeOutcome> {
    let captures = store.list(facility_id).await?;
    let mut outcome = DedupeOutcome::default();

    for (window, group) in by_window(captures) {
        let survivor = match select_survivor(&group) {
            Some(s) => s.id,
            None => continue,
        };
        outcome.retained += 1;

        let mut removed_here = 0usize;
        for capture in &group {
            if capture.id != survivor {
                store.delete(capture.id).await?;
                removed_here += 1;
            }
        }
        outcome.removed += removed_here;

        if removed_here > 0 {
            info!(
                facility = %facility_id,
                %window,
                removed = removed_here,
                "{removed_here} duplicate capture(s) removed"
            );
        }
    }

    Ok(outcome)
}
