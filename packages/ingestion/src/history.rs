//! History ledger facade.
//!
//! Thin read/write wrapper over a [`HistoryStore`]. Writers (one per
//! facility run, potentially concurrent) go through `record_run`; the
//! reporter reads windows. Atomicity of the append lives in the store
//! implementation — there is no global lock here.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::StoreResult;
use crate::traits::store::HistoryStore;
use crate::types::facility::FacilityId;
use crate::types::history::RunHistoryEntry;

/// Append-only run ledger keyed by (facility, run timestamp).
pub struct HistoryLog<H: HistoryStore> {
    store: H,
}

impl<H: HistoryStore> HistoryLog<H> {
    pub fn new(store: H) -> Self {
        Self { store }
    }

    /// Append one run's outcome. Entries are immutable after this.
    pub async fn record_run(&self, entry: &RunHistoryEntry) -> StoreResult<()> {
        debug!(
            run = %entry.run_id,
            facility = %entry.facility_id,
            status = entry.status.as_str(),
            found = entry.counts.found,
            "run recorded"
        );
        self.store.append(entry).await
    }

    /// Most recent entry per facility.
    pub async fn latest_per_facility(&self) -> StoreResult<Vec<RunHistoryEntry>> {
        self.store.latest_per_facility().await
    }

    /// Entries started within `[from, to)`.
    pub async fn window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<RunHistoryEntry>> {
        self.store.entries_in_window(from, to).await
    }

    /// Entries from the trailing `days` days.
    pub async fn last_days(&self, days: i64) -> StoreResult<Vec<RunHistoryEntry>> {
        let to = Utc::now();
        let from = to - Duration::days(days);
        self.store.entries_in_window(from, to).await
    }

    /// All entries for one facility, most recent first.
    pub async fn for_facility(&self, facility_id: FacilityId) -> StoreResult<Vec<RunHistoryEntry>> {
        self.store.entries_for_facility(facility_id).await
    }

    pub fn store(&self) -> &H {
        &self.store
    }
}
