//! Storage trait abstractions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{LoadError, StoreResult};
use crate::loader::RecordDiff;
use crate::types::capture::{CaptureId, CaptureMeta, RawCapture};
use crate::types::facility::FacilityId;
use crate::types::history::RunHistoryEntry;
use crate::types::record::CanonicalRecord;

/// Persists raw capture artifacts: one content blob plus one sidecar
/// metadata entry per capture.
#[async_trait]
pub trait CaptureStore: Send + Sync {
    /// Store a capture. Overwrites nothing: every extraction attempt
    /// gets its own capture id.
    async fn put(&self, capture: &RawCapture) -> StoreResult<CaptureId>;

    /// Sidecar metadata for all captures of a facility.
    async fn list(&self, facility_id: FacilityId) -> StoreResult<Vec<CaptureMeta>>;

    /// Fetch one capture, blob included.
    async fn get(&self, capture_id: CaptureId) -> StoreResult<RawCapture>;

    /// Physically delete a capture (blob and sidecar). Irreversible.
    async fn delete(&self, capture_id: CaptureId) -> StoreResult<()>;
}

/// Canonical record storage with per-facility transactional apply.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All stored records for a facility, including soft-deleted ones.
    async fn current_records(&self, facility_id: FacilityId) -> StoreResult<Vec<CanonicalRecord>>;

    /// Apply a reconciliation diff as a single atomic transaction:
    /// either every insert/update/status-flip commits, or the store is
    /// left exactly as before.
    async fn apply_diff(
        &self,
        facility_id: FacilityId,
        diff: &RecordDiff,
    ) -> Result<(), LoadError>;

    /// Availability probe. `StoreError::Unavailable` here aborts the
    /// whole pipeline run before any facility is scheduled.
    async fn ping(&self) -> StoreResult<()>;
}

/// Append-only run ledger.
///
/// The append itself must be atomic under concurrent per-facility
/// writers; no global lock across facilities is implied.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, entry: &RunHistoryEntry) -> StoreResult<()>;

    /// Most recent entry per facility.
    async fn latest_per_facility(&self) -> StoreResult<Vec<RunHistoryEntry>>;

    /// Entries with `started_at` inside `[from, to)`, ordered by
    /// facility then start time.
    async fn entries_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<RunHistoryEntry>>;

    /// All entries for one facility, most recent first.
    async fn entries_for_facility(
        &self,
        facility_id: FacilityId,
    ) -> StoreResult<Vec<RunHistoryEntry>>;
}

// Shared store handles are the common case: the same backend serves the
// pipeline's writers and the reporter.
#[async_trait]
impl<T: HistoryStore + ?Sized> HistoryStore for std::sync::Arc<T> {
    async fn append(&self, entry: &RunHistoryEntry) -> StoreResult<()> {
        (**self).append(entry).await
    }

    async fn latest_per_facility(&self) -> StoreResult<Vec<RunHistoryEntry>> {
        (**self).latest_per_facility().await
    }

    async fn entries_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<RunHistoryEntry>> {
        (**self).entries_in_window(from, to).await
    }

    async fn entries_for_facility(
        &self,
        facility_id: FacilityId,
    ) -> StoreResult<Vec<RunHistoryEntry>> {
        (**self).entries_for_facility(facility_id).await
    }
}
