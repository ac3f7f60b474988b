//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use crate::error::{LoadError, StoreError, StoreResult};
use crate::loader::RecordDiff;
use crate::traits::store::{CaptureStore, HistoryStore, RecordStore};
use crate::types::capture::{CaptureId, CaptureMeta, RawCapture};
use crate::types::facility::FacilityId;
use crate::types::history::RunHistoryEntry;
use crate::types::record::{CanonicalRecord, RecordStatus};

/// In-memory records, history, and captures.
///
/// Data is lost on restart; useful for tests and local development.
/// `fail_next_apply` injects a transaction failure for atomicity tests.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<FacilityId, HashMap<String, CanonicalRecord>>>,
    history: Mutex<Vec<RunHistoryEntry>>,
    captures: RwLock<HashMap<CaptureId, RawCapture>>,
    fail_next_apply: AtomicBool,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `apply_diff` fail before touching any state.
    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }

    /// Make `ping` report the store as unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn record_count(&self, facility_id: FacilityId) -> usize {
        self.records
            .read()
            .unwrap()
            .get(&facility_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().unwrap().len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn current_records(&self, facility_id: FacilityId) -> StoreResult<Vec<CanonicalRecord>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked down".into()));
        }
        Ok(self
            .records
            .read()
            .unwrap()
            .get(&facility_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn apply_diff(
        &self,
        facility_id: FacilityId,
        diff: &RecordDiff,
    ) -> Result<(), LoadError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LoadError::Unavailable("memory store marked down".into()));
        }
        // Injected failure happens before any mutation, mirroring a
        // rolled-back transaction.
        if self.fail_next_apply.swap(false, Ordering::SeqCst) {
            return Err(LoadError::Transaction(
                "injected transaction failure".into(),
            ));
        }

        let mut all = self.records.write().unwrap();
        let facility_records = all.entry(facility_id).or_default();

        for record in &diff.added {
            if facility_records.contains_key(&record.natural_key) {
                return Err(LoadError::Constraint(format!(
                    "duplicate natural key {}",
                    record.natural_key
                )));
            }
        }

        for record in &diff.added {
            facility_records.insert(record.natural_key.clone(), record.clone());
        }
        for record in &diff.updated {
            facility_records.insert(record.natural_key.clone(), record.clone());
        }
        for key in &diff.removed {
            if let Some(record) = facility_records.get_mut(key) {
                record.status = RecordStatus::Removed;
                record.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store marked down".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append(&self, entry: &RunHistoryEntry) -> StoreResult<()> {
        // The lock makes the append atomic; writers for different
        // facilities contend only for this push.
        self.history.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn latest_per_facility(&self) -> StoreResult<Vec<RunHistoryEntry>> {
        let history = self.history.lock().unwrap();
        let mut latest: HashMap<FacilityId, RunHistoryEntry> = HashMap::new();
        for entry in history.iter() {
            match latest.get(&entry.facility_id) {
                Some(existing) if existing.started_at >= entry.started_at => {}
                _ => {
                    latest.insert(entry.facility_id, entry.clone());
                }
            }
        }
        Ok(latest.into_values().collect())
    }

    async fn entries_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<RunHistoryEntry>> {
        let mut entries: Vec<RunHistoryEntry> = self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.started_at >= from && e.started_at < to)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            (a.facility_id.0, a.started_at).cmp(&(b.facility_id.0, b.started_at))
        });
        Ok(entries)
    }

    async fn entries_for_facility(
        &self,
        facility_id: FacilityId,
    ) -> StoreResult<Vec<RunHistoryEntry>> {
        let mut entries: Vec<RunHistoryEntry> = self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.facility_id == facility_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(entries)
    }
}

#[async_trait]
impl CaptureStore for MemoryStore {
    async fn put(&self, capture: &RawCapture) -> StoreResult<CaptureId> {
        let id = capture.id();
        self.captures.write().unwrap().insert(id, capture.clone());
        Ok(id)
    }

    async fn list(&self, facility_id: FacilityId) -> StoreResult<Vec<CaptureMeta>> {
        let mut metas: Vec<CaptureMeta> = self
            .captures
            .read()
            .unwrap()
            .values()
            .filter(|c| c.meta.facility_id == facility_id)
            .map(|c| c.meta.clone())
            .collect();
        metas.sort_by_key(|m| m.captured_at);
        Ok(metas)
    }

    async fn get(&self, capture_id: CaptureId) -> StoreResult<RawCapture> {
        self.captures
            .read()
            .unwrap()
            .get(&capture_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("capture {capture_id}")))
    }

    async fn delete(&self, capture_id: CaptureId) -> StoreResult<()> {
        self.captures.write().unwrap().remove(&capture_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::compute_diff;

    fn record(facility: FacilityId, key: &str) -> CanonicalRecord {
        CanonicalRecord::new(facility, key, "cat", key)
    }

    #[tokio::test]
    async fn apply_then_reapply_is_idempotent() {
        let store = MemoryStore::new();
        let f = FacilityId::new();
        let set = vec![record(f, "A"), record(f, "B")];

        let diff = compute_diff(&[], &set);
        store.apply_diff(f, &diff).await.unwrap();
        assert_eq!(store.record_count(f), 2);

        let current = store.current_records(f).await.unwrap();
        let second = compute_diff(&current, &set);
        assert!(second.is_noop());
    }

    #[tokio::test]
    async fn injected_failure_leaves_store_untouched() {
        let store = MemoryStore::new();
        let f = FacilityId::new();
        store.apply_diff(f, &compute_diff(&[], &[record(f, "A")])).await.unwrap();

        store.fail_next_apply();
        let before = store.current_records(f).await.unwrap();
        let diff = compute_diff(&before, &[record(f, "A"), record(f, "B")]);
        assert!(store.apply_diff(f, &diff).await.is_err());

        let after = store.current_records(f).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn latest_per_facility_picks_newest() {
        use crate::types::history::{RunHistoryEntry, RunStatus};
        use chrono::Duration;

        let store = MemoryStore::new();
        let f = FacilityId::new();
        let old = RunHistoryEntry::new(f, Utc::now() - Duration::hours(2), RunStatus::Failed);
        let new = RunHistoryEntry::new(f, Utc::now(), RunStatus::Success);
        store.append(&old).await.unwrap();
        store.append(&new).await.unwrap();

        let latest = store.latest_per_facility().await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].run_id, new.run_id);
    }
}
