//! Reconciliation loader: diff a facility's fresh canonical record set
//! against stored state and apply it atomically.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::LoadError;
use crate::traits::store::RecordStore;
use crate::types::facility::FacilityId;
use crate::types::history::RunCounts;
use crate::types::record::{CanonicalRecord, RecordStatus};

/// Three-way diff of a facility's record set, keyed by natural key.
#[derive(Debug, Clone, Default)]
pub struct RecordDiff {
    /// Present only in the new set.
    pub added: Vec<CanonicalRecord>,
    /// Present in both with at least one tracked attribute changed.
    pub updated: Vec<CanonicalRecord>,
    /// Natural keys present only in the old set (and not already
    /// removed); the store flips their status to `Removed` but keeps
    /// the rows.
    pub removed: Vec<String>,
    /// Present in both, byte-for-byte same tracked attributes. No write.
    pub unchanged: usize,
}

impl RecordDiff {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Counts as they would appear in a run history entry. `found` is
    /// the size of the new set; `skipped` is supplied by normalization.
    pub fn counts(&self, found: usize, skipped: usize) -> RunCounts {
        RunCounts {
            found,
            added: self.added.len(),
            updated: self.updated.len(),
            removed: self.removed.len(),
            skipped,
        }
    }
}

/// Compute the reconciliation diff between stored records and a freshly
/// normalized set.
///
/// Rules, keyed by natural key:
/// - only in `new` → added
/// - in both, tracked attributes differ → updated (a record that was
///   soft-removed and reappears comes back this way)
/// - only in `old`, not already `Removed` → removed
/// - in both, unchanged → unchanged
///
/// Already-removed records that stay absent are left alone, which is
/// what makes repeated reconciliation of the same set a no-op.
pub fn compute_diff(old: &[CanonicalRecord], new: &[CanonicalRecord]) -> RecordDiff {
    let old_by_key: HashMap<&str, &CanonicalRecord> = old
        .iter()
        .map(|r| (r.natural_key.as_str(), r))
        .collect();

    let mut diff = RecordDiff::default();
    let mut seen_keys: Vec<&str> = Vec::with_capacity(new.len());

    for record in new {
        seen_keys.push(record.natural_key.as_str());
        match old_by_key.get(record.natural_key.as_str()) {
            None => diff.added.push(record.clone()),
            Some(existing) => {
                if existing.same_attributes(record) {
                    diff.unchanged += 1;
                } else {
                    diff.updated.push(record.clone());
                }
            }
        }
    }

    for record in old {
        if record.status != RecordStatus::Removed
            && !seen_keys.contains(&record.natural_key.as_str())
        {
            diff.removed.push(record.natural_key.clone());
        }
    }

    diff
}

/// Diff and apply in one step.
///
/// The whole diff goes through `RecordStore::apply_diff` as a single
/// transaction. On failure the store is untouched, but the computed
/// counts are still returned inside the error path by the caller (the
/// pipeline records what *would* have happened for diagnostics).
pub async fn load<S: RecordStore>(
    store: &S,
    facility_id: FacilityId,
    new_records: &[CanonicalRecord],
    skipped: usize,
) -> Result<RunCounts, (LoadError, RunCounts)> {
    let old = match store.current_records(facility_id).await {
        Ok(records) => records,
        Err(e) => {
            // An unreachable store stays distinguishable: the pipeline
            // stops scheduling further facilities on it.
            let err = match e {
                crate::error::StoreError::Unavailable(msg) => LoadError::Unavailable(msg),
                other => LoadError::Transaction(Box::new(other)),
            };
            return Err((
                err,
                RunCounts {
                    found: new_records.len(),
                    skipped,
                    ..Default::default()
                },
            ));
        }
    };

    let diff = compute_diff(&old, new_records);
    let counts = diff.counts(new_records.len(), skipped);

    if diff.is_noop() {
        debug!(facility = %facility_id, "reconciliation no-op");
        return Ok(counts);
    }

    match store.apply_diff(facility_id, &diff).await {
        Ok(()) => {
            info!(
                facility = %facility_id,
                added = counts.added,
                updated = counts.updated,
                removed = counts.removed,
                unchanged = diff.unchanged,
                "reconciliation applied"
            );
            Ok(counts)
        }
        Err(e) => Err((e, counts)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::record::content_natural_key;
    use chrono::NaiveDate;

    fn record(facility: FacilityId, key: &str, name: &str) -> CanonicalRecord {
        CanonicalRecord::new(facility, key, "cat", name)
    }

    #[test]
    fn diff_partitions_old_and_new_keys() {
        let f = FacilityId::new();
        // Store holds {A, D}; new set is {A', B, C}.
        let a_old = record(f, "A", "Mike");
        let d_old = record(f, "D", "Tama");
        let mut a_new = record(f, "A", "Mike");
        a_new.color = Some("calico".into());
        let b = record(f, "B", "Kuro");
        let c = record(f, "C", "Shiro");

        let old = vec![a_old, d_old];
        let new = vec![a_new, b, c];
        let diff = compute_diff(&old, &new);

        assert_eq!(diff.added.len(), 2);
        assert_eq!(diff.updated.len(), 1);
        assert_eq!(diff.updated[0].natural_key, "A");
        assert_eq!(diff.removed, vec!["D".to_string()]);
        assert_eq!(diff.unchanged, 0);

        // added + updated + unchanged + removed == |old ∪ new| keys
        let union = 4; // A, B, C, D
        assert_eq!(
            diff.added.len() + diff.updated.len() + diff.unchanged + diff.removed.len(),
            union
        );
    }

    #[test]
    fn diff_of_identical_sets_is_noop() {
        let f = FacilityId::new();
        let set = vec![record(f, "A", "Mike"), record(f, "B", "Kuro")];
        let diff = compute_diff(&set, &set.clone());
        assert!(diff.is_noop());
        assert_eq!(diff.unchanged, 2);
    }

    #[test]
    fn already_removed_records_are_not_re_removed() {
        let f = FacilityId::new();
        let gone = record(f, "X", "Old").with_status(RecordStatus::Removed);
        let kept = record(f, "A", "Mike");
        let diff = compute_diff(&[gone, kept.clone()], &[kept]);
        assert!(diff.is_noop());
    }

    #[test]
    fn reappearing_removed_record_counts_as_updated() {
        let f = FacilityId::new();
        let gone = record(f, "X", "Back").with_status(RecordStatus::Removed);
        let fresh = record(f, "X", "Back"); // status Available
        let diff = compute_diff(&[gone], &[fresh]);
        assert_eq!(diff.updated.len(), 1);
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn content_keyed_records_diff_stably() {
        let f = FacilityId::new();
        let deadline = NaiveDate::from_ymd_opt(2025, 7, 1);
        let key = content_natural_key("cat", "Mike", Some("calico"), deadline);
        let r1 = record(f, &key, "Mike");
        let r2 = record(f, &key, "Mike");
        let diff = compute_diff(&[r1], &[r2]);
        assert!(diff.is_noop());
    }
}
