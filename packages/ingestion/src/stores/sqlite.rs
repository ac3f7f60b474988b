//! SQLite storage implementation.
//!
//! File-based backend for records and run history. Good for:
//! - Local development
//! - Single-server deployments
//! - Testing with persistent data
//!
//! `apply_diff` runs inside one sqlx transaction per facility, which is
//! the pipeline's unit of atomicity. Different facilities share no rows,
//! so their transactions never conflict.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

use crate::error::{LoadError, StoreError, StoreResult};
use crate::loader::RecordDiff;
use crate::traits::store::{HistoryStore, RecordStore};
use crate::types::capture::CaptureId;
use crate::types::facility::FacilityId;
use crate::types::history::{RunCounts, RunHistoryEntry, RunId, RunStatus};
use crate::types::record::{CanonicalRecord, RecordStatus, Sex};

/// SQLite-backed record and history store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and migrate.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - in-memory database (ephemeral)
    /// - `sqlite://tailsync.db?mode=rwc` - create file if not exists
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> StoreResult<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                facility_id TEXT NOT NULL,
                natural_key TEXT NOT NULL,
                species TEXT NOT NULL,
                name TEXT NOT NULL,
                sex TEXT NOT NULL DEFAULT 'unknown',
                age_estimate TEXT,
                color TEXT,
                description TEXT,
                deadline_date TEXT,
                status TEXT NOT NULL,
                source_capture TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (facility_id, natural_key)
            );

            CREATE INDEX IF NOT EXISTS idx_records_facility ON records(facility_id);
            CREATE INDEX IF NOT EXISTS idx_records_status ON records(status);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS run_history (
                run_id TEXT PRIMARY KEY,
                facility_id TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                status TEXT NOT NULL,
                found INTEGER NOT NULL DEFAULT 0,
                added INTEGER NOT NULL DEFAULT 0,
                updated INTEGER NOT NULL DEFAULT 0,
                removed INTEGER NOT NULL DEFAULT 0,
                skipped INTEGER NOT NULL DEFAULT 0,
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_history_facility ON run_history(facility_id, started_at);
            CREATE INDEX IF NOT EXISTS idx_history_started ON run_history(started_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(())
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> StoreResult<CanonicalRecord> {
    let facility_id: String = row.get("facility_id");
    let status: String = row.get("status");
    let sex: String = row.get("sex");
    let deadline: Option<String> = row.get("deadline_date");
    let capture: Option<String> = row.get("source_capture");
    let updated_at: String = row.get("updated_at");

    Ok(CanonicalRecord {
        facility_id: FacilityId(
            uuid::Uuid::parse_str(&facility_id).map_err(StoreError::backend)?,
        ),
        natural_key: row.get("natural_key"),
        species: row.get("species"),
        name: row.get("name"),
        sex: match sex.as_str() {
            "male" => Sex::Male,
            "female" => Sex::Female,
            _ => Sex::Unknown,
        },
        age_estimate: row.get("age_estimate"),
        color: row.get("color"),
        description: row.get("description"),
        deadline_date: deadline
            .map(|d| NaiveDate::from_str(&d))
            .transpose()
            .map_err(StoreError::backend)?,
        status: RecordStatus::from_str(&status).map_err(|e| StoreError::Backend(e.into()))?,
        source_capture: capture
            .map(|c| uuid::Uuid::parse_str(&c).map(CaptureId))
            .transpose()
            .map_err(StoreError::backend)?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map_err(StoreError::backend)?
            .with_timezone(&Utc),
    })
}

fn sex_str(sex: Sex) -> &'static str {
    match sex {
        Sex::Male => "male",
        Sex::Female => "female",
        Sex::Unknown => "unknown",
    }
}

fn bind_record<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    record: &'q CanonicalRecord,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(record.facility_id.to_string())
        .bind(&record.natural_key)
        .bind(&record.species)
        .bind(&record.name)
        .bind(sex_str(record.sex))
        .bind(&record.age_estimate)
        .bind(&record.color)
        .bind(&record.description)
        .bind(record.deadline_date.map(|d| d.to_string()))
        .bind(record.status.as_str())
        .bind(record.source_capture.map(|c| c.to_string()))
        .bind(record.updated_at.to_rfc3339())
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn current_records(&self, facility_id: FacilityId) -> StoreResult<Vec<CanonicalRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM records WHERE facility_id = ? ORDER BY natural_key",
        )
        .bind(facility_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn apply_diff(
        &self,
        facility_id: FacilityId,
        diff: &RecordDiff,
    ) -> Result<(), LoadError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LoadError::Transaction(Box::new(e)))?;

        for record in &diff.added {
            let insert = sqlx::query(
                r#"INSERT INTO records
                   (facility_id, natural_key, species, name, sex, age_estimate,
                    color, description, deadline_date, status, source_capture, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            );
            bind_record(insert, record)
                .execute(&mut *tx)
                .await
                .map_err(classify_sqlx_error)?;
        }

        for record in &diff.updated {
            let update = sqlx::query(
                r#"UPDATE records SET
                     species = ?3, name = ?4, sex = ?5, age_estimate = ?6,
                     color = ?7, description = ?8, deadline_date = ?9,
                     status = ?10, source_capture = ?11, updated_at = ?12
                   WHERE facility_id = ?1 AND natural_key = ?2"#,
            );
            bind_record(update, record)
                .execute(&mut *tx)
                .await
                .map_err(classify_sqlx_error)?;
        }

        let now = Utc::now().to_rfc3339();
        for key in &diff.removed {
            sqlx::query(
                "UPDATE records SET status = 'removed', updated_at = ?
                 WHERE facility_id = ? AND natural_key = ?",
            )
            .bind(&now)
            .bind(facility_id.to_string())
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(classify_sqlx_error)?;
        }

        // Dropping the transaction without this rolls everything back.
        tx.commit()
            .await
            .map_err(|e| LoadError::Transaction(Box::new(e)))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn classify_sqlx_error(e: sqlx::Error) -> LoadError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            LoadError::Constraint(db.to_string())
        }
        // Connectivity loss aborts the whole pipeline run, not just this
        // facility's transaction.
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            LoadError::Unavailable(e.to_string())
        }
        _ => LoadError::Transaction(Box::new(e)),
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn append(&self, entry: &RunHistoryEntry) -> StoreResult<()> {
        // One INSERT: atomic at the storage layer, safe under
        // concurrent per-facility writers.
        sqlx::query(
            r#"INSERT INTO run_history
               (run_id, facility_id, started_at, completed_at, status,
                found, added, updated, removed, skipped, error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.run_id.to_string())
        .bind(entry.facility_id.to_string())
        .bind(entry.started_at.to_rfc3339())
        .bind(entry.completed_at.to_rfc3339())
        .bind(entry.status.as_str())
        .bind(entry.counts.found as i64)
        .bind(entry.counts.added as i64)
        .bind(entry.counts.updated as i64)
        .bind(entry.counts.removed as i64)
        .bind(entry.counts.skipped as i64)
        .bind(&entry.error)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn latest_per_facility(&self) -> StoreResult<Vec<RunHistoryEntry>> {
        let rows = sqlx::query(
            r#"SELECT h.* FROM run_history h
               JOIN (SELECT facility_id, MAX(started_at) AS latest
                     FROM run_history GROUP BY facility_id) m
               ON h.facility_id = m.facility_id AND h.started_at = m.latest"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.iter().map(history_from_row).collect()
    }

    async fn entries_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<RunHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM run_history WHERE started_at >= ? AND started_at < ?
             ORDER BY facility_id, started_at",
        )
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.iter().map(history_from_row).collect()
    }

    async fn entries_for_facility(
        &self,
        facility_id: FacilityId,
    ) -> StoreResult<Vec<RunHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM run_history WHERE facility_id = ? ORDER BY started_at DESC",
        )
        .bind(facility_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.iter().map(history_from_row).collect()
    }
}

fn history_from_row(row: &sqlx::sqlite::SqliteRow) -> StoreResult<RunHistoryEntry> {
    let run_id: String = row.get("run_id");
    let facility_id: String = row.get("facility_id");
    let started_at: String = row.get("started_at");
    let completed_at: String = row.get("completed_at");
    let status: String = row.get("status");

    Ok(RunHistoryEntry {
        run_id: RunId(uuid::Uuid::parse_str(&run_id).map_err(StoreError::backend)?),
        facility_id: FacilityId(
            uuid::Uuid::parse_str(&facility_id).map_err(StoreError::backend)?,
        ),
        started_at: DateTime::parse_from_rfc3339(&started_at)
            .map_err(StoreError::backend)?
            .with_timezone(&Utc),
        completed_at: DateTime::parse_from_rfc3339(&completed_at)
            .map_err(StoreError::backend)?
            .with_timezone(&Utc),
        status: RunStatus::from_str(&status).map_err(|e| StoreError::Backend(e.into()))?,
        counts: RunCounts {
            found: row.get::<i64, _>("found") as usize,
            added: row.get::<i64, _>("added") as usize,
            updated: row.get::<i64, _>("updated") as usize,
            removed: row.get::<i64, _>("removed") as usize,
            skipped: row.get::<i64, _>("skipped") as usize,
        },
        error: row.get("error"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::compute_diff;

    fn record(facility: FacilityId, key: &str, name: &str) -> CanonicalRecord {
        CanonicalRecord::new(facility, key, "cat", name)
    }

    #[tokio::test]
    async fn diff_apply_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let f = FacilityId::new();

        let set = vec![record(f, "A", "Mike"), record(f, "B", "Kuro")];
        let diff = compute_diff(&[], &set);
        store.apply_diff(f, &diff).await.unwrap();

        let stored = store.current_records(f).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].natural_key, "A");

        // Idempotence through the real backend.
        let second = compute_diff(&stored, &set);
        assert!(second.is_noop());
    }

    #[tokio::test]
    async fn removal_is_a_soft_delete() {
        let store = SqliteStore::in_memory().await.unwrap();
        let f = FacilityId::new();

        store
            .apply_diff(f, &compute_diff(&[], &[record(f, "A", "Mike")]))
            .await
            .unwrap();
        let current = store.current_records(f).await.unwrap();
        store
            .apply_diff(f, &compute_diff(&current, &[]))
            .await
            .unwrap();

        let after = store.current_records(f).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].status, RecordStatus::Removed);
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_constraint_error_and_rolls_back() {
        let store = SqliteStore::in_memory().await.unwrap();
        let f = FacilityId::new();

        store
            .apply_diff(f, &compute_diff(&[], &[record(f, "A", "Mike")]))
            .await
            .unwrap();

        // Forged diff inserting an existing key: the batch also carries
        // a brand-new record, which must not survive the rollback.
        let bad = RecordDiff {
            added: vec![record(f, "B", "Kuro"), record(f, "A", "Mike")],
            ..Default::default()
        };
        let err = store.apply_diff(f, &bad).await.unwrap_err();
        assert!(matches!(err, LoadError::Constraint(_)));

        let after = store.current_records(f).await.unwrap();
        assert_eq!(after.len(), 1, "rolled-back insert must not persist");
    }

    #[tokio::test]
    async fn history_window_query() {
        use chrono::Duration;

        let store = SqliteStore::in_memory().await.unwrap();
        let f = FacilityId::new();
        let now = Utc::now();

        let inside = RunHistoryEntry::new(f, now - Duration::hours(1), RunStatus::Success);
        let outside = RunHistoryEntry::new(f, now - Duration::days(30), RunStatus::Failed);
        store.append(&inside).await.unwrap();
        store.append(&outside).await.unwrap();

        let window = store
            .entries_in_window(now - Duration::days(7), now)
            .await
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].run_id, inside.run_id);

        let latest = store.latest_per_facility().await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].run_id, inside.run_id);
    }
}
