//! Run history entries: the append-only audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::facility::FacilityId;

/// Unique identifier for a pipeline run against one facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Outcome of one facility run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Extraction and load both succeeded (per-record skips allowed).
    Success,
    /// Some of the facility's sources succeeded, others failed.
    Partial,
    /// Nothing was loaded for this facility.
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Per-run counters.
///
/// On a failed load these are the counts the diff *would* have applied;
/// they are kept for diagnostics even though nothing was persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub found: usize,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub skipped: usize,
}

/// Immutable record of one pipeline run for one facility.
///
/// Appended once, never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    pub run_id: RunId,
    pub facility_id: FacilityId,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: RunStatus,
    pub counts: RunCounts,
    pub error: Option<String>,
}

impl RunHistoryEntry {
    pub fn new(facility_id: FacilityId, started_at: DateTime<Utc>, status: RunStatus) -> Self {
        Self {
            run_id: RunId::new(),
            facility_id,
            started_at,
            completed_at: Utc::now(),
            status,
            counts: RunCounts::default(),
            error: None,
        }
    }

    pub fn with_counts(mut self, counts: RunCounts) -> Self {
        self.counts = counts;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}
