//! Canonical listing records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::capture::CaptureId;
use super::facility::FacilityId;

/// Listing lifecycle. Records are soft-deleted: a listing that vanishes
/// from a new capture flips to `Removed` but stays in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Available,
    Pending,
    Removed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Pending => "pending",
            Self::Removed => "removed",
        }
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Self::Available),
            "pending" => Ok(Self::Pending),
            "removed" => Ok(Self::Removed),
            other => Err(format!("unknown record status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
    Unknown,
}

impl Default for Sex {
    fn default() -> Self {
        Self::Unknown
    }
}

/// A single animal listing in canonical form.
///
/// Uniqueness invariant: `(facility_id, natural_key)` is unique in the
/// store. The natural key is the source's stable external id when one
/// exists, else a content hash over identifying attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub facility_id: FacilityId,
    pub natural_key: String,
    pub species: String,
    pub name: String,
    #[serde(default)]
    pub sex: Sex,
    pub age_estimate: Option<String>,
    pub color: Option<String>,
    pub description: Option<String>,
    pub deadline_date: Option<NaiveDate>,
    pub status: RecordStatus,
    /// Capture that produced this version of the record.
    pub source_capture: Option<CaptureId>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalRecord {
    pub fn new(
        facility_id: FacilityId,
        natural_key: impl Into<String>,
        species: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            facility_id,
            natural_key: natural_key.into(),
            species: species.into(),
            name: name.into(),
            sex: Sex::Unknown,
            age_estimate: None,
            color: None,
            description: None,
            deadline_date: None,
            status: RecordStatus::Available,
            source_capture: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_deadline(mut self, deadline: NaiveDate) -> Self {
        self.deadline_date = Some(deadline);
        self
    }

    pub fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = status;
        self
    }

    /// Attribute-level equality used by the reconciliation diff.
    ///
    /// Provenance and timestamps are not tracked attributes: a record
    /// re-extracted unchanged from a fresh capture must diff as
    /// unchanged.
    pub fn same_attributes(&self, other: &Self) -> bool {
        self.species == other.species
            && self.name == other.name
            && self.sex == other.sex
            && self.age_estimate == other.age_estimate
            && self.color == other.color
            && self.description == other.description
            && self.deadline_date == other.deadline_date
            && self.status == other.status
    }
}

/// Stable natural key from identifying attributes, for sources that
/// publish no external id. Hash input is normalized so whitespace
/// jitter between captures does not fork identities.
pub fn content_natural_key(
    species: &str,
    name: &str,
    color: Option<&str>,
    deadline: Option<NaiveDate>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(species.trim().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(name.trim().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(color.unwrap_or("").trim().as_bytes());
    hasher.update(b"\x1f");
    if let Some(d) = deadline {
        hasher.update(d.to_string().as_bytes());
    }
    let digest = hasher.finalize();
    // 16 hex chars is plenty within a single facility.
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
