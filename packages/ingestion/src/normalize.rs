//! Record normalization: raw fragments → canonical records.
//!
//! Pure and deterministic. A malformed single listing is dropped with a
//! structured reason and a `skipped` increment; it never aborts the
//! rest of the batch.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::types::capture::{CaptureId, RawFragment};
use crate::types::facility::Facility;
use crate::types::record::{content_natural_key, CanonicalRecord, RecordStatus, Sex};

/// Why a single fragment was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Neither a name nor an external id was present.
    MissingIdentifier,
    MissingSpecies,
    /// `deadline_date` absent where the rules require it.
    MissingDeadline,
    /// A date field was present but unparseable with every configured format.
    BadDate { field: String, value: String },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIdentifier => write!(f, "missing name/external id"),
            Self::MissingSpecies => write!(f, "missing species"),
            Self::MissingDeadline => write!(f, "missing deadline date"),
            Self::BadDate { field, value } => write!(f, "unparseable date {field}={value}"),
        }
    }
}

/// Field-level normalization rules. Format- and facility-specific
/// configuration, not business logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeRules {
    /// chrono format strings tried in order for date fields.
    pub date_formats: Vec<String>,

    /// Source token → canonical species ("猫" → "cat").
    #[serde(default)]
    pub species_map: HashMap<String, String>,

    /// Source token → canonical sex.
    #[serde(default)]
    pub sex_map: HashMap<String, Sex>,

    /// Whether listings from this facility must carry a deadline.
    #[serde(default = "default_true")]
    pub require_deadline: bool,

    /// Species assumed when the source omits it entirely (single-species
    /// pages often do).
    #[serde(default)]
    pub default_species: Option<String>,

    /// Field name → regex (first capture group) applied to a fragment's
    /// raw "text" when the extractor produced no named field. This is
    /// how PDF text-layer and OCR block fragments get their fields.
    #[serde(default)]
    pub text_patterns: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl Default for NormalizeRules {
    fn default() -> Self {
        Self {
            date_formats: vec![
                "%Y-%m-%d".to_string(),
                "%Y/%m/%d".to_string(),
                "%Y年%m月%d日".to_string(),
            ],
            species_map: HashMap::new(),
            sex_map: HashMap::new(),
            require_deadline: true,
            default_species: None,
            text_patterns: HashMap::new(),
        }
    }
}

impl NormalizeRules {
    /// Named field from the fragment, falling back to a configured
    /// pattern over its raw "text".
    fn field_value(&self, fragment: &RawFragment, key: &str) -> Option<String> {
        if let Some(v) = fragment.field(key) {
            return Some(v.trim().to_string());
        }
        let pattern = self.text_patterns.get(key)?;
        let text = fragment.field("text")?;
        let re = Regex::new(pattern).ok()?;
        re.captures(text)
            .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
            .map(|m| m.as_str().trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_date(&self, value: &str) -> Option<NaiveDate> {
        let value = value.trim();
        self.date_formats
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
    }

    fn canonical_species(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        self.species_map
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| trimmed.to_lowercase())
    }

    fn canonical_sex(&self, raw: Option<&str>) -> Sex {
        match raw {
            Some(token) => {
                let trimmed = token.trim();
                self.sex_map.get(trimmed).copied().unwrap_or_else(|| {
                    match trimmed.to_lowercase().as_str() {
                        "male" | "m" | "オス" | "雄" => Sex::Male,
                        "female" | "f" | "メス" | "雌" => Sex::Female,
                        _ => Sex::Unknown,
                    }
                })
            }
            None => Sex::Unknown,
        }
    }
}

/// Normalize one fragment into a candidate canonical record.
///
/// OCR-derived fragments are validated leniently: the deadline
/// requirement is waived because OCR regularly mangles date cells.
pub fn normalize_fragment(
    facility: &Facility,
    rules: &NormalizeRules,
    fragment: &RawFragment,
    capture: Option<CaptureId>,
) -> Result<CanonicalRecord, RejectReason> {
    let external_id = rules.field_value(fragment, "external_id");
    let name = rules.field_value(fragment, "name");

    if external_id.is_none() && name.is_none() {
        return Err(RejectReason::MissingIdentifier);
    }

    let species = match rules.field_value(fragment, "species") {
        Some(raw) => rules.canonical_species(&raw),
        None => match &rules.default_species {
            Some(s) => s.clone(),
            None => return Err(RejectReason::MissingSpecies),
        },
    };

    let deadline_date = match rules.field_value(fragment, "deadline") {
        Some(raw) => match rules.parse_date(&raw) {
            Some(d) => Some(d),
            None => {
                return Err(RejectReason::BadDate {
                    field: "deadline".to_string(),
                    value: raw,
                })
            }
        },
        None => None,
    };

    // OCR fields are low-confidence; don't reject a whole listing for a
    // date OCR failed to read.
    if deadline_date.is_none() && rules.require_deadline && !fragment.method.is_ocr() {
        return Err(RejectReason::MissingDeadline);
    }

    let color = rules.field_value(fragment, "color");
    let name = name
        .or_else(|| external_id.as_ref().map(|id| format!("{species}-{id}")))
        .unwrap_or_default();

    let natural_key = match external_id {
        Some(id) if !id.is_empty() => id,
        _ => content_natural_key(&species, &name, color.as_deref(), deadline_date),
    };

    let mut record = CanonicalRecord::new(facility.id, natural_key, species, name);
    record.sex = rules.canonical_sex(rules.field_value(fragment, "sex").as_deref());
    record.age_estimate = rules.field_value(fragment, "age");
    record.color = color;
    record.description = rules.field_value(fragment, "description");
    record.deadline_date = deadline_date;
    record.status = RecordStatus::Available;
    record.source_capture = capture;
    Ok(record)
}

/// Normalize a whole batch, dropping (and counting) malformed fragments.
pub fn normalize_batch(
    facility: &Facility,
    rules: &NormalizeRules,
    fragments: &[RawFragment],
    capture: Option<CaptureId>,
) -> (Vec<CanonicalRecord>, usize) {
    let mut records = Vec::with_capacity(fragments.len());
    let mut skipped = 0usize;

    for fragment in fragments {
        match normalize_fragment(facility, rules, fragment, capture) {
            Ok(record) => records.push(record),
            Err(reason) => {
                skipped += 1;
                warn!(
                    facility = %facility.id,
                    index = fragment.index,
                    %reason,
                    "fragment skipped"
                );
            }
        }
    }

    (records, skipped)
}
