//! Facility identity and source configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FacilityId(pub Uuid);

impl FacilityId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for FacilityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FacilityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Source document format. A closed set: selection happens through
/// facility configuration, never through runtime code lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Html,
    Pdf,
    Image,
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Html => write!(f, "html"),
            Self::Pdf => write!(f, "pdf"),
            Self::Image => write!(f, "image"),
        }
    }
}

/// One published source for a facility: where to fetch and how to read it.
///
/// `options` carries extractor-specific parameters (selectors, OCR
/// language, pagination) — injected configuration, opaque to the
/// pipeline itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// URL (or file path for local testing) of the published listing.
    pub location: String,

    /// Document format of the source.
    pub format: SourceFormat,

    /// Extractor-specific parameters.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl SourceDescriptor {
    pub fn new(location: impl Into<String>, format: SourceFormat) -> Self {
        Self {
            location: location.into(),
            format,
            options: HashMap::new(),
        }
    }

    /// Add an extractor-specific option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Host portion of the location, used for per-domain politeness.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.location)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}

/// A municipal shelter (or prefectural animal-welfare center) whose
/// published listings this pipeline ingests.
///
/// Facilities are created from configuration, rarely mutated, and never
/// deleted programmatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Facility {
    pub id: FacilityId,

    /// Prefecture or region the facility belongs to.
    pub region: String,

    /// Municipality operating the facility.
    pub municipality: String,

    /// What the facility publishes: "cats", "dogs", "mixed", ...
    pub category: String,

    /// One or more published sources to extract from.
    pub sources: Vec<SourceDescriptor>,

    /// Inactive facilities are skipped by the scheduler.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Facility {
    pub fn new(
        region: impl Into<String>,
        municipality: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: FacilityId::new(),
            region: region.into(),
            municipality: municipality.into(),
            category: category.into(),
            sources: Vec::new(),
            active: true,
        }
    }

    pub fn with_source(mut self, source: SourceDescriptor) -> Self {
        self.sources.push(source);
        self
    }

    /// Human-readable label for logs.
    pub fn label(&self) -> String {
        format!("{}/{} ({})", self.region, self.municipality, self.category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_host_extraction() {
        let src = SourceDescriptor::new("https://www.pref.example.jp/dogs.html", SourceFormat::Html);
        assert_eq!(src.host().as_deref(), Some("www.pref.example.jp"));

        let local = SourceDescriptor::new("not a url", SourceFormat::Pdf);
        assert_eq!(local.host(), None);
    }

    #[test]
    fn facility_defaults_active() {
        let json = r#"{
            "id": "0191e4a0-0000-7000-8000-000000000001",
            "region": "ishikawa",
            "municipality": "kanazawa-city",
            "category": "cats",
            "sources": []
        }"#;
        let facility: Facility = serde_json::from_str(json).unwrap();
        assert!(facility.active);
    }
}
