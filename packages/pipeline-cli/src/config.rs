//! CLI configuration: environment plus the facilities file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use ingestion::FacilitySpec;

/// Environment-driven settings.
pub struct Env {
    pub database_url: String,
    pub capture_dir: String,
}

impl Env {
    pub fn load() -> Self {
        // Missing .env is fine; plain env vars still apply.
        let _ = dotenvy::dotenv();
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://tailsync.db?mode=rwc".to_string()),
            capture_dir: std::env::var("CAPTURE_DIR").unwrap_or_else(|_| "captures".to_string()),
        }
    }
}

/// The facilities file: per-facility source descriptors and
/// normalization rules, injected configuration for the pipeline.
#[derive(Debug, Deserialize)]
pub struct FacilitiesFile {
    pub facilities: Vec<FacilitySpec>,
}

pub fn load_facilities(path: &Path) -> Result<Vec<FacilitySpec>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading facilities file {}", path.display()))?;
    let file: FacilitiesFile = serde_json::from_str(&raw)
        .with_context(|| format!("parsing facilities file {}", path.display()))?;
    Ok(file.facilities)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facilities_file_parses() {
        let json = r#"{
            "facilities": [{
                "facility": {
                    "id": "0191e4a0-0000-7000-8000-000000000001",
                    "region": "ishikawa",
                    "municipality": "kanazawa-city",
                    "category": "cats",
                    "sources": [{
                        "location": "https://example.jp/cats.html",
                        "format": "html",
                        "options": {"row_pattern": "<tr>.*?</tr>"}
                    }]
                },
                "rules": {
                    "date_formats": ["%Y/%m/%d"],
                    "require_deadline": false
                }
            }]
        }"#;
        let file: FacilitiesFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.facilities.len(), 1);
        let spec = &file.facilities[0];
        assert_eq!(spec.facility.municipality, "kanazawa-city");
        assert!(!spec.rules.require_deadline);
    }
}
