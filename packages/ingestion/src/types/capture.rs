//! Raw capture artifacts and extraction fragments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::facility::{FacilityId, SourceFormat};

/// Unique identifier for a raw capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureId(pub Uuid);

impl CaptureId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for CaptureId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CaptureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// How text was produced from the source document.
///
/// OCR output has materially lower field confidence than a DOM or text
/// layer read; the normalizer validates it more leniently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Parsed out of HTML markup.
    Dom,
    /// Read from a PDF's embedded text layer.
    TextLayer,
    /// Optical character recognition over a scanned page or photo.
    Ocr,
}

impl ExtractionMethod {
    pub fn is_ocr(&self) -> bool {
        matches!(self, Self::Ocr)
    }
}

/// One raw listing fragment pulled out of a source, before normalization.
///
/// `fields` holds whatever the extractor could name ("name", "species",
/// "deadline", ...); unnamed content goes under "text". `index` is the
/// fragment's position within the source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFragment {
    pub index: usize,
    pub method: ExtractionMethod,
    pub source_location: String,
    pub fields: HashMap<String, String>,
}

impl RawFragment {
    pub fn new(index: usize, method: ExtractionMethod, source_location: impl Into<String>) -> Self {
        Self {
            index,
            method,
            source_location: source_location.into(),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str).filter(|v| !v.trim().is_empty())
    }
}

/// Sidecar metadata for a stored raw capture.
///
/// `record_count` is derived at extraction time and drives the
/// deduplication policy (keep the capture that saw the most records).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureMeta {
    pub id: CaptureId,
    pub facility_id: FacilityId,
    pub format: SourceFormat,
    pub source_location: String,
    pub captured_at: DateTime<Utc>,
    pub record_count: usize,
}

/// One extraction attempt's raw artifact: content blob plus sidecar.
#[derive(Debug, Clone)]
pub struct RawCapture {
    pub meta: CaptureMeta,
    pub content: Vec<u8>,
}

impl RawCapture {
    pub fn new(
        facility_id: FacilityId,
        format: SourceFormat,
        source_location: impl Into<String>,
        content: Vec<u8>,
        record_count: usize,
    ) -> Self {
        Self {
            meta: CaptureMeta {
                id: CaptureId::new(),
                facility_id,
                format,
                source_location: source_location.into(),
                captured_at: Utc::now(),
                record_count,
            },
            content,
        }
    }

    pub fn id(&self) -> CaptureId {
        self.meta.id
    }
}

/// Output of one extractor call: ordered fragments plus the raw bytes
/// that produced them, so the artifact can be persisted even when
/// downstream normalization rejects every fragment.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub fragments: Vec<RawFragment>,
    pub raw_content: Vec<u8>,
    pub method: ExtractionMethod,
}
