//! Testing utilities: scripted extractors and OCR engines.
//!
//! These let applications exercise the pipeline without network, OCR,
//! or real sources.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{ExtractError, ExtractResult};
use crate::pipeline::ExtractorDispatch;
use crate::traits::extractor::SourceExtractor;
use crate::traits::ocr::OcrEngine;
use crate::types::capture::{Extraction, ExtractionMethod, RawFragment};
use crate::types::facility::{Facility, SourceDescriptor, SourceFormat};

/// Scripted response for one source location.
#[derive(Clone)]
enum Script {
    Fragments(Vec<RawFragment>),
    FetchError(String),
    ParseError(String),
    ParseArtifact(String, Vec<u8>),
    Stall(std::time::Duration),
}

/// A mock extractor that serves pre-scripted fragments (or failures)
/// per source location, with call tracking for assertions.
#[derive(Default)]
pub struct MockExtractor {
    scripts: RwLock<HashMap<String, Script>>,
    calls: RwLock<Vec<String>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script fragments for a location.
    pub fn with_fragments(self, location: impl Into<String>, fragments: Vec<RawFragment>) -> Self {
        self.scripts
            .write()
            .unwrap()
            .insert(location.into(), Script::Fragments(fragments));
        self
    }

    /// Script a fetch failure (unreachable / timeout) for a location.
    pub fn with_fetch_error(self, location: impl Into<String>, reason: impl Into<String>) -> Self {
        self.scripts
            .write()
            .unwrap()
            .insert(location.into(), Script::FetchError(reason.into()));
        self
    }

    /// Script a parse failure for a location.
    pub fn with_parse_error(self, location: impl Into<String>, reason: impl Into<String>) -> Self {
        self.scripts
            .write()
            .unwrap()
            .insert(location.into(), Script::ParseError(reason.into()));
        self
    }

    /// Script a parse failure that still carries fetched bytes.
    pub fn with_parse_artifact(
        self,
        location: impl Into<String>,
        reason: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        self.scripts
            .write()
            .unwrap()
            .insert(location.into(), Script::ParseArtifact(reason.into(), content));
        self
    }

    /// Script a source that hangs for `delay` before answering, for
    /// per-call timeout tests.
    pub fn with_stall(self, location: impl Into<String>, delay: std::time::Duration) -> Self {
        self.scripts
            .write()
            .unwrap()
            .insert(location.into(), Script::Stall(delay));
        self
    }

    /// Locations extracted so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }
}

#[async_trait]
impl SourceExtractor for MockExtractor {
    async fn extract(
        &self,
        _facility: &Facility,
        source: &SourceDescriptor,
    ) -> ExtractResult<Extraction> {
        self.calls.write().unwrap().push(source.location.clone());

        let script = self.scripts.read().unwrap().get(&source.location).cloned();
        match script {
            Some(Script::Fragments(fragments)) => Ok(Extraction {
                raw_content: format!("mock capture of {}", source.location).into_bytes(),
                method: fragments
                    .first()
                    .map(|f| f.method)
                    .unwrap_or(ExtractionMethod::Dom),
                fragments,
            }),
            Some(Script::FetchError(reason)) => Err(ExtractError::fetch(&source.location, reason)),
            Some(Script::ParseError(reason)) => Err(ExtractError::parse(&source.location, reason)),
            Some(Script::ParseArtifact(reason, content)) => {
                Err(ExtractError::parse(&source.location, reason).with_content(content))
            }
            Some(Script::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(Extraction {
                    fragments: Vec::new(),
                    raw_content: Vec::new(),
                    method: ExtractionMethod::Dom,
                })
            }
            None => Err(ExtractError::fetch(
                &source.location,
                "no script for location",
            )),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// MockExtractor answers for every format, so it doubles as a dispatch.
impl ExtractorDispatch for MockExtractor {
    fn for_format(&self, _format: SourceFormat) -> &dyn SourceExtractor {
        self
    }
}

impl ExtractorDispatch for Arc<MockExtractor> {
    fn for_format(&self, _format: SourceFormat) -> &dyn SourceExtractor {
        self.as_ref()
    }
}

/// OCR engine returning canned text (or a canned failure).
#[derive(Default)]
pub struct MockOcr {
    text: Option<String>,
}

impl MockOcr {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }

    pub fn failing() -> Self {
        Self { text: None }
    }
}

#[async_trait]
impl OcrEngine for MockOcr {
    async fn recognize(&self, _image: &[u8], _lang: Option<&str>) -> ExtractResult<String> {
        match &self.text {
            Some(text) => Ok(text.clone()),
            None => Err(ExtractError::Ocr("mock OCR failure".into())),
        }
    }
}

/// Build a listing fragment with the common fields filled in.
pub fn listing_fragment(
    index: usize,
    external_id: &str,
    species: &str,
    name: &str,
    deadline: &str,
) -> RawFragment {
    RawFragment::new(index, ExtractionMethod::Dom, "mock://source")
        .with_field("external_id", external_id)
        .with_field("species", species)
        .with_field("name", name)
        .with_field("deadline", deadline)
}
