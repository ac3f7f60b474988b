//! Image (scanned page / photo) source extractor.
//!
//! Fetches the image and hands it to the configured [`OcrEngine`].
//! Every fragment is tagged `ExtractionMethod::Ocr` so the normalizer
//! knows to validate leniently.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{ExtractError, ExtractResult};
use crate::traits::extractor::SourceExtractor;
use crate::traits::ocr::OcrEngine;
use crate::types::capture::{Extraction, ExtractionMethod, RawFragment};
use crate::types::facility::{Facility, SourceDescriptor};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ImageExtractor {
    client: reqwest::Client,
    ocr: Option<Arc<dyn OcrEngine>>,
}

impl ImageExtractor {
    pub fn new(ocr: Arc<dyn OcrEngine>) -> Self {
        Self {
            client: default_client(),
            ocr: Some(ocr),
        }
    }

    /// An extractor that always fails with a parse error: configured
    /// image sources are a misconfiguration when no OCR engine exists.
    pub fn unavailable() -> Self {
        Self {
            client: default_client(),
            ocr: None,
        }
    }
}

fn default_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .expect("reqwest client with static config")
}

/// Split OCR output into line-oriented fragments. Consecutive non-empty
/// lines form one listing block, matching how shelters lay out one
/// animal per photo caption block.
fn fragments_from_ocr(location: &str, text: &str) -> Vec<RawFragment> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .enumerate()
        .map(|(index, block)| {
            RawFragment::new(index, ExtractionMethod::Ocr, location).with_field("text", block)
        })
        .collect()
}

#[async_trait]
impl SourceExtractor for ImageExtractor {
    async fn extract(
        &self,
        facility: &Facility,
        source: &SourceDescriptor,
    ) -> ExtractResult<Extraction> {
        let engine = self.ocr.as_ref().ok_or_else(|| {
            ExtractError::parse(&source.location, "image source configured without OCR engine")
        })?;

        let response = self
            .client
            .get(&source.location)
            .send()
            .await
            .map_err(|e| ExtractError::fetch(&source.location, e))?;
        if !response.status().is_success() {
            return Err(ExtractError::fetch(
                &source.location,
                format!("HTTP {}", response.status()),
            ));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExtractError::fetch(&source.location, e))?
            .to_vec();

        let lang = source.options.get("ocr_lang").map(String::as_str);
        let text = engine.recognize(&bytes, lang).await?;
        debug!(
            facility = %facility.id,
            url = %source.location,
            chars = text.len(),
            "image OCR complete"
        );

        let fragments = fragments_from_ocr(&source.location, &text);
        if fragments.is_empty() {
            return Err(ExtractError::parse(&source.location, "no OCR output").with_content(bytes));
        }

        Ok(Extraction {
            fragments,
            raw_content: bytes,
            method: ExtractionMethod::Ocr,
        })
    }

    fn name(&self) -> &str {
        "image"
    }
}
