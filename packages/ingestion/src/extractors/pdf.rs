//! PDF source extractor.
//!
//! Reads the embedded text layer page by page; a page with no text
//! layer (scanned PDF) falls back to OCR when an engine is configured.
//! Which method produced the text travels with every fragment, because
//! downstream validation treats OCR output more leniently.

use async_trait::async_trait;
use pdf_oxide::PdfDocument;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ExtractError, ExtractResult};
use crate::traits::extractor::SourceExtractor;
use crate::traits::ocr::OcrEngine;
use crate::types::capture::{Extraction, ExtractionMethod, RawFragment};
use crate::types::facility::{Facility, SourceDescriptor};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct PdfExtractor {
    client: reqwest::Client,
    ocr: Option<Arc<dyn OcrEngine>>,
}

impl PdfExtractor {
    pub fn new(ocr: Option<Arc<dyn OcrEngine>>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("reqwest client with static config");
        Self { client, ocr }
    }

    async fn fetch_bytes(&self, url: &str) -> ExtractResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractError::fetch(url, e))?;

        if !response.status().is_success() {
            return Err(ExtractError::fetch(
                url,
                format!("HTTP {}", response.status()),
            ));
        }

        Ok(response
            .bytes()
            .await
            .map_err(|e| ExtractError::fetch(url, e))?
            .to_vec())
    }
}

/// Pull page texts out of a PDF blob. The parser wants a path, so the
/// blob goes through a temp file scoped to this call.
fn text_layer_pages(location: &str, bytes: &[u8]) -> ExtractResult<Vec<String>> {
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| ExtractError::parse(location, format!("temp file: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| ExtractError::parse(location, format!("temp file: {e}")))?;

    let mut doc = PdfDocument::open(tmp.path())
        .map_err(|e| ExtractError::parse(location, format!("not a readable PDF: {e}")))?;
    let page_count = doc
        .page_count()
        .map_err(|e| ExtractError::parse(location, e))?;

    let mut pages = Vec::with_capacity(page_count);
    for page in 0..page_count {
        let text = doc.extract_text(page).unwrap_or_default();
        pages.push(text);
    }
    Ok(pages)
}

/// Fold OCR into the page list: text-layer pages pass through; if any
/// page lacks a text layer and an engine is available, the document is
/// OCRed exactly once and the output appended as one OCR page (the
/// engine owns rasterization and page selection). An OCR failure
/// degrades to whatever the text layer yielded instead of failing the
/// extraction.
async fn pages_with_ocr_fallback(
    ocr: Option<&dyn OcrEngine>,
    location: &str,
    bytes: &[u8],
    lang: Option<&str>,
    page_texts: Vec<String>,
) -> Vec<(String, ExtractionMethod)> {
    let mut pages: Vec<(String, ExtractionMethod)> = Vec::new();
    let mut missing = 0usize;
    for text in page_texts {
        if text.trim().is_empty() {
            missing += 1;
        } else {
            pages.push((text, ExtractionMethod::TextLayer));
        }
    }

    if missing > 0 {
        if let Some(engine) = ocr {
            warn!(
                url = %location,
                pages = missing,
                "pages without a text layer, falling back to OCR"
            );
            match engine.recognize(bytes, lang).await {
                Ok(text) if !text.trim().is_empty() => {
                    pages.push((text, ExtractionMethod::Ocr));
                }
                Ok(_) => {}
                Err(e) => warn!(url = %location, "OCR fallback failed: {e}"),
            }
        }
    }
    pages
}

/// Split page text into listing fragments: one fragment per non-empty
/// line block (blank-line separated). Field naming happens in the
/// normalizer via facility rules; here each block lands under "text".
fn fragments_from_text(
    location: &str,
    pages: &[(String, ExtractionMethod)],
) -> Vec<RawFragment> {
    let mut fragments = Vec::new();
    for (text, method) in pages {
        for block in text.split("\n\n") {
            let block = block.trim();
            if block.is_empty() {
                continue;
            }
            let fragment = RawFragment::new(fragments.len(), *method, location)
                .with_field("text", block);
            fragments.push(fragment);
        }
    }
    fragments
}

#[async_trait]
impl SourceExtractor for PdfExtractor {
    async fn extract(
        &self,
        facility: &Facility,
        source: &SourceDescriptor,
    ) -> ExtractResult<Extraction> {
        let bytes = self.fetch_bytes(&source.location).await?;
        let lang = source.options.get("ocr_lang").map(String::as_str);

        let page_texts = match text_layer_pages(&source.location, &bytes) {
            Ok(pages) => pages,
            Err(e) => return Err(e.with_content(bytes)),
        };
        debug!(
            facility = %facility.id,
            url = %source.location,
            pages = page_texts.len(),
            "pdf parsed"
        );

        let pages = pages_with_ocr_fallback(
            self.ocr.as_deref(),
            &source.location,
            &bytes,
            lang,
            page_texts,
        )
        .await;
        let used_ocr = pages.iter().any(|(_, method)| method.is_ocr());

        let fragments = fragments_from_text(&source.location, &pages);
        if fragments.is_empty() {
            return Err(ExtractError::parse(
                &source.location,
                "no text layer and no OCR output",
            )
            .with_content(bytes));
        }

        Ok(Extraction {
            fragments,
            raw_content: bytes,
            method: if used_ocr {
                ExtractionMethod::Ocr
            } else {
                ExtractionMethod::TextLayer
            },
        })
    }

    fn name(&self) -> &str {
        "pdf"
    }
}
