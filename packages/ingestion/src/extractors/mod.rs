//! Extractor implementations, one per source format.
//!
//! Dispatch is a closed match over [`SourceFormat`]; facilities select
//! an extractor through configuration data, never through runtime code
//! lookup.

pub mod html;
pub mod image;
pub mod pdf;

use std::sync::Arc;

use crate::traits::extractor::SourceExtractor;
use crate::traits::ocr::OcrEngine;
use crate::types::facility::SourceFormat;

pub use html::HtmlExtractor;
pub use image::ImageExtractor;
pub use pdf::PdfExtractor;

/// Extractor set covering the closed format variants.
pub struct ExtractorSet {
    html: HtmlExtractor,
    pdf: PdfExtractor,
    image: ImageExtractor,
}

impl ExtractorSet {
    /// Build the full set. `ocr` serves both scanned images and PDFs
    /// with an empty text layer.
    pub fn new(ocr: Arc<dyn OcrEngine>) -> Self {
        Self {
            html: HtmlExtractor::new(),
            pdf: PdfExtractor::new(Some(ocr.clone())),
            image: ImageExtractor::new(ocr),
        }
    }

    /// Without OCR: image sources fail with a parse error, PDFs rely on
    /// their text layer alone.
    pub fn without_ocr() -> Self {
        Self {
            html: HtmlExtractor::new(),
            pdf: PdfExtractor::new(None),
            image: ImageExtractor::unavailable(),
        }
    }

    pub fn for_format(&self, format: SourceFormat) -> &dyn SourceExtractor {
        match format {
            SourceFormat::Html => &self.html,
            SourceFormat::Pdf => &self.pdf,
            SourceFormat::Image => &self.image,
        }
    }
}
