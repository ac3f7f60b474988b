//! OCR engine seam.

use async_trait::async_trait;

use crate::error::ExtractResult;

/// Turns image bytes into text.
///
/// Kept behind a trait so the pipeline never depends on a specific OCR
/// runtime: production wires in an external engine, tests use
/// [`crate::testing::MockOcr`].
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize text in an image. `lang` is an engine-specific language
    /// hint (e.g. "jpn").
    async fn recognize(&self, image: &[u8], lang: Option<&str>) -> ExtractResult<String>;
}
