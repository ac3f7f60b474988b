//! SourceExtractor trait: pluggable per-format extraction.

use async_trait::async_trait;

use crate::error::ExtractResult;
use crate::types::capture::Extraction;
use crate::types::facility::{Facility, SourceDescriptor};

/// Pulls raw content from one source and yields listing fragments.
///
/// Implementations are polymorphic over source format (HTML page, PDF,
/// scanned image). Site-specific rules — selectors, OCR language,
/// pagination — arrive through `SourceDescriptor::options`, not code.
///
/// Contract points:
/// - A fetch that times out or cannot reach the source returns
///   `ExtractError::Fetch`.
/// - Content that was fetched but has the wrong shape returns
///   `ExtractError::Parse`. The orchestrator persists the raw artifact
///   *before* fragments are consumed, so a parse failure still leaves
///   an auditable capture.
/// - Fragments are ordered as they appear in the source.
#[async_trait]
pub trait SourceExtractor: Send + Sync {
    async fn extract(
        &self,
        facility: &Facility,
        source: &SourceDescriptor,
    ) -> ExtractResult<Extraction>;

    /// Extractor name for logging.
    fn name(&self) -> &str {
        "unknown"
    }
}
