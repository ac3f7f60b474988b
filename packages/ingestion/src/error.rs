//! Typed errors for the ingestion pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can
//! match on failure classes: per-record rejects are absorbed by the
//! normalizer, per-facility failures by the pipeline, and only store
//! unavailability aborts a whole run.

use thiserror::Error;

/// Errors raised while pulling raw content out of a single source.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Source unreachable: network failure, DNS, or per-call timeout.
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Content was fetched but did not match the expected shape
    /// (empty PDF text layer, no OCR output, selector matched nothing).
    /// Carries the fetched bytes when a fetch preceded the failure, so
    /// the orchestrator can still persist an auditable capture.
    #[error("parse failed for {url}: {reason}")]
    Parse {
        url: String,
        reason: String,
        content: Vec<u8>,
    },

    /// OCR engine failure.
    #[error("OCR error: {0}")]
    Ocr(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ExtractError {
    /// Build a fetch error from any underlying cause.
    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a parse error from any underlying cause.
    pub fn parse(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            url: url.into(),
            reason: reason.to_string(),
            content: Vec::new(),
        }
    }

    /// Attach the fetched bytes to a parse error so the raw artifact
    /// survives the failure. No-op on other variants.
    pub fn with_content(self, content: Vec<u8>) -> Self {
        match self {
            Self::Parse { url, reason, .. } => Self::Parse {
                url,
                reason,
                content,
            },
            other => other,
        }
    }
}

/// Errors raised while applying a reconciliation diff.
///
/// Fatal to one facility's run only; the transaction has already been
/// rolled back when this surfaces.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Uniqueness or foreign-key violation inside the transaction.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Connectivity lost mid-transaction.
    #[error("transaction failed: {0}")]
    Transaction(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The store dropped out entirely. Unlike the other variants this is
    /// fatal to the whole pipeline run, not just this facility:
    /// scheduling of further facilities stops.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be reached at all. Fatal to the whole pipeline
    /// run: no facility can be processed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A single storage operation failed.
    #[error("storage error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Requested object does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Umbrella error for pipeline orchestration.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("load failed: {0}")]
    Load(#[from] LoadError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Bad facility or pipeline configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl PipelineError {
    /// True when the failure means no facility can be processed and the
    /// whole run should stop scheduling new work.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Unavailable(_)) | Self::Load(LoadError::Unavailable(_))
        )
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for extraction operations.
pub type ExtractResult<T> = std::result::Result<T, ExtractError>;

/// Result type alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
