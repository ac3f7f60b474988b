//! Shelter Listing Ingestion & Reconciliation Pipeline
//!
//! Aggregates animal-shelter listings published by independent
//! municipal sources (HTML pages, PDFs, scanned images) into one
//! canonical, queryable dataset. The read side is a thin query layer
//! elsewhere; this library is the hard part: extraction from
//! heterogeneous and unreliable sources, capture deduplication,
//! transactional reconciliation against stored state, and an auditable
//! run history that surfaces silently-broken extractors.
//!
//! # Flow
//!
//! For each facility: extractor → raw capture → normalizer →
//! reconciliation loader, with every run's outcome appended to the
//! history ledger. The capture side (store + dedupe) runs alongside;
//! the summary reporter reads history on demand.
//!
//! ```rust,ignore
//! use ingestion::{FacilitySpec, MemoryStore, Pipeline, PipelineConfig};
//! use ingestion::testing::MockExtractor;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let extractor = Arc::new(MockExtractor::new());
//! let pipeline = Arc::new(Pipeline::new(
//!     store.clone(), store.clone(), store.clone(),
//!     extractor, PipelineConfig::default(),
//! ));
//! let outcome = pipeline.run(specs).await?;
//! std::process::exit(outcome.exit_code());
//! ```
//!
//! # Modules
//!
//! - [`traits`] - seams: extractors, OCR, storage
//! - [`types`] - facilities, captures, records, history entries
//! - [`extractors`] - HTML / PDF / image implementations
//! - [`normalize`] - fragment → canonical record validation
//! - [`dedupe`] - raw capture deduplication
//! - [`loader`] - diff + atomic apply
//! - [`history`] / [`report`] - run ledger and summary reporting
//! - [`pipeline`] - orchestration with bounded concurrency
//! - [`stores`] - memory, filesystem captures, SQLite (feature)
//! - [`testing`] - scripted mocks

pub mod dedupe;
pub mod error;
pub mod extractors;
pub mod history;
pub mod loader;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{ExtractError, LoadError, PipelineError, StoreError};
pub use traits::{
    extractor::SourceExtractor,
    ocr::OcrEngine,
    store::{CaptureStore, HistoryStore, RecordStore},
};
pub use types::{
    capture::{CaptureId, CaptureMeta, Extraction, ExtractionMethod, RawCapture, RawFragment},
    facility::{Facility, FacilityId, SourceDescriptor, SourceFormat},
    history::{RunCounts, RunHistoryEntry, RunId, RunStatus},
    record::{content_natural_key, CanonicalRecord, RecordStatus, Sex},
};

// Components
pub use dedupe::{dedupe_facility, DedupeOutcome};
pub use extractors::{ExtractorSet, HtmlExtractor, ImageExtractor, PdfExtractor};
pub use history::HistoryLog;
pub use loader::{compute_diff, RecordDiff};
pub use normalize::{normalize_batch, normalize_fragment, NormalizeRules, RejectReason};
pub use pipeline::{
    ExtractorDispatch, FacilityRunResult, FacilitySpec, Pipeline, PipelineConfig, PipelineOutcome,
};
pub use report::{report_window, summarize, FacilityStats, FlagReason, SummaryReport};

// Stores
pub use stores::{FsCaptureStore, MemoryStore};

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;
