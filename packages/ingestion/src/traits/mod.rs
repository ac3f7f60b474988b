//! Trait seams of the pipeline.
//!
//! Applications (and tests) supply implementations of these to swap
//! extraction rules, OCR engines, and storage backends without touching
//! pipeline logic.

pub mod extractor;
pub mod ocr;
pub mod store;
