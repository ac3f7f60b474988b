//! Data types for the ingestion pipeline.

pub mod capture;
pub mod facility;
pub mod history;
pub mod record;
