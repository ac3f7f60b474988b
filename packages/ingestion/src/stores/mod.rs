//! Storage implementations.
//!
//! Available backends:
//! - `MemoryStore` - in-memory records/history/captures (tests, dev)
//! - `FsCaptureStore` - filesystem blobs + JSON sidecars for captures
//! - `SqliteStore` - SQLite records/history (requires `sqlite` feature)

pub mod fs_capture;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use fs_capture::FsCaptureStore;
pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
