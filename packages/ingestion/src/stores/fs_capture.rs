//! Filesystem capture store: one content blob plus one JSON sidecar per
//! capture, grouped under a directory per facility.
//!
//! Layout:
//! ```text
//! <root>/<facility_id>/<capture_id>.bin    raw content
//! <root>/<facility_id>/<capture_id>.json   sidecar metadata
//! ```
//!
//! The sidecar carries the derived record count the deduplication
//! cleaner ranks by, so dedupe never has to re-parse blobs.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::store::CaptureStore;
use crate::types::capture::{CaptureId, CaptureMeta, RawCapture};
use crate::types::facility::FacilityId;

pub struct FsCaptureStore {
    root: PathBuf,
}

impl FsCaptureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn facility_dir(&self, facility_id: FacilityId) -> PathBuf {
        self.root.join(facility_id.to_string())
    }

    fn blob_path(&self, meta: &CaptureMeta) -> PathBuf {
        self.facility_dir(meta.facility_id)
            .join(format!("{}.bin", meta.id))
    }

    fn sidecar_path(&self, meta: &CaptureMeta) -> PathBuf {
        self.facility_dir(meta.facility_id)
            .join(format!("{}.json", meta.id))
    }

    async fn read_sidecar(path: &Path) -> StoreResult<CaptureMeta> {
        let bytes = fs::read(path).await.map_err(StoreError::backend)?;
        serde_json::from_slice(&bytes).map_err(StoreError::backend)
    }

    /// Find a capture's sidecar by id, scanning facility directories.
    async fn locate(&self, capture_id: CaptureId) -> StoreResult<CaptureMeta> {
        let mut dirs = fs::read_dir(&self.root).await.map_err(StoreError::backend)?;
        while let Some(dir) = dirs.next_entry().await.map_err(StoreError::backend)? {
            let sidecar = dir.path().join(format!("{capture_id}.json"));
            if fs::try_exists(&sidecar).await.map_err(StoreError::backend)? {
                return Self::read_sidecar(&sidecar).await;
            }
        }
        Err(StoreError::NotFound(format!("capture {capture_id}")))
    }
}

#[async_trait]
impl CaptureStore for FsCaptureStore {
    async fn put(&self, capture: &RawCapture) -> StoreResult<CaptureId> {
        let dir = self.facility_dir(capture.meta.facility_id);
        fs::create_dir_all(&dir).await.map_err(StoreError::backend)?;

        // Blob first, sidecar last: a capture without a sidecar is
        // invisible to list() and harmless; the reverse would not be.
        fs::write(self.blob_path(&capture.meta), &capture.content)
            .await
            .map_err(StoreError::backend)?;
        let sidecar = serde_json::to_vec_pretty(&capture.meta).map_err(StoreError::backend)?;
        fs::write(self.sidecar_path(&capture.meta), sidecar)
            .await
            .map_err(StoreError::backend)?;

        debug!(capture = %capture.meta.id, facility = %capture.meta.facility_id, "capture stored");
        Ok(capture.meta.id)
    }

    async fn list(&self, facility_id: FacilityId) -> StoreResult<Vec<CaptureMeta>> {
        let dir = self.facility_dir(facility_id);
        if !fs::try_exists(&dir).await.map_err(StoreError::backend)? {
            return Ok(Vec::new());
        }

        let mut metas = Vec::new();
        let mut entries = fs::read_dir(&dir).await.map_err(StoreError::backend)?;
        while let Some(entry) = entries.next_entry().await.map_err(StoreError::backend)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                metas.push(Self::read_sidecar(&path).await?);
            }
        }
        metas.sort_by_key(|m| m.captured_at);
        Ok(metas)
    }

    async fn get(&self, capture_id: CaptureId) -> StoreResult<RawCapture> {
        let meta = self.locate(capture_id).await?;
        let content = fs::read(self.blob_path(&meta))
            .await
            .map_err(StoreError::backend)?;
        Ok(RawCapture { meta, content })
    }

    async fn delete(&self, capture_id: CaptureId) -> StoreResult<()> {
        let meta = self.locate(capture_id).await?;
        // Sidecar first so a crash mid-delete leaves an orphan blob,
        // not a sidecar pointing at nothing.
        fs::remove_file(self.sidecar_path(&meta))
            .await
            .map_err(StoreError::backend)?;
        fs::remove_file(self.blob_path(&meta))
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }
}
