//! Per-worker temp-disk cache of decrypted blobs.
//!
//! Keyed by `(document, role)`. Strictly process-local: never serves
//! cross-process reads, and corruption is harmless since a miss falls
//! back to a download. Cleared per document at finalize and swept
//! periodically for stale entries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::models::FileRole;

use super::{StorageError, StorageFacade};

/// How long an untouched document directory survives the sweep.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 3600);

/// Caching wrapper around the storage facade.
pub struct FileCache {
    storage: Arc<dyn StorageFacade>,
    root: PathBuf,
    keep_on_disk: bool,
}

impl FileCache {
    pub fn new(storage: Arc<dyn StorageFacade>, keep_on_disk: bool) -> Self {
        Self {
            storage,
            root: std::env::temp_dir().join("docgather-cache"),
            keep_on_disk,
        }
    }

    pub fn with_root(storage: Arc<dyn StorageFacade>, root: PathBuf, keep_on_disk: bool) -> Self {
        Self {
            storage,
            root,
            keep_on_disk,
        }
    }

    fn entry_path(&self, document_id: &str, role: FileRole) -> PathBuf {
        self.root
            .join(document_id)
            .join(format!("{}.bin", role.as_str()))
    }

    /// Fetch bytes for `(document, role)`, serving from disk when cached.
    pub async fn download(
        &self,
        document_id: &str,
        role: FileRole,
    ) -> Result<Vec<u8>, StorageError> {
        let path = self.entry_path(document_id, role);
        if let Ok(bytes) = tokio::fs::read(&path).await {
            debug!("File cache hit: {} {}", document_id, role.as_str());
            return Ok(bytes);
        }

        let bytes = self.storage.download(document_id, role).await?;
        if let Err(e) = self.put(document_id, role, &bytes).await {
            warn!("Failed to cache {} {}: {}", document_id, role.as_str(), e);
        }
        Ok(bytes)
    }

    /// Store bytes locally for `(document, role)`.
    pub async fn put(
        &self,
        document_id: &str,
        role: FileRole,
        bytes: &[u8],
    ) -> Result<(), StorageError> {
        let path = self.entry_path(document_id, role);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    /// Upload through the facade and refresh the local copy.
    pub async fn upload(
        &self,
        document_id: &str,
        role: FileRole,
        bytes: &[u8],
        mime: &str,
    ) -> Result<crate::models::UploadReceipt, StorageError> {
        let receipt = self.storage.upload(document_id, role, bytes, mime).await?;
        if let Err(e) = self.put(document_id, role, bytes).await {
            warn!("Failed to cache upload {} {}: {}", document_id, role.as_str(), e);
        }
        Ok(receipt)
    }

    /// Drop every cached blob for a document.
    pub async fn clear_document(&self, document_id: &str) {
        if self.keep_on_disk {
            return;
        }
        let dir = self.root.join(document_id);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to clear file cache for {}: {}", document_id, e);
            }
        }
    }

    /// Remove document directories whose entries have not been touched
    /// within `max_age`. Returns the number of directories removed.
    pub async fn sweep_stale(&self, max_age: Duration) -> usize {
        let mut removed = 0;
        let Ok(mut entries) = tokio::fs::read_dir(&self.root).await else {
            return 0;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_dir() {
                continue;
            }
            let stale = metadata
                .modified()
                .ok()
                .and_then(|t| t.elapsed().ok())
                .is_some_and(|age| age > max_age);
            if stale && tokio::fs::remove_dir_all(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("File cache sweep removed {} stale document(s)", removed);
        }
        removed
    }

    /// Background sweeper at a fixed interval.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, max_age: Duration) {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.sweep_stale(max_age).await;
            }
        });
    }
}
