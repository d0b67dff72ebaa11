//! Storage facade: encrypted blob transfer behind the worker edge.
//!
//! The engine never touches at-rest encryption; it downloads decrypted
//! bytes and uploads plaintext that the facade encrypts. A per-worker
//! disk cache elides duplicate downloads across subtasks of one document.

mod file_cache;
mod remote;

pub use file_cache::{FileCache, DEFAULT_MAX_AGE};
pub use remote::HttpStorageFacade;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{FileRole, UploadReceipt};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage API error ({status}): {body}")]
    Http { status: u16, body: String },
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("File not found for document {document_id} role {role}")]
    NotFound { document_id: String, role: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Blob transfer operations the engine consumes.
#[async_trait]
pub trait StorageFacade: Send + Sync {
    /// Download the decrypted bytes for `(document, role)`.
    async fn download(&self, document_id: &str, role: FileRole) -> Result<Vec<u8>, StorageError>;

    /// Upload bytes under a role; the facade encrypts and upserts the
    /// files row for `(document, role)`.
    async fn upload(
        &self,
        document_id: &str,
        role: FileRole,
        bytes: &[u8],
        mime: &str,
    ) -> Result<UploadReceipt, StorageError>;
}
