//! Persistence facade: the fixed set of stored procedures the engine is
//! allowed to call. All durable mutations go through these so concurrent
//! workers serialize at the database.

mod supabase;

pub use supabase::SupabaseFacade;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{BillingDelta, DocumentStatus, ProcessStatus};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Persistence API error ({status}): {body}")]
    Http { status: u16, body: String },
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

/// Partial document update applied by `worker_update_document`.
#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    pub document_type: Option<String>,
    pub document_subtype: Option<String>,
    pub status: Option<DocumentStatus>,
    pub process_status: Option<ProcessStatus>,
    pub extraction_confidence: Option<f64>,
    pub document_date: Option<String>,
    pub valid_from: Option<String>,
    pub valid_until: Option<String>,
}

/// Private-row metadata needed to pick the master key version.
#[derive(Debug, Clone)]
pub struct PrivateRowMeta {
    pub master_key_version: u32,
}

/// The stored procedures the engine consumes.
#[async_trait]
pub trait PersistenceFacade: Send + Sync {
    async fn update_document(
        &self,
        document_id: &str,
        update: DocumentUpdate,
    ) -> Result<bool, PersistenceError>;

    /// Append the terminal record to `process_history` and set the final
    /// status pair. Idempotent once the document is terminal.
    async fn mark_processing_complete(
        &self,
        document_id: &str,
        final_status: DocumentStatus,
        error_message: Option<&str>,
        details: Option<serde_json::Value>,
    ) -> Result<bool, PersistenceError>;

    /// Append an intermediate step record to `process_history` and update
    /// the granular process status.
    async fn log_process_step(
        &self,
        document_id: &str,
        status: ProcessStatus,
        details: Option<serde_json::Value>,
    ) -> Result<bool, PersistenceError>;

    /// Upsert the private row's encrypted payloads.
    async fn update_document_private(
        &self,
        document_id: &str,
        encrypted_extracted_data: Option<serde_json::Value>,
        encrypted_metadata: Option<serde_json::Value>,
        master_key_version: u32,
    ) -> Result<bool, PersistenceError>;

    /// Read private-row metadata (None when no row exists yet).
    async fn get_document_private(
        &self,
        document_id: &str,
    ) -> Result<Option<PrivateRowMeta>, PersistenceError>;

    async fn increment_llm_billing(
        &self,
        document_id: &str,
        delta: &BillingDelta,
    ) -> Result<bool, PersistenceError>;

    /// Create a child document row for a split segment; returns its id.
    async fn create_child_document(
        &self,
        parent_id: &str,
        owner_id: &str,
        page_range: &str,
        type_hint: &str,
    ) -> Result<String, PersistenceError>;

    /// Opaque JSON encryption performed database-side.
    async fn encrypt_jsonb(
        &self,
        data: &serde_json::Value,
        master_key_version: u32,
    ) -> Result<serde_json::Value, PersistenceError>;
}
