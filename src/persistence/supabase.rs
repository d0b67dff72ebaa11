//! Supabase-backed persistence facade.
//!
//! Every operation is a PostgREST RPC call to a `worker_*` stored
//! procedure with the service key attached.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::models::{BillingDelta, DocumentStatus, ProcessStatus};

use super::{DocumentUpdate, PersistenceError, PersistenceFacade, PrivateRowMeta};

/// PostgREST RPC client.
pub struct SupabaseFacade {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl SupabaseFacade {
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            secret_key: secret_key.into(),
        }
    }

    async fn rpc(
        &self,
        function: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, PersistenceError> {
        debug!("RPC {}", function);
        let response = self
            .http
            .post(format!("{}/rest/v1/rpc/{}", self.base_url, function))
            .header("apikey", &self.secret_key)
            .bearer_auth(&self.secret_key)
            .json(&params)
            .send()
            .await
            .map_err(|e| PersistenceError::Connection(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PersistenceError::Connection(e.to_string()))?;
        if !status.is_success() {
            return Err(PersistenceError::Http {
                status: status.as_u16(),
                body,
            });
        }
        if body.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| PersistenceError::Decode(e.to_string()))
    }

    fn as_bool(value: serde_json::Value) -> bool {
        value.as_bool().unwrap_or(false)
    }
}

#[async_trait]
impl PersistenceFacade for SupabaseFacade {
    async fn update_document(
        &self,
        document_id: &str,
        update: DocumentUpdate,
    ) -> Result<bool, PersistenceError> {
        let value = self
            .rpc(
                "worker_update_document",
                json!({
                    "p_document_id": document_id,
                    "p_document_type": update.document_type,
                    "p_document_subtype": update.document_subtype,
                    "p_status": update.status.map(|s| s.as_str()),
                    "p_process_status": update.process_status.map(|s| s.as_str()),
                    "p_extraction_confidence": update.extraction_confidence,
                    "p_document_date": update.document_date,
                    "p_valid_from": update.valid_from,
                    "p_valid_until": update.valid_until,
                }),
            )
            .await?;
        Ok(Self::as_bool(value))
    }

    async fn mark_processing_complete(
        &self,
        document_id: &str,
        final_status: DocumentStatus,
        error_message: Option<&str>,
        details: Option<serde_json::Value>,
    ) -> Result<bool, PersistenceError> {
        let value = self
            .rpc(
                "worker_mark_processing_complete",
                json!({
                    "p_document_id": document_id,
                    "p_final_status": final_status.as_str(),
                    "p_error_message": error_message,
                    "p_details": details,
                }),
            )
            .await?;
        Ok(Self::as_bool(value))
    }

    async fn log_process_step(
        &self,
        document_id: &str,
        status: ProcessStatus,
        details: Option<serde_json::Value>,
    ) -> Result<bool, PersistenceError> {
        let value = self
            .rpc(
                "worker_log_process_step",
                json!({
                    "p_document_id": document_id,
                    "p_new_process_status": status.as_str(),
                    "p_step_details": details,
                }),
            )
            .await?;
        Ok(Self::as_bool(value))
    }

    async fn update_document_private(
        &self,
        document_id: &str,
        encrypted_extracted_data: Option<serde_json::Value>,
        encrypted_metadata: Option<serde_json::Value>,
        master_key_version: u32,
    ) -> Result<bool, PersistenceError> {
        let value = self
            .rpc(
                "worker_update_document_private",
                json!({
                    "p_document_id": document_id,
                    "p_encrypted_extracted_data": encrypted_extracted_data,
                    "p_encrypted_metadata": encrypted_metadata,
                    "p_master_key_version": master_key_version,
                }),
            )
            .await?;
        Ok(Self::as_bool(value))
    }

    async fn get_document_private(
        &self,
        document_id: &str,
    ) -> Result<Option<PrivateRowMeta>, PersistenceError> {
        let value = self
            .rpc(
                "worker_get_document_private",
                json!({ "p_document_id": document_id }),
            )
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let master_key_version = value
            .get("master_key_version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| PersistenceError::Decode("missing master_key_version".into()))?;
        Ok(Some(PrivateRowMeta {
            master_key_version: master_key_version as u32,
        }))
    }

    async fn increment_llm_billing(
        &self,
        document_id: &str,
        delta: &BillingDelta,
    ) -> Result<bool, PersistenceError> {
        let value = self
            .rpc(
                "worker_increment_llm_billing",
                json!({
                    "p_document_id": document_id,
                    "p_prompt_tokens": delta.prompt_tokens,
                    "p_completion_tokens": delta.completion_tokens,
                    "p_pages": delta.pages,
                    "p_cost": delta.cost,
                }),
            )
            .await?;
        Ok(Self::as_bool(value))
    }

    async fn create_child_document(
        &self,
        parent_id: &str,
        owner_id: &str,
        page_range: &str,
        type_hint: &str,
    ) -> Result<String, PersistenceError> {
        let value = self
            .rpc(
                "worker_create_child_document",
                json!({
                    "p_parent_id": parent_id,
                    "p_owner_id": owner_id,
                    "p_page_range": page_range,
                    "p_type_hint": type_hint,
                }),
            )
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PersistenceError::Decode("child id is not a string".into()))
    }

    async fn encrypt_jsonb(
        &self,
        data: &serde_json::Value,
        master_key_version: u32,
    ) -> Result<serde_json::Value, PersistenceError> {
        self.rpc(
            "encrypt_jsonb",
            json!({
                "p_data": data,
                "p_master_key_version": master_key_version,
            }),
        )
        .await
    }
}
