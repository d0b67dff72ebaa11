//! HTTP implementation of the storage facade (the worker edge service).
//!
//! Encryption/decryption happens server-side; this client only moves
//! bytes with the worker API key attached.

use async_trait::async_trait;

use crate::models::{FileRole, UploadReceipt};

use super::{StorageError, StorageFacade};

/// Client for the worker edge's file endpoints.
pub struct HttpStorageFacade {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpStorageFacade {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn file_url(&self, document_id: &str, role: FileRole) -> String {
        format!("{}/files/{}/{}", self.base_url, document_id, role.as_str())
    }
}

#[async_trait]
impl StorageFacade for HttpStorageFacade {
    async fn download(&self, document_id: &str, role: FileRole) -> Result<Vec<u8>, StorageError> {
        let response = self
            .http
            .get(self.file_url(document_id, role))
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(StorageError::NotFound {
                document_id: document_id.to_string(),
                role: role.as_str().to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn upload(
        &self,
        document_id: &str,
        role: FileRole,
        bytes: &[u8],
        mime: &str,
    ) -> Result<UploadReceipt, StorageError> {
        let response = self
            .http
            .put(self.file_url(document_id, role))
            .header("x-api-key", &self.api_key)
            .header("content-type", mime)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if !status.is_success() {
            return Err(StorageError::Http {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| StorageError::Connection(e.to_string()))
    }
}
