//! Result write-back and provenance.
//!
//! Runs once per document when the orchestrator reaches Finalize:
//! aggregates child results, infers dates, updates classification, marks
//! the terminal status, encrypts the full payload into private storage,
//! and cleans the caches.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::llm::LlmService;
use crate::models::{
    ClassificationResult, DocumentStatus, NormalizationResult, ProcessStatus, SubtaskInput,
};
use crate::persistence::{DocumentUpdate, PersistenceFacade};
use crate::queue::names;
use crate::storage::FileCache;
use crate::taxonomy::SPLITTED;

use super::dates::infer_dates;

/// Aggregate, persist, and clean up. Returns the combined results object
/// (the orchestrator job's return value).
pub async fn finalize(
    settings: &Settings,
    db: &Arc<dyn PersistenceFacade>,
    files: &Arc<FileCache>,
    llm: &Arc<dyn LlmService>,
    input: &SubtaskInput,
    children: &HashMap<String, serde_json::Value>,
) -> anyhow::Result<serde_json::Value> {
    let document_id = &input.document_id;

    let normalized: Option<NormalizationResult> = children
        .get(names::LLM_NORMALIZE)
        .filter(|v| v.is_object())
        .and_then(|v| serde_json::from_value(v.clone()).ok());

    let pdf_split = children
        .get(names::PDF_SPLITTER)
        .filter(|v| v.is_object())
        .cloned();

    // A split parent emits no classification of its own; synthesize the
    // marker type so consumers can tell it apart from a failed run.
    let classification: Option<ClassificationResult> = match (&input.classification, &pdf_split) {
        (Some(classification), _) => Some(classification.clone()),
        (None, Some(split)) => {
            let count = split
                .get("splitInto")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            Some(ClassificationResult {
                document_type: SPLITTED.to_string(),
                extraction_confidence: 1.0,
                language: String::new(),
                explanation: Some(format!("Document split into {} parts", count)),
                document_summary: None,
            })
        }
        (None, None) => None,
    };

    let results = json!({
        "preAnalysis": children.get(names::PDF_PRE_ANALYSIS),
        "conversion": children.get(names::FORMAT_CONVERSION),
        "scaling": children.get(names::IMAGE_SCALING),
        "prefilter": children.get(names::IMAGE_PREFILTER),
        "ocr": children.get(names::LLM_OCR),
        "classification": &classification,
        "normalized": &normalized,
        "pdfSplit": &pdf_split,
        "rejectionReason": &input.rejection_reason,
    });

    let final_status = if input.is_rejected {
        DocumentStatus::Rejected
    } else {
        DocumentStatus::Processed
    };

    if let Some(classification) = &classification {
        let fields = normalized
            .as_ref()
            .map(|n| n.fields.clone())
            .unwrap_or_else(|| json!({}));
        let inferred = infer_dates(&fields);
        let fmt = |d: chrono::NaiveDate| d.format("%Y-%m-%d").to_string();

        db.update_document(
            document_id,
            DocumentUpdate {
                document_type: Some(classification.document_type.clone()),
                document_subtype: None,
                status: Some(DocumentStatus::Processed),
                process_status: Some(ProcessStatus::Completed),
                extraction_confidence: Some(classification.extraction_confidence),
                document_date: inferred.document_date.map(fmt),
                valid_from: inferred.valid_from.map(fmt),
                valid_until: inferred.valid_until.map(fmt),
            },
        )
        .await?;
    }

    let details = input
        .rejection_reason
        .as_ref()
        .map(|reason| json!({ "reason": reason }));
    db.mark_processing_complete(document_id, final_status, None, details)
        .await?;

    // Encrypt the full payload under the private row's existing key
    // version, or the current one for a fresh row.
    let master_key_version = db
        .get_document_private(document_id)
        .await?
        .map(|row| row.master_key_version)
        .unwrap_or(settings.master_key_version);
    let encrypted = db.encrypt_jsonb(&results, master_key_version).await?;
    db.update_document_private(document_id, Some(encrypted), None, master_key_version)
        .await?;

    dump_dev_results(settings, document_id, &results);

    files.clear_document(document_id).await;

    let llm_file_id = input
        .llm_file_id
        .clone()
        .or_else(|| normalized.as_ref().and_then(|n| n.llm_file_id.clone()));
    if let Some(file_id) = llm_file_id {
        if let Err(e) = llm.delete_file(&file_id).await {
            warn!("Failed to delete provider file {}: {}", file_id, e);
        }
    }

    info!(
        "Document {} finalized as {}",
        document_id,
        final_status.as_str()
    );
    Ok(results)
}

/// Dev-only results dump, keyed by the active model trio.
fn dump_dev_results(settings: &Settings, document_id: &str, results: &serde_json::Value) {
    if !settings.llm_cache_enabled {
        return;
    }
    let dir = settings
        .llm_cache_dir
        .join("results")
        .join(&settings.ocr.model)
        .join(&settings.text.model)
        .join(&settings.vision.model);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        debug!("Skipping results dump: {}", e);
        return;
    }
    let path = dir.join(format!("{}.json", document_id));
    match serde_json::to_vec_pretty(results) {
        Ok(body) => {
            if let Err(e) = std::fs::write(&path, body) {
                debug!("Skipping results dump: {}", e);
            }
        }
        Err(e) => debug!("Skipping results dump: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, LlmOptions, LlmResponse, ProviderFile};
    use crate::models::{BillingDelta, FileRole, UploadReceipt};
    use crate::persistence::{PersistenceError, PrivateRowMeta};
    use crate::storage::{StorageError, StorageFacade};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDb {
        updates: Mutex<Vec<DocumentUpdate>>,
        completions: Mutex<Vec<(DocumentStatus, Option<serde_json::Value>)>>,
        private_upserts: Mutex<Vec<(Option<serde_json::Value>, u32)>>,
        existing_key_version: Option<u32>,
    }

    #[async_trait]
    impl PersistenceFacade for RecordingDb {
        async fn update_document(
            &self,
            _: &str,
            update: DocumentUpdate,
        ) -> Result<bool, PersistenceError> {
            self.updates.lock().unwrap().push(update);
            Ok(true)
        }
        async fn mark_processing_complete(
            &self,
            _: &str,
            final_status: DocumentStatus,
            _: Option<&str>,
            details: Option<serde_json::Value>,
        ) -> Result<bool, PersistenceError> {
            self.completions.lock().unwrap().push((final_status, details));
            Ok(true)
        }
        async fn log_process_step(
            &self,
            _: &str,
            _: ProcessStatus,
            _: Option<serde_json::Value>,
        ) -> Result<bool, PersistenceError> {
            Ok(true)
        }
        async fn update_document_private(
            &self,
            _: &str,
            encrypted_extracted_data: Option<serde_json::Value>,
            _: Option<serde_json::Value>,
            master_key_version: u32,
        ) -> Result<bool, PersistenceError> {
            self.private_upserts
                .lock()
                .unwrap()
                .push((encrypted_extracted_data, master_key_version));
            Ok(true)
        }
        async fn get_document_private(
            &self,
            _: &str,
        ) -> Result<Option<PrivateRowMeta>, PersistenceError> {
            Ok(self
                .existing_key_version
                .map(|master_key_version| PrivateRowMeta { master_key_version }))
        }
        async fn increment_llm_billing(
            &self,
            _: &str,
            _: &BillingDelta,
        ) -> Result<bool, PersistenceError> {
            Ok(true)
        }
        async fn create_child_document(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<String, PersistenceError> {
            Ok("child".into())
        }
        async fn encrypt_jsonb(
            &self,
            data: &serde_json::Value,
            _: u32,
        ) -> Result<serde_json::Value, PersistenceError> {
            Ok(json!({"ciphertext": data}))
        }
    }

    struct NullStorage;

    #[async_trait]
    impl StorageFacade for NullStorage {
        async fn download(&self, _: &str, _: FileRole) -> Result<Vec<u8>, StorageError> {
            Ok(Vec::new())
        }
        async fn upload(
            &self,
            _: &str,
            _: FileRole,
            _: &[u8],
            _: &str,
        ) -> Result<UploadReceipt, StorageError> {
            Ok(UploadReceipt {
                storage_path: String::new(),
                content_hash: String::new(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingLlm {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmService for RecordingLlm {
        async fn text(
            &self,
            _: &str,
            _: &str,
            _: LlmOptions,
        ) -> Result<LlmResponse, LlmError> {
            unreachable!()
        }
        async fn vision(
            &self,
            _: &str,
            _: &[u8],
            _: &str,
            _: LlmOptions,
        ) -> Result<LlmResponse, LlmError> {
            unreachable!()
        }
        async fn ocr(
            &self,
            _: &str,
            _: &[u8],
            _: &str,
            _: LlmOptions,
        ) -> Result<LlmResponse, LlmError> {
            unreachable!()
        }
        async fn upload(
            &self,
            _: &str,
            _: &[u8],
            _: &str,
            _: &str,
        ) -> Result<String, LlmError> {
            unreachable!()
        }
        async fn delete_file(&self, file_id: &str) -> Result<(), LlmError> {
            self.deleted.lock().unwrap().push(file_id.to_string());
            Ok(())
        }
        async fn list_files(&self, _: &str) -> Result<Vec<ProviderFile>, LlmError> {
            Ok(Vec::new())
        }
    }

    fn test_input() -> SubtaskInput {
        SubtaskInput::new(
            "doc-1",
            "owner-1",
            "application/pdf",
            "f-1",
            "p/doc.pdf",
            "upload",
        )
    }

    fn test_cache(dir: &tempfile::TempDir) -> Arc<FileCache> {
        Arc::new(FileCache::with_root(
            Arc::new(NullStorage),
            dir.path().to_path_buf(),
            false,
        ))
    }

    #[tokio::test]
    async fn test_processed_payslip_write_back() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default();
        let db = Arc::new(RecordingDb::default());
        let db_dyn: Arc<dyn PersistenceFacade> = db.clone();
        let llm: Arc<dyn LlmService> = Arc::new(RecordingLlm::default());
        let files = test_cache(&dir);

        let mut input = test_input();
        input.classification = Some(ClassificationResult {
            document_type: "income.payslip".into(),
            extraction_confidence: 0.95,
            language: "fr".into(),
            explanation: None,
            document_summary: None,
        });

        let mut children = HashMap::new();
        children.insert(
            names::LLM_NORMALIZE.to_string(),
            json!({
                "template": "income.payslip",
                "fields": {"payPeriod": {"startDate": "2024-01-01", "endDate": "2024-01-31"}},
            }),
        );

        let results = finalize(&settings, &db_dyn, &files, &llm, &input, &children)
            .await
            .unwrap();
        assert_eq!(results["classification"]["documentType"], "income.payslip");

        let updates = db.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].document_type.as_deref(), Some("income.payslip"));
        assert_eq!(updates[0].document_date.as_deref(), Some("2024-01-31"));
        assert_eq!(updates[0].valid_from.as_deref(), Some("2024-01-01"));
        assert_eq!(updates[0].valid_until.as_deref(), Some("2024-01-31"));
        assert_eq!(updates[0].status, Some(DocumentStatus::Processed));

        let completions = db.completions.lock().unwrap();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].0, DocumentStatus::Processed);

        let upserts = db.private_upserts.lock().unwrap();
        assert_eq!(upserts.len(), 1);
        assert!(upserts[0].0.as_ref().unwrap()["ciphertext"].is_object());
        assert_eq!(upserts[0].1, settings.master_key_version);
    }

    #[tokio::test]
    async fn test_rejection_skips_document_update() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default();
        let db = Arc::new(RecordingDb::default());
        let db_dyn: Arc<dyn PersistenceFacade> = db.clone();
        let llm: Arc<dyn LlmService> = Arc::new(RecordingLlm::default());
        let files = test_cache(&dir);

        let mut input = test_input();
        input.is_rejected = true;
        input.rejection_reason = Some("no_text_detected_in_image".into());

        finalize(&settings, &db_dyn, &files, &llm, &input, &HashMap::new())
            .await
            .unwrap();

        assert!(db.updates.lock().unwrap().is_empty());
        let completions = db.completions.lock().unwrap();
        assert_eq!(completions[0].0, DocumentStatus::Rejected);
        assert_eq!(
            completions[0].1.as_ref().unwrap()["reason"],
            "no_text_detected_in_image"
        );
    }

    #[tokio::test]
    async fn test_split_parent_synthesizes_classification() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default();
        let db = Arc::new(RecordingDb::default());
        let db_dyn: Arc<dyn PersistenceFacade> = db.clone();
        let llm: Arc<dyn LlmService> = Arc::new(RecordingLlm::default());
        let files = test_cache(&dir);

        let mut input = test_input();
        input.split_completed = true;

        let mut children = HashMap::new();
        children.insert(
            names::PDF_SPLITTER.to_string(),
            json!({"splitInto": 2, "childDocumentIds": ["c1", "c2"]}),
        );

        let results = finalize(&settings, &db_dyn, &files, &llm, &input, &children)
            .await
            .unwrap();
        assert_eq!(results["classification"]["documentType"], SPLITTED);
        assert_eq!(
            results["classification"]["explanation"],
            "Document split into 2 parts"
        );

        let updates = db.updates.lock().unwrap();
        assert_eq!(updates[0].document_type.as_deref(), Some(SPLITTED));
    }

    #[tokio::test]
    async fn test_existing_key_version_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default();
        let db = Arc::new(RecordingDb {
            existing_key_version: Some(7),
            ..Default::default()
        });
        let db_dyn: Arc<dyn PersistenceFacade> = db.clone();
        let llm: Arc<dyn LlmService> = Arc::new(RecordingLlm::default());
        let files = test_cache(&dir);

        finalize(&settings, &db_dyn, &files, &llm, &test_input(), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(db.private_upserts.lock().unwrap()[0].1, 7);
    }

    #[tokio::test]
    async fn test_provider_file_deleted_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default();
        let db: Arc<dyn PersistenceFacade> = Arc::new(RecordingDb::default());
        let llm_impl = Arc::new(RecordingLlm::default());
        let llm: Arc<dyn LlmService> = llm_impl.clone();
        let files = test_cache(&dir);

        let mut input = test_input();
        input.llm_file_id = Some("file-42".into());

        finalize(&settings, &db, &files, &llm, &input, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(*llm_impl.deleted.lock().unwrap(), vec!["file-42"]);
    }
}
