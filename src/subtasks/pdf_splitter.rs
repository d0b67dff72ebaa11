//! Multi-document splitting.
//!
//! Cuts the segments found by pre-analysis into child documents, writes
//! their provenance, and enqueues an independent orchestrator run for
//! each. The parent keeps only the split marker; children live their own
//! lifecycle.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::models::{FileRole, PdfSplitResult, SourceEntry, SubtaskInput};
use crate::queue::{job_id_for, names, ActiveJob, JobHandler, JobSpec, ProcessError};
use crate::tools::pdf::SplitCrop;

use super::{parse_input, to_value, SubtaskContext, SubtaskError};

const SOURCE_TYPE: &str = "split";

pub struct PdfSplitterWorker {
    ctx: Arc<SubtaskContext>,
}

impl PdfSplitterWorker {
    pub fn new(ctx: Arc<SubtaskContext>) -> Self {
        Self { ctx }
    }
}

/// Render a 1-based page list as the range string stored on the child row.
fn page_range(pages: &[u32]) -> String {
    pages
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl JobHandler for PdfSplitterWorker {
    async fn process(&self, job: &ActiveJob) -> Result<serde_json::Value, ProcessError> {
        let input = parse_input(job)?;

        let Some(segments) = input
            .pre_analysis
            .as_ref()
            .filter(|p| p.is_multi_document)
            .and_then(|p| p.documents.clone())
        else {
            // Not a multi-document input: nothing to split.
            return Ok(serde_json::Value::Null);
        };

        let role = if input.converted_pdf_path.is_some() {
            FileRole::ConvertedPdf
        } else {
            FileRole::Original
        };
        let bytes = self
            .ctx
            .files
            .download(&input.document_id, role)
            .await
            .map_err(SubtaskError::from)?;

        let dir = tempfile::tempdir().map_err(SubtaskError::from)?;
        let source_path = dir.path().join("source.pdf");
        tokio::fs::write(&source_path, &bytes)
            .await
            .map_err(SubtaskError::from)?;

        let mut child_document_ids = Vec::new();
        for (index, segment) in segments.iter().enumerate() {
            let range = page_range(&segment.pages);
            let child_id = self
                .ctx
                .db
                .create_child_document(
                    &input.document_id,
                    &input.owner_id,
                    &range,
                    &segment.type_hint,
                )
                .await
                .map_err(SubtaskError::from)?;

            let crop = segment.hint.as_deref().and_then(SplitCrop::from_hint);
            let output_path = dir.path().join(format!("segment-{}.pdf", index));
            self.ctx
                .pdf
                .split(&source_path, &segment.pages, crop, &output_path)
                .await
                .map_err(SubtaskError::from)?;
            let segment_bytes = tokio::fs::read(&output_path)
                .await
                .map_err(SubtaskError::from)?;

            let receipt = self
                .ctx
                .files
                .upload(&child_id, FileRole::Original, &segment_bytes, "application/pdf")
                .await
                .map_err(SubtaskError::from)?;

            // Provenance into the child's private metadata.
            let entry = SourceEntry {
                source: SOURCE_TYPE.to_string(),
                filepath: receipt.storage_path.clone(),
                original_filename: input.original_filename.clone(),
                created_at: None,
                modified_at: None,
                uploaded_at: Utc::now(),
            };
            let key = SourceEntry::key(SOURCE_TYPE, &receipt.storage_path);
            let mut sources = serde_json::Map::new();
            sources.insert(
                key,
                serde_json::to_value(&entry)
                    .map_err(|e| SubtaskError::InvalidInput(e.to_string()))?,
            );
            let metadata = json!({ "sources": sources });
            let master_key_version = self.ctx.settings.master_key_version;
            let encrypted = self
                .ctx
                .db
                .encrypt_jsonb(&metadata, master_key_version)
                .await
                .map_err(SubtaskError::from)?;
            self.ctx
                .db
                .update_document_private(&child_id, None, Some(encrypted), master_key_version)
                .await
                .map_err(SubtaskError::from)?;

            // Each child runs its own full pipeline from the start.
            let mut child_input = SubtaskInput::new(
                &child_id,
                &input.owner_id,
                "application/pdf",
                &receipt.content_hash,
                &receipt.storage_path,
                SOURCE_TYPE,
            );
            child_input.original_filename = input.original_filename.clone();
            child_input.priority = input.priority;
            self.ctx
                .broker
                .add_job(JobSpec::new(
                    names::ORCHESTRATOR,
                    job_id_for(&child_id, names::ORCHESTRATOR),
                    serde_json::to_value(&child_input)
                        .map_err(|e| SubtaskError::InvalidInput(e.to_string()))?,
                ))
                .await
                .map_err(SubtaskError::from)?;

            child_document_ids.push(child_id);
        }

        info!(
            "Split {} into {} child document(s)",
            input.document_id,
            child_document_ids.len()
        );
        Ok(to_value(&PdfSplitResult {
            split_into: child_document_ids.len() as u32,
            child_document_ids,
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_range_rendering() {
        assert_eq!(page_range(&[1, 2]), "1,2");
        assert_eq!(page_range(&[3]), "3");
        assert_eq!(page_range(&[]), "");
    }
}
