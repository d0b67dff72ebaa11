//! Native text-layer extraction for PDFs with a usable text layer.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{FileRole, SimpleExtractResult};
use crate::queue::{ActiveJob, JobHandler, ProcessError};
use crate::utils::truncate_with_marker;

use super::{parse_input, to_value, SubtaskContext, SubtaskError, MAX_EXTRACT_CHARS};

pub struct PdfSimpleExtractWorker {
    ctx: Arc<SubtaskContext>,
}

impl PdfSimpleExtractWorker {
    pub fn new(ctx: Arc<SubtaskContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for PdfSimpleExtractWorker {
    async fn process(&self, job: &ActiveJob) -> Result<serde_json::Value, ProcessError> {
        let input = parse_input(job)?;
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
        let pdf_path = dir.path().join("document.pdf");
        tokio::fs::write(&pdf_path, &bytes)
            .await
            .map_err(SubtaskError::from)?;

        let extracted = self
            .ctx
            .pdf
            .extract_text(&pdf_path)
            .await
            .map_err(SubtaskError::from)?;

        Ok(to_value(&SimpleExtractResult {
            text: truncate_with_marker(&extracted.text, MAX_EXTRACT_CHARS),
            page_count: extracted.page_count,
            has_text_layer: extracted.has_text_layer,
            text_quality: extracted.text_quality,
        })?)
    }
}
