//! Cheap deterministic PDF inspection.
//!
//! Decides the routing for a PDF: native-text extraction, the OCR path,
//! or multi-document splitting. Non-PDF input yields an empty result
//! without touching storage.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::models::{FileRole, PreAnalysisResult};
use crate::queue::{ActiveJob, JobHandler, ProcessError};
use crate::utils::mime::{family, MimeFamily};

use super::{parse_input, SubtaskContext, SubtaskError};

pub struct PdfPreAnalysisWorker {
    ctx: Arc<SubtaskContext>,
}

impl PdfPreAnalysisWorker {
    pub fn new(ctx: Arc<SubtaskContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for PdfPreAnalysisWorker {
    async fn process(&self, job: &ActiveJob) -> Result<serde_json::Value, ProcessError> {
        let input = parse_input(job)?;

        let converted = input.converted_pdf_path.is_some();
        if family(&input.mime_type) != MimeFamily::Pdf && !converted {
            return Ok(serde_json::to_value(PreAnalysisResult::empty())
                .map_err(|e| SubtaskError::InvalidInput(e.to_string()))?);
        }

        let role = if converted {
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

        let analysis = self
            .ctx
            .pdf
            .analyze(&pdf_path)
            .await
            .map_err(SubtaskError::from)?;
        info!(
            "Pre-analysis {}: {} page(s), quality {:?}, multi={}",
            input.document_id, analysis.page_count, analysis.text_quality, analysis.is_multi_document
        );

        Ok(serde_json::to_value(analysis)
            .map_err(|e| SubtaskError::InvalidInput(e.to_string()))?)
    }
}
