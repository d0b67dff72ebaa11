//! Office-format conversion.
//!
//! Spreadsheets short-circuit to direct text extraction; everything else
//! becomes a PDF under the `converted_pdf` role and re-enters the PDF
//! pipeline. Each job works inside its own temp directory, cleaned on
//! every exit path by the directory guard.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::models::{ConversionResult, FileRole};
use crate::queue::{ActiveJob, JobHandler, ProcessError};
use crate::utils::mime::{extension_for, family, MimeFamily};

use super::{parse_input, to_value, SubtaskContext, SubtaskError};

pub struct FormatConversionWorker {
    ctx: Arc<SubtaskContext>,
}

impl FormatConversionWorker {
    pub fn new(ctx: Arc<SubtaskContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for FormatConversionWorker {
    async fn process(&self, job: &ActiveJob) -> Result<serde_json::Value, ProcessError> {
        let input = parse_input(job)?;
        let bytes = self
            .ctx
            .files
            .download(&input.document_id, FileRole::Original)
            .await
            .map_err(SubtaskError::from)?;

        let dir = tempfile::tempdir().map_err(SubtaskError::from)?;
        let source_path = dir
            .path()
            .join(format!("input.{}", extension_for(&input.mime_type)));
        tokio::fs::write(&source_path, &bytes)
            .await
            .map_err(SubtaskError::from)?;

        let mime_family = family(&input.mime_type);

        if mime_family == MimeFamily::Spreadsheet {
            // Legacy formats go through LibreOffice to xlsx first, then
            // the pandas-based extractor reads the sheets as text.
            let xlsx_path = if source_path.extension().is_some_and(|e| e == "xlsx") {
                source_path.clone()
            } else {
                self.ctx
                    .office
                    .libreoffice_convert(&source_path, dir.path(), "xlsx")
                    .await
                    .map_err(SubtaskError::from)?
            };
            let text = self
                .ctx
                .office
                .spreadsheet_to_text(&xlsx_path)
                .await
                .map_err(SubtaskError::from)?;
            info!(
                "Converted spreadsheet {} to {} character(s) of text",
                input.document_id,
                text.len()
            );
            return Ok(to_value(&ConversionResult {
                extracted_text: Some(text),
                converted_pdf_path: None,
            })?);
        }

        let pdf_path = match mime_family {
            MimeFamily::Xps => {
                let output = dir.path().join("converted.pdf");
                self.ctx
                    .office
                    .mutool_convert_to_pdf(&source_path, &output)
                    .await
                    .map_err(SubtaskError::from)?;
                output
            }
            MimeFamily::Email => {
                let html = dir.path().join("mail.html");
                self.ctx
                    .office
                    .email_to_html(&source_path, &html)
                    .await
                    .map_err(SubtaskError::from)?;
                self.ctx
                    .office
                    .libreoffice_convert(&html, dir.path(), "pdf")
                    .await
                    .map_err(SubtaskError::from)?
            }
            _ => self
                .ctx
                .office
                .libreoffice_convert(&source_path, dir.path(), "pdf")
                .await
                .map_err(SubtaskError::from)?,
        };

        let pdf_bytes = tokio::fs::read(&pdf_path)
            .await
            .map_err(SubtaskError::from)?;
        let receipt = self
            .ctx
            .files
            .upload(
                &input.document_id,
                FileRole::ConvertedPdf,
                &pdf_bytes,
                "application/pdf",
            )
            .await
            .map_err(SubtaskError::from)?;
        info!(
            "Converted {} ({}) to PDF, {} bytes",
            input.document_id,
            input.mime_type,
            pdf_bytes.len()
        );

        Ok(to_value(&ConversionResult {
            extracted_text: None,
            converted_pdf_path: Some(receipt.storage_path),
        })?)
    }
}
