//! Cheap OCR pre-filter: Tesseract over the scaled image.
//!
//! Decides whether an image is worth an LLM OCR call at all. Any
//! recognized character counts; quality is irrelevant here.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::models::{FileRole, PrefilterResult};
use crate::queue::{ActiveJob, JobHandler, ProcessError};

use super::{parse_input, to_value, SubtaskContext, SubtaskError};

const LANGUAGES: &str = "eng+fra";
const PAGE_SEGMENTATION_MODE: u32 = 1;

pub struct ImagePrefilterWorker {
    ctx: Arc<SubtaskContext>,
}

impl ImagePrefilterWorker {
    pub fn new(ctx: Arc<SubtaskContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for ImagePrefilterWorker {
    async fn process(&self, job: &ActiveJob) -> Result<serde_json::Value, ProcessError> {
        let input = parse_input(job)?;
        let bytes = self
            .ctx
            .files
            .download(&input.document_id, FileRole::LlmOptimized)
            .await
            .map_err(SubtaskError::from)?;

        // Tesseract prefers grayscale PNG over lossy WebP.
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| SubtaskError::Image(e.to_string()))?
            .grayscale();
        let dir = tempfile::tempdir().map_err(SubtaskError::from)?;
        let png_path = dir.path().join("prefilter.png");
        decoded
            .save_with_format(&png_path, image::ImageFormat::Png)
            .map_err(|e| SubtaskError::Image(e.to_string()))?;

        let raw_text = self
            .ctx
            .tesseract
            .recognize(&png_path, LANGUAGES, PAGE_SEGMENTATION_MODE)
            .await
            .map_err(SubtaskError::from)?;
        let char_count = raw_text.trim().chars().count();
        info!(
            "Prefilter {}: {} character(s) detected",
            input.document_id, char_count
        );

        Ok(to_value(&PrefilterResult {
            has_text: char_count > 0,
            raw_text,
            char_count,
        })?)
    }
}
