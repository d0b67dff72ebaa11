//! Produce the LLM-optimized WebP for a document.
//!
//! Images are resized to a bounded long side and re-encoded down a
//! quality ladder until they fit the vision payload target. PDFs go
//! through the rasterizer for their first page; the dedicated OCR
//! endpoint gets full resolution, chat-vision providers get the bounded
//! size.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::ProviderKind;
use crate::models::{Dimensions, FileRole, ScalingResult};
use crate::queue::{ActiveJob, JobHandler, ProcessError};
use crate::utils::mime::{family, MimeFamily};

use super::{parse_input, to_value, SubtaskContext, SubtaskError};

/// Longest output side for vision payloads. Never upscale.
const MAX_LONGEST_SIDE: u32 = 1280;
/// Target encoded size for the vision payload.
const TARGET_BYTES: usize = 120 * 1024;
const START_QUALITY: u8 = 85;
const QUALITY_STEP: u8 = 5;
const QUALITY_FLOOR: u8 = 5;

pub struct ImageScalingWorker {
    ctx: Arc<SubtaskContext>,
}

impl ImageScalingWorker {
    pub fn new(ctx: Arc<SubtaskContext>) -> Self {
        Self { ctx }
    }
}

/// The descending quality ladder: 85, 80, ..., 5.
fn qualities() -> impl Iterator<Item = u8> {
    (0..)
        .map(|i| START_QUALITY.saturating_sub(i * QUALITY_STEP))
        .take_while(|&q| q >= QUALITY_FLOOR)
}

/// Encode WebP stepping down the ladder until the output fits the target
/// or the floor is reached; the floor encoding is kept either way.
fn encode_webp_under_target(image: &image::DynamicImage) -> Result<Vec<u8>, SubtaskError> {
    let rgba = image.to_rgba8();
    let encoder = webp::Encoder::from_rgba(&rgba, rgba.width(), rgba.height());
    let mut last = Vec::new();
    for quality in qualities() {
        last = encoder.encode(f32::from(quality)).to_vec();
        if last.len() < TARGET_BYTES {
            debug!("WebP fits at quality {} ({} bytes)", quality, last.len());
            break;
        }
    }
    if last.is_empty() {
        return Err(SubtaskError::Image("webp encoding produced no output".into()));
    }
    Ok(last)
}

fn bounded_resize(image: image::DynamicImage) -> image::DynamicImage {
    use image::GenericImageView;
    let (width, height) = image.dimensions();
    if width.max(height) <= MAX_LONGEST_SIDE {
        return image;
    }
    image.resize(
        MAX_LONGEST_SIDE,
        MAX_LONGEST_SIDE,
        image::imageops::FilterType::Lanczos3,
    )
}

#[async_trait]
impl JobHandler for ImageScalingWorker {
    async fn process(&self, job: &ActiveJob) -> Result<serde_json::Value, ProcessError> {
        let input = parse_input(job)?;

        let (webp_bytes, original_width, original_height) =
            if family(&input.mime_type) == MimeFamily::Image {
                let bytes = self
                    .ctx
                    .files
                    .download(&input.document_id, FileRole::Original)
                    .await
                    .map_err(SubtaskError::from)?;
                let decoded = image::load_from_memory(&bytes)
                    .map_err(|e| SubtaskError::Image(e.to_string()))?;
                use image::GenericImageView;
                let (width, height) = decoded.dimensions();
                let resized = bounded_resize(decoded);
                (encode_webp_under_target(&resized)?, width, height)
            } else {
                // PDF path: rasterize the first page. The dedicated OCR
                // endpoint reads full resolution; everything else gets the
                // bounded size.
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

                let longest_side =
                    if self.ctx.settings.ocr.provider == ProviderKind::OcrEndpoint {
                        0
                    } else {
                        MAX_LONGEST_SIDE
                    };
                let webp_path = dir.path().join("page.webp");
                self.ctx
                    .pdf
                    .rasterize(&pdf_path, &webp_path, longest_side)
                    .await
                    .map_err(SubtaskError::from)?;

                let webp_bytes = tokio::fs::read(&webp_path)
                    .await
                    .map_err(SubtaskError::from)?;
                let decoded = image::load_from_memory(&webp_bytes)
                    .map_err(|e| SubtaskError::Image(e.to_string()))?;
                use image::GenericImageView;
                let (width, height) = decoded.dimensions();
                (webp_bytes, width, height)
            };

        let receipt = self
            .ctx
            .files
            .upload(
                &input.document_id,
                FileRole::LlmOptimized,
                &webp_bytes,
                "image/webp",
            )
            .await
            .map_err(SubtaskError::from)?;
        info!(
            "Scaled {} to {} bytes ({}x{} source)",
            input.document_id,
            webp_bytes.len(),
            original_width,
            original_height
        );

        Ok(to_value(&ScalingResult {
            scaled_paths: vec![receipt.storage_path],
            original_dimensions: vec![Dimensions {
                width: original_width,
                height: original_height,
            }],
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_ladder() {
        let ladder: Vec<u8> = qualities().collect();
        assert_eq!(ladder.first(), Some(&85));
        assert_eq!(ladder.last(), Some(&5));
        assert!(ladder.windows(2).all(|w| w[0] - w[1] == 5));
        assert_eq!(ladder.len(), 17);
    }

    #[test]
    fn test_bounded_resize_no_upscale() {
        use image::GenericImageView;
        let small = image::DynamicImage::new_rgba8(640, 480);
        assert_eq!(bounded_resize(small).dimensions(), (640, 480));
    }

    #[test]
    fn test_bounded_resize_caps_longest_side() {
        use image::GenericImageView;
        let wide = image::DynamicImage::new_rgba8(4000, 1000);
        let resized = bounded_resize(wide);
        let (width, height) = resized.dimensions();
        assert_eq!(width, 1280);
        assert!(height <= 1280);
    }

    #[test]
    fn test_flat_image_encodes_under_target() {
        let flat = image::DynamicImage::new_rgba8(800, 600);
        let bytes = encode_webp_under_target(&flat).unwrap();
        assert!(!bytes.is_empty());
        assert!(bytes.len() < TARGET_BYTES);
    }
}
