//! Structured normalization against the per-type schema.
//!
//! Low-confidence vision classifications get a second read of the
//! optimized image; everything else normalizes over the extracted text.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::llm::{LlmOptions, ResponseFormat};
use crate::models::{ExtractionMethod, FileRole, NormalizationResult};
use crate::queue::{names, ActiveJob, JobHandler, JobSpec, ProcessError};
use crate::taxonomy::{self, normalization_prompt, TypeSchema, UNCLASSIFIED};
use crate::utils::strip_json_fences;

use super::{parse_input, to_value, SubtaskContext, SubtaskError, LLM_VALIDATION_ATTEMPTS};

/// Below this confidence a vision-extracted document is re-read from the
/// image instead of trusting the OCR text.
const VISION_RETRY_CONFIDENCE: f64 = 0.8;

pub struct LlmNormalizeWorker {
    ctx: Arc<SubtaskContext>,
}

impl LlmNormalizeWorker {
    pub fn new(ctx: Arc<SubtaskContext>) -> Self {
        Self { ctx }
    }
}

fn validate_normalization(
    schema: &TypeSchema,
    text: &str,
) -> Result<(String, serde_json::Value), String> {
    let value: serde_json::Value =
        serde_json::from_str(strip_json_fences(text)).map_err(|e| e.to_string())?;
    let template = value
        .get("template")
        .and_then(|v| v.as_str())
        .ok_or("missing template")?;
    if template != schema.id {
        return Err(format!(
            "template '{}' does not match requested type '{}'",
            template, schema.id
        ));
    }
    let fields = value.get("fields").cloned().ok_or("missing fields")?;
    taxonomy::validate_fields(schema, &fields)?;
    Ok((template.to_string(), fields))
}

fn response_schema(schema: &TypeSchema) -> ResponseFormat {
    ResponseFormat::JsonSchema {
        name: schema.id.replace('.', "_"),
        strict: true,
        schema: json!({
            "type": "object",
            "properties": {
                "template": { "type": "string" },
                "fields": taxonomy::json_schema(schema),
            },
            "required": ["template", "fields"],
            "additionalProperties": false,
        }),
    }
}

#[async_trait]
impl JobHandler for LlmNormalizeWorker {
    async fn process(&self, job: &ActiveJob) -> Result<serde_json::Value, ProcessError> {
        let input = parse_input(job)?;
        let text = input.extracted_text.as_deref().ok_or_else(|| {
            SubtaskError::InvalidInput("normalization requires extracted text".into())
        })?;
        let classification = input.classification.as_ref().ok_or_else(|| {
            SubtaskError::InvalidInput("normalization requires a classification".into())
        })?;

        let schema = taxonomy::schema_for(&classification.document_type)
            .or_else(|| taxonomy::schema_for(UNCLASSIFIED))
            .expect("fallback schema is always registered");
        let system_prompt = normalization_prompt(schema);
        let cache_prefix = format!("{}/{}", job.queue, schema.id);

        // Low-confidence vision classifications re-read the image.
        let vision_mode = classification.extraction_confidence < VISION_RETRY_CONFIDENCE
            && input.extraction_method == Some(ExtractionMethod::Vision);

        let (image, llm_file_id) = if vision_mode {
            let bytes = self
                .ctx
                .files
                .download(&input.document_id, FileRole::LlmOptimized)
                .await
                .map_err(SubtaskError::from)?;
            // Prefer a provider file so retries don't re-embed the bytes.
            let file_id = match &input.llm_file_id {
                Some(id) => Some(id.clone()),
                None => match self
                    .ctx
                    .llm
                    .upload(&input.document_id, &bytes, "image/webp", "ocr")
                    .await
                {
                    Ok(id) => {
                        // An upload now exists at the provider; make sure
                        // the delayed cleanup sweep is scheduled.
                        self.ctx
                            .broker
                            .add_job(
                                JobSpec::new(
                                    names::MISTRAL_CLEANUP,
                                    names::MISTRAL_CLEANUP,
                                    serde_json::json!({}),
                                )
                                .with_delay(std::time::Duration::from_secs(30 * 60)),
                            )
                            .await
                            .map_err(SubtaskError::from)?;
                        Some(id)
                    }
                    Err(e) => {
                        debug!("Provider upload failed, embedding bytes: {}", e);
                        None
                    }
                },
            };
            (Some(bytes), file_id)
        } else {
            (None, input.llm_file_id.clone())
        };

        for attempt in 1..=LLM_VALIDATION_ATTEMPTS {
            let opts = LlmOptions {
                cache_prefix: Some(cache_prefix.clone()),
                response_format: Some(response_schema(schema)),
                skip_cache: attempt > 1,
                file_id: llm_file_id.clone(),
                ..Default::default()
            };
            let response = match &image {
                Some(bytes) => {
                    self.ctx
                        .llm
                        .vision(&system_prompt, bytes, "image/webp", opts)
                        .await
                }
                None => self.ctx.llm.text(&system_prompt, text, opts).await,
            }
            .map_err(SubtaskError::from)?;
            self.ctx
                .billing
                .record_response(&input.document_id, &response)
                .await
                .map_err(SubtaskError::from)?;

            match validate_normalization(schema, &response.content) {
                Ok((template, fields)) => {
                    info!(
                        "Normalized {} as {} ({} mode)",
                        input.document_id,
                        template,
                        if vision_mode { "vision" } else { "text" }
                    );
                    return Ok(to_value(&NormalizationResult {
                        template,
                        fields,
                        llm_file_id,
                    })?);
                }
                Err(e) => warn!(
                    "Normalization invalid for {} (attempt {}): {}",
                    input.document_id, attempt, e
                ),
            }
        }

        // Exhausted: the document stays classified but unnormalized.
        warn!(
            "Normalization exhausted retries for {} ({})",
            input.document_id, schema.id
        );
        Ok(serde_json::Value::Null)
    }
}
