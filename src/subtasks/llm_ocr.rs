//! LLM OCR over the optimized image.
//!
//! Calls the gateway's OCR task and validates the JSON envelope, retrying
//! with a cache bypass when the model returns something unparseable.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::llm::LlmOptions;
use crate::models::{FileRole, OcrResult};
use crate::queue::{ActiveJob, JobHandler, ProcessError};
use crate::taxonomy::ocr_prompt;
use crate::utils::strip_json_fences;

use super::{parse_input, to_value, SubtaskContext, SubtaskError, LLM_VALIDATION_ATTEMPTS};

pub struct LlmOcrWorker {
    ctx: Arc<SubtaskContext>,
}

impl LlmOcrWorker {
    pub fn new(ctx: Arc<SubtaskContext>) -> Self {
        Self { ctx }
    }
}

struct OcrPayload {
    document_description: Option<String>,
    language: Option<String>,
    raw_text: String,
    structured_data: Option<serde_json::Value>,
}

/// Validate the OCR response envelope:
/// `{documentDescription?, language?, extractedText: {contentType, content}}`.
fn validate_ocr_payload(text: &str) -> Result<OcrPayload, String> {
    let value: serde_json::Value =
        serde_json::from_str(strip_json_fences(text)).map_err(|e| e.to_string())?;

    let extracted = value
        .get("extractedText")
        .ok_or("missing extractedText")?;
    let content_type = extracted
        .get("contentType")
        .and_then(|v| v.as_str())
        .ok_or("missing extractedText.contentType")?;
    let content = extracted.get("content").ok_or("missing extractedText.content")?;

    let (raw_text, structured_data) = match content_type {
        "raw" => {
            let text = content
                .as_str()
                .ok_or("raw content must be a string")?
                .to_string();
            (text, None)
        }
        "structured" => {
            if !content.is_object() {
                return Err("structured content must be an object".into());
            }
            (content.to_string(), Some(content.clone()))
        }
        other => return Err(format!("unknown contentType '{}'", other)),
    };

    let as_opt_string = |key: &str| -> Result<Option<String>, String> {
        match value.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(format!("{} must be a string", key)),
        }
    };

    Ok(OcrPayload {
        document_description: as_opt_string("documentDescription")?,
        language: as_opt_string("language")?,
        raw_text,
        structured_data,
    })
}

#[async_trait]
impl JobHandler for LlmOcrWorker {
    async fn process(&self, job: &ActiveJob) -> Result<serde_json::Value, ProcessError> {
        let input = parse_input(job)?;
        let bytes = self
            .ctx
            .files
            .download(&input.document_id, FileRole::LlmOptimized)
            .await
            .map_err(SubtaskError::from)?;

        let system_prompt = ocr_prompt();
        let mut last_error = String::new();
        for attempt in 1..=LLM_VALIDATION_ATTEMPTS {
            let opts = LlmOptions {
                cache_prefix: Some(job.queue.clone()),
                skip_cache: attempt > 1,
                file_id: input.llm_file_id.clone(),
                ..Default::default()
            };
            let response = self
                .ctx
                .llm
                .ocr(&system_prompt, &bytes, "image/webp", opts)
                .await
                .map_err(SubtaskError::from)?;
            self.ctx
                .billing
                .record_response(&input.document_id, &response)
                .await
                .map_err(SubtaskError::from)?;

            match validate_ocr_payload(&response.content) {
                Ok(payload) => {
                    let page_count = response
                        .usage
                        .as_ref()
                        .and_then(|u| u.pages)
                        .unwrap_or(1);
                    info!(
                        "OCR {}: {} character(s) over {} page(s)",
                        input.document_id,
                        payload.raw_text.len(),
                        page_count
                    );
                    return Ok(to_value(&OcrResult {
                        raw_text: payload.raw_text,
                        structured_data: payload.structured_data,
                        document_description: payload.document_description,
                        language: payload.language,
                        page_count: page_count as u32,
                        extracted_by: "ocr".to_string(),
                        model: response.model,
                        cached: response.cached,
                    })?);
                }
                Err(e) => {
                    warn!(
                        "OCR response invalid for {} (attempt {}): {}",
                        input.document_id, attempt, e
                    );
                    last_error = e;
                }
            }
        }

        Err(SubtaskError::InvalidInput(format!(
            "OCR output failed validation after {} attempts: {}",
            LLM_VALIDATION_ATTEMPTS, last_error
        ))
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_payload() {
        let payload = validate_ocr_payload(
            r#"{"documentDescription":"a payslip","language":"fr","extractedText":{"contentType":"raw","content":"SALARY 2000"}}"#,
        )
        .unwrap();
        assert_eq!(payload.raw_text, "SALARY 2000");
        assert!(payload.structured_data.is_none());
        assert_eq!(payload.language.as_deref(), Some("fr"));
    }

    #[test]
    fn test_structured_payload_flattened() {
        let payload = validate_ocr_payload(
            r#"{"extractedText":{"contentType":"structured","content":{"rows":[1,2]}}}"#,
        )
        .unwrap();
        assert!(payload.raw_text.contains("rows"));
        assert!(payload.structured_data.is_some());
        assert!(payload.document_description.is_none());
    }

    #[test]
    fn test_fenced_payload_tolerated() {
        let payload = validate_ocr_payload(
            "```json\n{\"extractedText\":{\"contentType\":\"raw\",\"content\":\"x\"}}\n```",
        )
        .unwrap();
        assert_eq!(payload.raw_text, "x");
    }

    #[test]
    fn test_invalid_payloads() {
        assert!(validate_ocr_payload("not json").is_err());
        assert!(validate_ocr_payload(r#"{"extractedText":{}}"#).is_err());
        assert!(validate_ocr_payload(
            r#"{"extractedText":{"contentType":"fancy","content":"x"}}"#
        )
        .is_err());
        assert!(validate_ocr_payload(
            r#"{"extractedText":{"contentType":"raw","content":{"not":"a string"}}}"#
        )
        .is_err());
    }
}
