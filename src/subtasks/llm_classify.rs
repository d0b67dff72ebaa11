//! Document classification against the closed taxonomy.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::llm::{LlmOptions, ResponseFormat};
use crate::models::ClassificationResult;
use crate::queue::{ActiveJob, JobHandler, ProcessError};
use crate::taxonomy::{classification_prompt, is_valid_classification, SPLITTED, UNCLASSIFIED};
use crate::utils::strip_json_fences;

use super::{parse_input, SubtaskContext, SubtaskError, LLM_VALIDATION_ATTEMPTS};

pub struct LlmClassifyWorker {
    ctx: Arc<SubtaskContext>,
}

impl LlmClassifyWorker {
    pub fn new(ctx: Arc<SubtaskContext>) -> Self {
        Self { ctx }
    }
}

/// Strict validation of the classifier output.
fn validate_classification(text: &str) -> Result<ClassificationResult, String> {
    let value: serde_json::Value =
        serde_json::from_str(strip_json_fences(text)).map_err(|e| e.to_string())?;

    let document_type = value
        .get("documentType")
        .and_then(|v| v.as_str())
        .ok_or("missing documentType")?;
    // `splitted` is engine-synthesized, never a valid classifier answer.
    if document_type == SPLITTED || !is_valid_classification(document_type) {
        return Err(format!("documentType '{}' is not in the taxonomy", document_type));
    }

    let confidence = value
        .get("extractionConfidence")
        .and_then(|v| v.as_f64())
        .ok_or("missing extractionConfidence")?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("extractionConfidence {} out of range", confidence));
    }

    let language = value
        .get("language")
        .and_then(|v| v.as_str())
        .ok_or("missing language")?;

    Ok(ClassificationResult {
        document_type: document_type.to_string(),
        extraction_confidence: confidence,
        language: language.to_string(),
        explanation: value
            .get("explanation")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        document_summary: value
            .get("documentSummary")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

#[async_trait]
impl JobHandler for LlmClassifyWorker {
    async fn process(&self, job: &ActiveJob) -> Result<serde_json::Value, ProcessError> {
        let input = parse_input(job)?;
        let text = input
            .extracted_text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                SubtaskError::InvalidInput("classification requires extracted text".into())
            })?;

        let system_prompt = classification_prompt();
        for attempt in 1..=LLM_VALIDATION_ATTEMPTS {
            let opts = LlmOptions {
                cache_prefix: Some(job.queue.clone()),
                temperature: Some(0.0),
                response_format: Some(ResponseFormat::JsonObject),
                skip_cache: attempt > 1,
                ..Default::default()
            };
            let response = self
                .ctx
                .llm
                .text(&system_prompt, text, opts)
                .await
                .map_err(SubtaskError::from)?;
            self.ctx
                .billing
                .record_response(&input.document_id, &response)
                .await
                .map_err(SubtaskError::from)?;

            match validate_classification(&response.content) {
                Ok(classification) => {
                    info!(
                        "Classified {} as {} ({:.2})",
                        input.document_id,
                        classification.document_type,
                        classification.extraction_confidence
                    );
                    return Ok(serde_json::to_value(classification)
                        .map_err(|e| SubtaskError::InvalidInput(e.to_string()))?);
                }
                Err(e) => warn!(
                    "Classification invalid for {} (attempt {}): {}",
                    input.document_id, attempt, e
                ),
            }
        }

        // Safe fallback: an unclassified document is still a terminal
        // outcome, not a pipeline failure.
        warn!(
            "Classification exhausted retries for {}, falling back to {}",
            input.document_id, UNCLASSIFIED
        );
        Ok(json!({
            "documentType": UNCLASSIFIED,
            "extractionConfidence": 0.0,
            "language": "unknown",
            "explanation": "Validation failed",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_classification() {
        let result = validate_classification(
            r#"{"documentType":"income.payslip","extractionConfidence":0.95,"language":"fr","explanation":"monthly salary"}"#,
        )
        .unwrap();
        assert_eq!(result.document_type, "income.payslip");
        assert_eq!(result.extraction_confidence, 0.95);
        assert_eq!(result.explanation.as_deref(), Some("monthly salary"));
    }

    #[test]
    fn test_pseudo_types_accepted() {
        for id in ["other.unclassified", "other.irrelevant"] {
            let text = format!(
                r#"{{"documentType":"{}","extractionConfidence":0.2,"language":"en"}}"#,
                id
            );
            assert!(validate_classification(&text).is_ok(), "{id}");
        }
    }

    #[test]
    fn test_splitted_rejected_from_classifier() {
        let err = validate_classification(
            r#"{"documentType":"splitted","extractionConfidence":1.0,"language":"fr"}"#,
        )
        .unwrap_err();
        assert!(err.contains("splitted"));
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(validate_classification(
            r#"{"documentType":"income.bonus","extractionConfidence":0.9,"language":"fr"}"#
        )
        .is_err());
    }

    #[test]
    fn test_confidence_bounds() {
        assert!(validate_classification(
            r#"{"documentType":"income.payslip","extractionConfidence":1.2,"language":"fr"}"#
        )
        .is_err());
        assert!(validate_classification(
            r#"{"documentType":"income.payslip","extractionConfidence":-0.1,"language":"fr"}"#
        )
        .is_err());
    }

    #[test]
    fn test_missing_language_rejected() {
        assert!(validate_classification(
            r#"{"documentType":"income.payslip","extractionConfidence":0.9}"#
        )
        .is_err());
    }
}
