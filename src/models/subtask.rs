//! In-flight pipeline state and typed subtask results.
//!
//! `SubtaskInput` is the single message shape every queue carries. The
//! orchestrator owns the copy stored on its own job record and mutates it
//! between ticks; children receive an immutable snapshot at spawn.

use serde::{Deserialize, Serialize};

/// How the usable text for a document was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Vision,
    Pdf,
}

/// Orchestrator state machine step, persisted on the job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessingStep {
    Initial,
    PreAnalysis,
    WaitPreAnalysis,
    Routing,
    WaitConversion,
    WaitExtraction,
    WaitTextExtraction,
    PreFilter,
    WaitPreFilter,
    Classify,
    WaitClassify,
    Normalize,
    WaitNormalize,
    Finalize,
}

impl Default for ProcessingStep {
    fn default() -> Self {
        Self::Initial
    }
}

/// The message consumed by every queue.
///
/// Fields accumulate as the pipeline progresses; optional fields stay
/// absent on the wire until a stage fills them in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskInput {
    pub document_id: String,
    pub owner_id: String,
    pub mime_type: String,
    pub original_file_id: String,
    pub original_path: String,
    #[serde(default)]
    pub step: ProcessingStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scaled_image_paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converted_pdf_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<ExtractionMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_analysis: Option<PreAnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_rejected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub split_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl SubtaskInput {
    /// Fresh input for a newly queued document.
    pub fn new(
        document_id: impl Into<String>,
        owner_id: impl Into<String>,
        mime_type: impl Into<String>,
        original_file_id: impl Into<String>,
        original_path: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            owner_id: owner_id.into(),
            mime_type: mime_type.into(),
            original_file_id: original_file_id.into(),
            original_path: original_path.into(),
            step: ProcessingStep::Initial,
            scaled_image_paths: None,
            converted_pdf_path: None,
            extracted_text: None,
            extraction_method: None,
            pre_analysis: None,
            classification: None,
            original_filename: None,
            source: source.into(),
            llm_file_id: None,
            is_rejected: false,
            rejection_reason: None,
            split_completed: false,
            priority: None,
        }
    }
}

/// Text-layer quality reported by pre-analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextQuality {
    Best,
    Good,
    Poor,
    None,
}

impl TextQuality {
    /// Whether the native text layer is usable without OCR.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Best | Self::Good)
    }
}

/// One logical document found inside a multi-document PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSpec {
    #[serde(rename = "type")]
    pub type_hint: String,
    /// 1-based page indices into the source PDF.
    pub pages: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Outcome of the deterministic PDF inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreAnalysisResult {
    #[serde(default)]
    pub is_multi_document: bool,
    #[serde(default)]
    pub document_count: u32,
    #[serde(default)]
    pub page_count: u32,
    #[serde(default)]
    pub has_text_layer: bool,
    pub text_quality: TextQuality,
    #[serde(default)]
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<SegmentSpec>>,
}

impl PreAnalysisResult {
    /// Result for non-PDF input: nothing to analyze.
    pub fn empty() -> Self {
        Self {
            is_multi_document: false,
            document_count: 0,
            page_count: 0,
            has_text_layer: false,
            text_quality: TextQuality::None,
            language: String::new(),
            documents: None,
        }
    }
}

/// Result of llm-classify.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub document_type: String,
    pub extraction_confidence: f64,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_summary: Option<String>,
}

/// Result of llm-normalize: fields validated against the per-type schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationResult {
    pub template: String,
    pub fields: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_file_id: Option<String>,
}

/// Result of format-conversion. Exactly one of the two paths is taken:
/// spreadsheets yield direct text, everything else yields a PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converted_pdf_path: Option<String>,
}

/// Result of pdf-simple-extract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleExtractResult {
    pub text: String,
    pub page_count: u32,
    pub has_text_layer: bool,
    pub text_quality: TextQuality,
}

/// Result of image-scaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingResult {
    pub scaled_paths: Vec<String>,
    pub original_dimensions: Vec<Dimensions>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Result of image-prefilter (cheap Tesseract pass).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefilterResult {
    pub has_text: bool,
    pub raw_text: String,
    pub char_count: usize,
}

/// Result of llm-ocr.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub raw_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub page_count: u32,
    pub extracted_by: String,
    pub model: String,
    #[serde(default)]
    pub cached: bool,
}

/// Result of pdf-splitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfSplitResult {
    pub split_into: u32,
    pub child_document_ids: Vec<String>,
}

/// Token/page usage attributed to one document, priced and accumulated
/// into its `llm_billing` JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingDelta {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub pages: u64,
    pub cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtask_input_wire_shape() {
        let input = SubtaskInput::new("doc-1", "owner-1", "application/pdf", "f-1", "p/doc.pdf", "upload");
        let v = serde_json::to_value(&input).unwrap();
        assert_eq!(v["documentId"], "doc-1");
        assert_eq!(v["step"], "initial");
        // Unset optionals stay off the wire.
        assert!(v.get("extractedText").is_none());
        assert!(v.get("isRejected").is_none());
    }

    #[test]
    fn test_step_serialization_is_camel_case() {
        let s = serde_json::to_string(&ProcessingStep::WaitPreAnalysis).unwrap();
        assert_eq!(s, "\"waitPreAnalysis\"");
    }

    #[test]
    fn test_text_quality_usability() {
        assert!(TextQuality::Best.is_usable());
        assert!(TextQuality::Good.is_usable());
        assert!(!TextQuality::Poor.is_usable());
        assert!(!TextQuality::None.is_usable());
    }

    #[test]
    fn test_pre_analysis_tolerates_missing_fields() {
        let parsed: PreAnalysisResult =
            serde_json::from_str(r#"{"textQuality":"good","pageCount":3}"#).unwrap();
        assert_eq!(parsed.page_count, 3);
        assert!(!parsed.is_multi_document);
        assert!(parsed.documents.is_none());
    }
}
