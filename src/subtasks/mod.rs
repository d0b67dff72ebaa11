//! Single-purpose queue consumers, one per subtask kind.
//!
//! Every worker consumes a `SubtaskInput` snapshot and returns the typed
//! result its queue is known for; unrecoverable errors fail the job and
//! propagate to the orchestrator through the broker.

mod format_conversion;
mod image_prefilter;
mod image_scaling;
mod llm_classify;
mod llm_normalize;
mod llm_ocr;
mod mistral_cleanup;
mod pdf_pre_analysis;
mod pdf_simple_extract;
mod pdf_splitter;
mod txt_simple_extract;

pub use format_conversion::FormatConversionWorker;
pub use image_prefilter::ImagePrefilterWorker;
pub use image_scaling::ImageScalingWorker;
pub use llm_classify::LlmClassifyWorker;
pub use llm_normalize::LlmNormalizeWorker;
pub use llm_ocr::LlmOcrWorker;
pub use mistral_cleanup::MistralCleanupWorker;
pub use pdf_pre_analysis::PdfPreAnalysisWorker;
pub use pdf_simple_extract::PdfSimpleExtractWorker;
pub use pdf_splitter::PdfSplitterWorker;
pub use txt_simple_extract::TxtSimpleExtractWorker;

use std::sync::Arc;

use thiserror::Error;

use crate::config::Settings;
use crate::llm::{LlmError, LlmService};
use crate::models::SubtaskInput;
use crate::persistence::{PersistenceError, PersistenceFacade};
use crate::queue::{ActiveJob, Broker, BrokerError, JobHandler, ProcessError};
use crate::services::Billing;
use crate::storage::{FileCache, StorageError};
use crate::tools::{OfficeToolkit, PdfToolkit, TesseractTool, ToolError};

/// Validation/parsing retry budget for LLM responses.
pub const LLM_VALIDATION_ATTEMPTS: u32 = 3;

/// Extracted text is capped at this many characters.
pub const MAX_EXTRACT_CHARS: usize = 50_000;

#[derive(Debug, Error)]
pub enum SubtaskError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Image error: {0}")]
    Image(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<SubtaskError> for ProcessError {
    fn from(e: SubtaskError) -> Self {
        ProcessError::Failed(anyhow::Error::new(e))
    }
}

/// Shared dependencies injected into every worker.
pub struct SubtaskContext {
    pub settings: Arc<Settings>,
    pub files: Arc<FileCache>,
    pub db: Arc<dyn PersistenceFacade>,
    pub llm: Arc<dyn LlmService>,
    pub broker: Arc<dyn Broker>,
    pub billing: Arc<Billing>,
    pub pdf: PdfToolkit,
    pub office: OfficeToolkit,
    pub tesseract: TesseractTool,
}

/// Deserialize the job's `SubtaskInput` snapshot.
pub(crate) fn parse_input(job: &ActiveJob) -> Result<SubtaskInput, SubtaskError> {
    serde_json::from_value(job.data.clone())
        .map_err(|e| SubtaskError::InvalidInput(format!("job {}: {}", job.id, e)))
}

/// Serialize a typed worker result into the job's return value.
pub(crate) fn to_value<T: serde::Serialize>(result: &T) -> Result<serde_json::Value, SubtaskError> {
    serde_json::to_value(result).map_err(|e| SubtaskError::InvalidInput(e.to_string()))
}

/// Per-queue consumer concurrency (the orchestrator's is set separately).
pub fn concurrency_for(queue: &str) -> usize {
    use crate::queue::names;
    match queue {
        names::FORMAT_CONVERSION => 2,
        names::PDF_PRE_ANALYSIS => 4,
        names::PDF_SIMPLE_EXTRACT => 4,
        names::TXT_SIMPLE_EXTRACT => 5,
        names::IMAGE_SCALING => 3,
        names::IMAGE_PREFILTER => 3,
        names::LLM_OCR => 3,
        names::LLM_CLASSIFY => 4,
        names::LLM_NORMALIZE => 3,
        names::PDF_SPLITTER => 2,
        names::MISTRAL_CLEANUP => 1,
        _ => 2,
    }
}

/// Build the handler for a subtask queue.
pub fn handler_for(queue: &str, ctx: Arc<SubtaskContext>) -> Arc<dyn JobHandler> {
    use crate::queue::names;
    match queue {
        names::FORMAT_CONVERSION => Arc::new(FormatConversionWorker::new(ctx)),
        names::PDF_PRE_ANALYSIS => Arc::new(PdfPreAnalysisWorker::new(ctx)),
        names::PDF_SIMPLE_EXTRACT => Arc::new(PdfSimpleExtractWorker::new(ctx)),
        names::TXT_SIMPLE_EXTRACT => Arc::new(TxtSimpleExtractWorker::new(ctx)),
        names::IMAGE_SCALING => Arc::new(ImageScalingWorker::new(ctx)),
        names::IMAGE_PREFILTER => Arc::new(ImagePrefilterWorker::new(ctx)),
        names::LLM_OCR => Arc::new(LlmOcrWorker::new(ctx)),
        names::LLM_CLASSIFY => Arc::new(LlmClassifyWorker::new(ctx)),
        names::LLM_NORMALIZE => Arc::new(LlmNormalizeWorker::new(ctx)),
        names::PDF_SPLITTER => Arc::new(PdfSplitterWorker::new(ctx)),
        names::MISTRAL_CLEANUP => Arc::new(MistralCleanupWorker::new(ctx)),
        other => unreachable!("unknown subtask queue {}", other),
    }
}
