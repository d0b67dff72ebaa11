//! Reactive per-document orchestrator.
//!
//! One job per document drives the state machine: each invocation loops
//! synchronously through transitions, spawning children onto their queues
//! and parking itself in waiting-children at every `Wait*` state. The
//! broker re-invokes the job when the last child completes; the
//! `SubtaskInput` persisted on the job record is the only durable state
//! between ticks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::json;
use tracing::{debug, error, info};

use crate::models::{
    ClassificationResult, DocumentStatus, ExtractionMethod, PreAnalysisResult, ProcessStatus,
    ProcessingStep, SubtaskInput,
};
use crate::persistence::{DocumentUpdate, PersistenceFacade};
use crate::queue::{
    job_id_for, names, ActiveJob, FailureHandler, JobHandler, JobSpec, ProcessError,
};
use crate::services::writeback;
use crate::subtasks::{parse_input, SubtaskContext, SubtaskError};
use crate::taxonomy::{IRRELEVANT, UNCLASSIFIED};
use crate::utils::mime::{family, MimeFamily};

/// Rejection reasons surfaced to `process_history`.
mod reject {
    pub const NO_USABLE_TEXT: &str = "no_usable_text";
    pub const NO_TEXT_IN_IMAGE: &str = "no_text_detected_in_image";
    pub const CONVERSION_FAILED: &str = "conversion_failed";
}

enum Flow {
    Continue,
    Suspend,
}

pub struct Orchestrator {
    ctx: Arc<SubtaskContext>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<SubtaskContext>) -> Self {
        Self { ctx }
    }

    async fn log_step(
        &self,
        input: &SubtaskInput,
        status: ProcessStatus,
    ) -> Result<(), SubtaskError> {
        self.ctx
            .db
            .log_process_step(&input.document_id, status, None)
            .await?;
        Ok(())
    }

    /// Spawn a child with the idempotent `${documentId}-${queue}` id and
    /// an immutable snapshot of the current input.
    async fn spawn(
        &self,
        job: &ActiveJob,
        input: &SubtaskInput,
        queue: &str,
    ) -> Result<(), SubtaskError> {
        let snapshot = serde_json::to_value(input)
            .map_err(|e| SubtaskError::InvalidInput(e.to_string()))?;
        self.ctx
            .broker
            .add_job(
                JobSpec::new(queue, job_id_for(&input.document_id, queue), snapshot)
                    .child_of(job.id.clone())
                    .with_priority(input.priority.unwrap_or(0)),
            )
            .await?;
        debug!("Spawned {} for {}", queue, input.document_id);
        Ok(())
    }

    /// Persist the mutated input and park the job until children finish.
    /// When the broker reports no children outstanding the loop continues
    /// on this same tick.
    async fn suspend(&self, job: &ActiveJob, input: &SubtaskInput) -> Result<Flow, SubtaskError> {
        self.ctx
            .broker
            .update_job_data(
                &job.id,
                serde_json::to_value(input)
                    .map_err(|e| SubtaskError::InvalidInput(e.to_string()))?,
            )
            .await?;
        let outstanding = self
            .ctx
            .broker
            .move_to_waiting_children(&job.id, &job.token)
            .await?;
        Ok(if outstanding {
            Flow::Suspend
        } else {
            Flow::Continue
        })
    }

    fn child<'a>(
        children: &'a HashMap<String, serde_json::Value>,
        queue: &str,
    ) -> Option<&'a serde_json::Value> {
        children.get(queue).filter(|v| !v.is_null())
    }
}

#[async_trait]
impl JobHandler for Orchestrator {
    async fn process(&self, job: &ActiveJob) -> Result<serde_json::Value, ProcessError> {
        let mut input = parse_input(job)?;

        loop {
            let children = self
                .ctx
                .broker
                .child_values(&job.id)
                .await
                .map_err(SubtaskError::from)?;

            match input.step {
                ProcessingStep::Initial => {
                    info!(
                        "Processing {} ({}, source {})",
                        input.document_id, input.mime_type, input.source
                    );
                    self.ctx
                        .db
                        .update_document(
                            &input.document_id,
                            DocumentUpdate {
                                status: Some(DocumentStatus::Processing),
                                ..Default::default()
                            },
                        )
                        .await
                        .map_err(SubtaskError::from)?;

                    match family(&input.mime_type) {
                        MimeFamily::Pdf => {
                            input.step = ProcessingStep::PreAnalysis;
                        }
                        MimeFamily::Image => {
                            self.spawn(job, &input, names::IMAGE_SCALING).await?;
                            input.step = ProcessingStep::WaitExtraction;
                            if let Flow::Suspend = self.suspend(job, &input).await? {
                                return Err(ProcessError::WaitingChildren);
                            }
                        }
                        MimeFamily::Text => {
                            self.log_step(&input, ProcessStatus::Extracting).await?;
                            self.spawn(job, &input, names::TXT_SIMPLE_EXTRACT).await?;
                            input.step = ProcessingStep::WaitTextExtraction;
                            if let Flow::Suspend = self.suspend(job, &input).await? {
                                return Err(ProcessError::WaitingChildren);
                            }
                        }
                        f if f.needs_conversion() => {
                            self.log_step(&input, ProcessStatus::Converting).await?;
                            self.spawn(job, &input, names::FORMAT_CONVERSION).await?;
                            input.step = ProcessingStep::WaitConversion;
                            if let Flow::Suspend = self.suspend(job, &input).await? {
                                return Err(ProcessError::WaitingChildren);
                            }
                        }
                        _ => {
                            input.step = ProcessingStep::Classify;
                        }
                    }
                }

                ProcessingStep::PreAnalysis => {
                    self.log_step(&input, ProcessStatus::PreAnalyzing).await?;
                    self.spawn(job, &input, names::PDF_PRE_ANALYSIS).await?;
                    input.step = ProcessingStep::WaitPreAnalysis;
                    if let Flow::Suspend = self.suspend(job, &input).await? {
                        return Err(ProcessError::WaitingChildren);
                    }
                }

                ProcessingStep::WaitPreAnalysis => {
                    let value = Self::child(&children, names::PDF_PRE_ANALYSIS).ok_or_else(|| {
                        SubtaskError::InvalidInput("pre-analysis result missing".into())
                    })?;
                    let analysis: PreAnalysisResult = serde_json::from_value(value.clone())
                        .map_err(|e| SubtaskError::InvalidInput(e.to_string()))?;
                    input.pre_analysis = Some(analysis);
                    input.step = ProcessingStep::Routing;
                }

                ProcessingStep::Routing => {
                    let analysis = input.pre_analysis.clone().ok_or_else(|| {
                        SubtaskError::InvalidInput("routing without pre-analysis".into())
                    })?;
                    if analysis.is_multi_document {
                        self.log_step(&input, ProcessStatus::Splitting).await?;
                        self.spawn(job, &input, names::PDF_SPLITTER).await?;
                    } else if analysis.text_quality.is_usable() {
                        self.log_step(&input, ProcessStatus::Extracting).await?;
                        self.spawn(job, &input, names::PDF_SIMPLE_EXTRACT).await?;
                    } else {
                        // Poor or absent text layer: OCR path.
                        self.log_step(&input, ProcessStatus::Scaling).await?;
                        self.spawn(job, &input, names::IMAGE_SCALING).await?;
                    }
                    input.step = ProcessingStep::WaitExtraction;
                    if let Flow::Suspend = self.suspend(job, &input).await? {
                        return Err(ProcessError::WaitingChildren);
                    }
                }

                ProcessingStep::WaitExtraction => {
                    if Self::child(&children, names::PDF_SPLITTER).is_some() {
                        // The children run their own pipelines; the parent
                        // finalizes with the split marker only.
                        input.split_completed = true;
                        input.step = ProcessingStep::Finalize;
                    } else if Self::child(&children, names::IMAGE_SCALING).is_some()
                        && Self::child(&children, names::LLM_OCR).is_none()
                        && (family(&input.mime_type) == MimeFamily::Image
                            || input
                                .pre_analysis
                                .as_ref()
                                .is_some_and(|p| !p.text_quality.is_usable()))
                    {
                        input.step = ProcessingStep::PreFilter;
                    } else if let Some(value) = Self::child(&children, names::LLM_OCR) {
                        let raw_text = value
                            .get("rawText")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default();
                        if raw_text.trim().is_empty() {
                            input.is_rejected = true;
                            input.rejection_reason = Some(reject::NO_USABLE_TEXT.into());
                            input.step = ProcessingStep::Finalize;
                        } else {
                            input.extracted_text = Some(raw_text.to_string());
                            input.extraction_method = Some(ExtractionMethod::Vision);
                            input.step = ProcessingStep::Classify;
                        }
                    } else if let Some(value) = Self::child(&children, names::PDF_SIMPLE_EXTRACT) {
                        let text = value
                            .get("text")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default();
                        input.extracted_text = Some(text.to_string());
                        input.extraction_method = Some(ExtractionMethod::Pdf);
                        input.step = ProcessingStep::Classify;
                    } else {
                        return Err(SubtaskError::InvalidInput(
                            "no extractor output at WaitExtraction".into(),
                        )
                        .into());
                    }
                }

                ProcessingStep::WaitTextExtraction => {
                    let value =
                        Self::child(&children, names::TXT_SIMPLE_EXTRACT).ok_or_else(|| {
                            SubtaskError::InvalidInput("text extraction result missing".into())
                        })?;
                    let text = value
                        .get("text")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    input.extracted_text = Some(text.to_string());
                    input.extraction_method = Some(ExtractionMethod::Pdf);
                    input.step = ProcessingStep::Classify;
                }

                ProcessingStep::WaitConversion => {
                    let value =
                        Self::child(&children, names::FORMAT_CONVERSION).ok_or_else(|| {
                            SubtaskError::InvalidInput("conversion result missing".into())
                        })?;
                    if let Some(text) = value.get("extractedText").and_then(|v| v.as_str()) {
                        // Spreadsheet path: direct text, recorded as the
                        // pdf method for downstream formatting rules.
                        input.extracted_text = Some(text.to_string());
                        input.extraction_method = Some(ExtractionMethod::Pdf);
                        input.step = ProcessingStep::Classify;
                    } else if let Some(path) =
                        value.get("convertedPdfPath").and_then(|v| v.as_str())
                    {
                        input.converted_pdf_path = Some(path.to_string());
                        input.mime_type = "application/pdf".to_string();
                        input.step = ProcessingStep::PreAnalysis;
                    } else {
                        input.is_rejected = true;
                        input.rejection_reason = Some(reject::CONVERSION_FAILED.into());
                        input.step = ProcessingStep::Finalize;
                    }
                }

                ProcessingStep::PreFilter => {
                    let value = Self::child(&children, names::IMAGE_SCALING).ok_or_else(|| {
                        SubtaskError::InvalidInput("scaling result missing".into())
                    })?;
                    let paths: Vec<String> = value
                        .get("scaledPaths")
                        .and_then(|v| serde_json::from_value(v.clone()).ok())
                        .unwrap_or_default();
                    input.scaled_image_paths = Some(paths);
                    self.log_step(&input, ProcessStatus::PreFiltering).await?;
                    self.spawn(job, &input, names::IMAGE_PREFILTER).await?;
                    input.step = ProcessingStep::WaitPreFilter;
                    if let Flow::Suspend = self.suspend(job, &input).await? {
                        return Err(ProcessError::WaitingChildren);
                    }
                }

                ProcessingStep::WaitPreFilter => {
                    let value = Self::child(&children, names::IMAGE_PREFILTER).ok_or_else(|| {
                        SubtaskError::InvalidInput("prefilter result missing".into())
                    })?;
                    let has_text = value
                        .get("hasText")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    if !has_text {
                        input.is_rejected = true;
                        input.rejection_reason = Some(reject::NO_TEXT_IN_IMAGE.into());
                        input.step = ProcessingStep::Finalize;
                    } else {
                        self.log_step(&input, ProcessStatus::Extracting).await?;
                        self.spawn(job, &input, names::LLM_OCR).await?;
                        input.step = ProcessingStep::WaitExtraction;
                        if let Flow::Suspend = self.suspend(job, &input).await? {
                            return Err(ProcessError::WaitingChildren);
                        }
                    }
                }

                ProcessingStep::Classify => {
                    self.log_step(&input, ProcessStatus::Classifying).await?;
                    self.spawn(job, &input, names::LLM_CLASSIFY).await?;
                    input.step = ProcessingStep::WaitClassify;
                    if let Flow::Suspend = self.suspend(job, &input).await? {
                        return Err(ProcessError::WaitingChildren);
                    }
                }

                ProcessingStep::WaitClassify => {
                    let value = Self::child(&children, names::LLM_CLASSIFY).ok_or_else(|| {
                        SubtaskError::InvalidInput("classification result missing".into())
                    })?;
                    let classification: ClassificationResult =
                        serde_json::from_value(value.clone())
                            .map_err(|e| SubtaskError::InvalidInput(e.to_string()))?;
                    if classification.document_type == IRRELEVANT
                        || classification.document_type == UNCLASSIFIED
                    {
                        input.is_rejected = true;
                        input.rejection_reason = Some(classification.document_type.clone());
                        input.step = ProcessingStep::Finalize;
                    } else {
                        input.classification = Some(classification);
                        input.step = ProcessingStep::Normalize;
                    }
                }

                ProcessingStep::Normalize => {
                    self.log_step(&input, ProcessStatus::Normalizing).await?;
                    self.spawn(job, &input, names::LLM_NORMALIZE).await?;
                    input.step = ProcessingStep::WaitNormalize;
                    if let Flow::Suspend = self.suspend(job, &input).await? {
                        return Err(ProcessError::WaitingChildren);
                    }
                }

                ProcessingStep::WaitNormalize => {
                    // A null value means normalization gave up; the
                    // document still finalizes with its classification.
                    if let Some(value) = Self::child(&children, names::LLM_NORMALIZE) {
                        if let Some(file_id) = value.get("llmFileId").and_then(|v| v.as_str()) {
                            input.llm_file_id = Some(file_id.to_string());
                        }
                    }
                    input.step = ProcessingStep::Finalize;
                }

                ProcessingStep::Finalize => {
                    let results = writeback::finalize(
                        &self.ctx.settings,
                        &self.ctx.db,
                        &self.ctx.files,
                        &self.ctx.llm,
                        &input,
                        &children,
                    )
                    .await
                    .map_err(ProcessError::Failed)?;
                    self.ctx
                        .broker
                        .update_job_data(
                            &job.id,
                            serde_json::to_value(&input)
                                .map_err(|e| SubtaskError::InvalidInput(e.to_string()))?,
                        )
                        .await
                        .map_err(SubtaskError::from)?;
                    return Ok(results);
                }
            }
        }
    }
}

/// Final-failure handler for the orchestrator queue: never leave a
/// document in `processing`. The deepest child's reason wins when the
/// orchestrator's own message only records the propagation.
pub fn failure_handler(
    db: Arc<dyn PersistenceFacade>,
    worker_version: String,
) -> FailureHandler {
    Arc::new(move |info| -> BoxFuture<'static, ()> {
        let db = db.clone();
        let worker_version = worker_version.clone();
        Box::pin(async move {
            let Some(document_id) = info
                .data
                .get("documentId")
                .and_then(|v| v.as_str())
                .map(str::to_string)
            else {
                error!("Failed orchestrator job {} has no documentId", info.job_id);
                return;
            };

            let reason = if info.reason.contains("child job") {
                info.failed_children
                    .last()
                    .map(|child| child.reason.clone())
                    .unwrap_or_else(|| info.reason.clone())
            } else {
                info.reason.clone()
            };

            let details = json!({
                "workerVersion": worker_version,
                "jobId": info.job_id,
            });
            if let Err(e) = db
                .mark_processing_complete(
                    &document_id,
                    DocumentStatus::Errored,
                    Some(&reason),
                    Some(details),
                )
                .await
            {
                error!("Failed to mark {} as errored: {}", document_id, e);
            } else {
                info!("Document {} marked errored: {}", document_id, reason);
            }
        })
    })
}
