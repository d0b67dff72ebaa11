//! Job broker abstraction for the reactive pipeline.
//!
//! The orchestrator and every subtask worker talk to a `Broker` trait so
//! the queue backend stays swappable (in-process today, a distributed
//! broker later). The in-memory backend implements the full reactive
//! contract: idempotent enqueue, retries with exponential backoff,
//! delayed jobs, and parent/child suspension via waiting-children.

mod memory;
mod worker;

pub use memory::InMemoryBroker;
pub use worker::{JobHandler, ProcessError, Worker};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

/// Queue names, bit-exact: the broker must never round-robin by job name.
pub mod names {
    pub const ORCHESTRATOR: &str = "orchestrator";
    pub const FORMAT_CONVERSION: &str = "format-conversion";
    pub const PDF_PRE_ANALYSIS: &str = "pdf-pre-analysis";
    pub const PDF_SIMPLE_EXTRACT: &str = "pdf-simple-extract";
    pub const TXT_SIMPLE_EXTRACT: &str = "txt-simple-extract";
    pub const IMAGE_SCALING: &str = "image-scaling";
    pub const IMAGE_PREFILTER: &str = "image-prefilter";
    pub const LLM_OCR: &str = "llm-ocr";
    pub const LLM_CLASSIFY: &str = "llm-classify";
    pub const LLM_NORMALIZE: &str = "llm-normalize";
    pub const PDF_SPLITTER: &str = "pdf-splitter";
    pub const MISTRAL_CLEANUP: &str = "mistral-cleanup";

    /// Every subtask queue (the orchestrator queue excluded).
    pub const SUBTASKS: &[&str] = &[
        FORMAT_CONVERSION,
        PDF_PRE_ANALYSIS,
        PDF_SIMPLE_EXTRACT,
        TXT_SIMPLE_EXTRACT,
        IMAGE_SCALING,
        IMAGE_PREFILTER,
        LLM_OCR,
        LLM_CLASSIFY,
        LLM_NORMALIZE,
        PDF_SPLITTER,
        MISTRAL_CLEANUP,
    ];
}

/// Deterministic job id for a document on a queue.
pub fn job_id_for(document_id: &str, queue: &str) -> String {
    format!("{}-{}", document_id, queue)
}

/// Per-queue retry defaults.
#[derive(Debug, Clone, Copy)]
pub struct QueueDefaults {
    pub attempts: u32,
    pub backoff_base: Duration,
    pub completed_retention: Duration,
    pub completed_retention_count: usize,
    pub failed_retention: Duration,
}

pub fn queue_defaults(queue: &str) -> QueueDefaults {
    QueueDefaults {
        attempts: 3,
        backoff_base: if queue == names::ORCHESTRATOR {
            Duration::from_secs(5)
        } else {
            Duration::from_secs(3)
        },
        completed_retention: Duration::from_secs(24 * 3600),
        completed_retention_count: 1000,
        failed_retention: Duration::from_secs(7 * 24 * 3600),
    }
}

/// A job to enqueue.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub queue: String,
    pub job_id: String,
    pub data: serde_json::Value,
    /// Parent job id; completion of the last pending child reactivates a
    /// parent parked in waiting-children.
    pub parent_id: Option<String>,
    /// Final failure of this job finally fails the parent too.
    pub fail_parent_on_failure: bool,
    pub delay: Option<Duration>,
    /// Lower runs sooner; ties break FIFO.
    pub priority: i32,
}

impl JobSpec {
    pub fn new(queue: impl Into<String>, job_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            queue: queue.into(),
            job_id: job_id.into(),
            data,
            parent_id: None,
            fail_parent_on_failure: false,
            delay: None,
            priority: 0,
        }
    }

    /// Child spawned by an orchestrator job.
    pub fn child_of(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self.fail_parent_on_failure = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A claimed job handed to a worker. The token proves the claim when
/// completing, failing, or parking the job.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub id: String,
    pub queue: String,
    pub data: serde_json::Value,
    pub attempts_made: u32,
    pub token: String,
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    WaitingChildren,
    Completed,
    Failed,
}

/// A finally-failed child, surfaced to the parent's failure handling.
#[derive(Debug, Clone)]
pub struct FailedChild {
    pub job_id: String,
    pub queue: String,
    pub reason: String,
}

/// What `fail` decided for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailDisposition {
    Retried { delay: Duration },
    Failed,
}

/// Per-queue counts for the stats endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub waiting_children: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Info handed to final-failure handlers.
#[derive(Debug, Clone)]
pub struct FailedJobInfo {
    pub job_id: String,
    pub queue: String,
    pub data: serde_json::Value,
    pub reason: String,
    pub failed_children: Vec<FailedChild>,
}

/// Callback invoked (spawned, not awaited inline) when a job reaches
/// final failure, whether from its own processing or child propagation.
pub type FailureHandler = std::sync::Arc<dyn Fn(FailedJobInfo) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Job not found: {0}")]
    NotFound(String),
    #[error("Invalid job state: {0}")]
    InvalidState(String),
    #[error("{0}")]
    Other(String),
}

/// A queue backend managing the full job lifecycle.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a job. Enqueueing an id that is still live is a no-op
    /// (idempotent); a terminal job with the same id is replaced.
    async fn add_job(&self, spec: JobSpec) -> Result<String, BrokerError>;

    /// Claim the next ready job on a queue, waiting up to `timeout`.
    async fn fetch(&self, queue: &str, timeout: Duration) -> Result<Option<ActiveJob>, BrokerError>;

    /// Mark a claimed job completed with its return value.
    async fn complete(
        &self,
        job_id: &str,
        token: &str,
        value: serde_json::Value,
    ) -> Result<(), BrokerError>;

    /// Record a processing failure; retries per queue policy until the
    /// attempt budget is exhausted.
    async fn fail(
        &self,
        job_id: &str,
        token: &str,
        reason: &str,
    ) -> Result<FailDisposition, BrokerError>;

    /// Park a claimed job until its children complete. Returns `true` when
    /// at least one child is still pending (the job is parked) and `false`
    /// when none are (the job stays active and may continue on this tick).
    async fn move_to_waiting_children(&self, job_id: &str, token: &str)
        -> Result<bool, BrokerError>;

    /// Persist updated job data between orchestrator ticks.
    async fn update_job_data(
        &self,
        job_id: &str,
        data: serde_json::Value,
    ) -> Result<(), BrokerError>;

    /// Return values of completed children, keyed by child queue name.
    async fn child_values(
        &self,
        job_id: &str,
    ) -> Result<HashMap<String, serde_json::Value>, BrokerError>;

    /// Finally-failed children of a job, deepest first.
    async fn failed_children(&self, job_id: &str) -> Result<Vec<FailedChild>, BrokerError>;

    async fn job_state(&self, job_id: &str) -> Result<Option<JobState>, BrokerError>;

    /// Return value of a completed job, if any.
    async fn return_value(&self, job_id: &str) -> Result<Option<serde_json::Value>, BrokerError>;

    async fn counts(&self, queue: &str) -> Result<QueueCounts, BrokerError>;

    /// Register a handler invoked on final failure of jobs on a queue.
    async fn set_final_failure_handler(&self, queue: &str, handler: FailureHandler);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_format() {
        assert_eq!(job_id_for("doc-1", names::LLM_OCR), "doc-1-llm-ocr");
        assert_eq!(
            job_id_for("doc-1", names::ORCHESTRATOR),
            "doc-1-orchestrator"
        );
    }

    #[test]
    fn test_queue_defaults() {
        let orchestrator = queue_defaults(names::ORCHESTRATOR);
        assert_eq!(orchestrator.attempts, 3);
        assert_eq!(orchestrator.backoff_base, Duration::from_secs(5));

        let subtask = queue_defaults(names::LLM_OCR);
        assert_eq!(subtask.backoff_base, Duration::from_secs(3));
    }

    #[test]
    fn test_subtask_queue_list_is_complete() {
        assert_eq!(names::SUBTASKS.len(), 11);
        assert!(!names::SUBTASKS.contains(&names::ORCHESTRATOR));
    }
}
