//! Delayed maintenance: delete stale OCR uploads from the provider.
//!
//! Uploads are named `document-<uuid>`; anything older than the cutoff is
//! deleted, and the job reschedules itself while younger uploads remain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::queue::{names, ActiveJob, JobHandler, JobSpec, ProcessError};

use super::{SubtaskContext, SubtaskError};

const PURPOSE: &str = "ocr";
const MAX_AGE_MINUTES: i64 = 30;
const RESCHEDULE_DELAY: Duration = Duration::from_secs(30 * 60);

pub struct MistralCleanupWorker {
    ctx: Arc<SubtaskContext>,
}

impl MistralCleanupWorker {
    pub fn new(ctx: Arc<SubtaskContext>) -> Self {
        Self { ctx }
    }
}

/// Whether a provider filename is one of ours: `document-<uuid>`.
fn is_engine_upload(filename: &str) -> bool {
    filename
        .strip_prefix("document-")
        .is_some_and(|rest| uuid::Uuid::parse_str(rest).is_ok())
}

#[async_trait]
impl JobHandler for MistralCleanupWorker {
    async fn process(&self, _job: &ActiveJob) -> Result<serde_json::Value, ProcessError> {
        let files = self
            .ctx
            .llm
            .list_files(PURPOSE)
            .await
            .map_err(SubtaskError::from)?;

        let cutoff = Utc::now() - chrono::Duration::minutes(MAX_AGE_MINUTES);
        let mut deleted = 0usize;
        let mut remaining = 0usize;
        for file in files.iter().filter(|f| is_engine_upload(&f.filename)) {
            if file.created_at < cutoff {
                match self.ctx.llm.delete_file(&file.id).await {
                    Ok(()) => deleted += 1,
                    Err(e) => warn!("Failed to delete provider file {}: {}", file.id, e),
                }
            } else {
                remaining += 1;
            }
        }

        if remaining > 0 {
            // Younger uploads exist: come back for them. The fixed job id
            // keeps the reschedule idempotent.
            self.ctx
                .broker
                .add_job(
                    JobSpec::new(names::MISTRAL_CLEANUP, names::MISTRAL_CLEANUP, json!({}))
                        .with_delay(RESCHEDULE_DELAY),
                )
                .await
                .map_err(SubtaskError::from)?;
        }

        info!(
            "Provider cleanup: {} deleted, {} younger upload(s) remaining",
            deleted, remaining
        );
        Ok(json!({ "deleted": deleted, "remaining": remaining }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_upload_pattern() {
        assert!(is_engine_upload(
            "document-8c8a7f4e-2f1a-4a8b-9c3d-1e2f3a4b5c6d"
        ));
        assert!(!is_engine_upload("document-notauuid"));
        assert!(!is_engine_upload("report.pdf"));
        assert!(!is_engine_upload("document-"));
    }
}
