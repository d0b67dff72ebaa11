//! Plain-text extraction: decode the original bytes and cap the length.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::models::FileRole;
use crate::queue::{ActiveJob, JobHandler, ProcessError};
use crate::utils::truncate_with_marker;

use super::{parse_input, SubtaskContext, MAX_EXTRACT_CHARS};

pub struct TxtSimpleExtractWorker {
    ctx: Arc<SubtaskContext>,
}

impl TxtSimpleExtractWorker {
    pub fn new(ctx: Arc<SubtaskContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for TxtSimpleExtractWorker {
    async fn process(&self, job: &ActiveJob) -> Result<serde_json::Value, ProcessError> {
        let input = parse_input(job)?;
        let bytes = self
            .ctx
            .files
            .download(&input.document_id, FileRole::Original)
            .await
            .map_err(super::SubtaskError::from)?;

        // Strict decode first, lossy as the fallback.
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                debug!(
                    "Document {} is not valid UTF-8, decoding lossily",
                    input.document_id
                );
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };
        let text = truncate_with_marker(&text, MAX_EXTRACT_CHARS);

        Ok(json!({ "text": text, "success": true }))
    }
}
