//! Control-surface handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::models::SubtaskInput;
use crate::queue::{job_id_for, names, JobSpec};

use super::AppState;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "version": state.settings.worker_version,
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub async fn wake(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "awake",
        "version": state.settings.worker_version,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRequest {
    pub document_id: Option<String>,
    pub owner_id: Option<String>,
    pub mime_type: Option<String>,
    pub original_file_id: Option<String>,
    pub original_path: Option<String>,
    pub original_filename: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Enqueue one document for processing.
pub async fn queue_document(
    State(state): State<AppState>,
    Json(request): Json<QueueRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    macro_rules! required {
        ($field:ident, $name:literal) => {
            match request.$field {
                Some(value) => value,
                None => {
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(json!({ "error": concat!("missing required field ", $name) })),
                    );
                }
            }
        };
    }
    let document_id = required!(document_id, "documentId");
    let owner_id = required!(owner_id, "ownerId");
    let mime_type = required!(mime_type, "mimeType");
    let original_file_id = required!(original_file_id, "originalFileId");
    let original_path = required!(original_path, "originalPath");
    let original_filename = required!(original_filename, "originalFilename");

    let mut input = SubtaskInput::new(
        &document_id,
        owner_id,
        &mime_type,
        original_file_id,
        original_path,
        request.source.unwrap_or_else(|| "upload".to_string()),
    );
    input.original_filename = Some(original_filename);
    input.priority = request.priority;

    let job_id = job_id_for(&document_id, names::ORCHESTRATOR);
    let data = match serde_json::to_value(&input) {
        Ok(data) => data,
        Err(e) => {
            error!("Failed to serialize queue request: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "serialization failure" })),
            );
        }
    };

    let spec =
        JobSpec::new(names::ORCHESTRATOR, &job_id, data).with_priority(input.priority.unwrap_or(0));
    if let Err(e) = state.broker.add_job(spec).await {
        error!("Failed to enqueue {}: {}", document_id, e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        );
    }

    info!("Queued document {} ({})", document_id, mime_type);
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "jobId": job_id,
            "documentId": document_id,
            "mimeType": mime_type,
        })),
    )
}

/// Per-queue counts, orchestrator first.
pub async fn queue_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut stats = serde_json::Map::new();
    let mut queues = vec![names::ORCHESTRATOR];
    queues.extend_from_slice(names::SUBTASKS);
    for queue in queues {
        match state.broker.counts(queue).await {
            Ok(counts) => {
                stats.insert(
                    queue.to_string(),
                    serde_json::to_value(counts).unwrap_or_default(),
                );
            }
            Err(e) => error!("Failed to read counts for {}: {}", queue, e),
        }
    }
    Json(serde_json::Value::Object(stats))
}
