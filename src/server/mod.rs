//! HTTP control surface: health, wake, and document enqueue.

mod handlers;
mod routes;

pub use routes::create_router;

use std::sync::Arc;

use crate::config::Settings;
use crate::queue::Broker;

/// Shared state for the control surface.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<dyn Broker>,
    pub settings: Arc<Settings>,
}

/// Serve until the shutdown future resolves; in-flight requests drain.
pub async fn serve(
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let port = state.settings.port;
    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Control surface listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{names, InMemoryBroker, JobState};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState {
            broker: InMemoryBroker::new(),
            settings: Arc::new(Settings::default()),
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert!(json["version"].is_string());
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_wake() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/wake")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "awake");
    }

    #[tokio::test]
    async fn test_queue_enqueues_orchestrator_job() {
        let state = test_state();
        let broker = state.broker.clone();
        let app = create_router(state);

        let body = serde_json::json!({
            "documentId": "doc-1",
            "ownerId": "owner-1",
            "mimeType": "application/pdf",
            "originalFileId": "f-1",
            "originalPath": "docs/doc-1.pdf",
            "originalFilename": "payslip.pdf",
            "priority": 2,
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/queue")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["jobId"], "doc-1-orchestrator");
        assert_eq!(json["documentId"], "doc-1");
        assert_eq!(json["mimeType"], "application/pdf");

        assert_eq!(
            broker.job_state("doc-1-orchestrator").await.unwrap(),
            Some(JobState::Waiting)
        );
    }

    #[tokio::test]
    async fn test_queue_missing_field_is_400() {
        let app = create_router(test_state());
        let body = serde_json::json!({
            "documentId": "doc-1",
            "mimeType": "application/pdf",
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/queue")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("ownerId"));
    }

    #[tokio::test]
    async fn test_queue_stats() {
        let state = test_state();
        let broker = state.broker.clone();
        broker
            .add_job(crate::queue::JobSpec::new(
                names::LLM_OCR,
                "x",
                serde_json::json!({}),
            ))
            .await
            .unwrap();

        let app = create_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/queue/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["llm-ocr"]["waiting"], 1);
        assert!(json["orchestrator"].is_object());
    }
}
