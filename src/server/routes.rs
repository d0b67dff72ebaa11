//! Route table for the control surface.

use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/wake", post(handlers::wake))
        .route("/queue", post(handlers::queue_document))
        .route("/queue/stats", get(handlers::queue_stats))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
