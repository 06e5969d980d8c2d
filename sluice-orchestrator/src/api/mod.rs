//! API Module
//!
//! HTTP transport for the orchestrator: the webhook listener plus a
//! health check. All orchestration logic lives behind the sink; this
//! layer only translates requests and error outcomes.

pub mod error;
pub mod health;
pub mod webhook;

use axum::{Router, routing::get, routing::post};
use tower_http::trace::TraceLayer;

pub use webhook::AppState;

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/webhook", post(webhook::receive_webhook))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
