//! Axum server setup and router configuration.

use crate::shutdown::shutdown_requested;
use crate::state::AppState;
use axum::{
    Json, Router,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::Serialize;
use tokio::net::TcpListener;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/health", get(health_check))
        .route("/api/v1/sessions", post(crate::api::open_session))
        .route("/api/v1/sessions/{session_id}", delete(crate::api::close_session))
        .nest("/api/v1/sessions/{session_id}", crate::api::router())
        // Add state to all routes
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Simple health check - returns OK if the server is running.
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Serve the streaming transport until `state.shutdown` fires.
pub async fn run_server(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    tracing::info!("Server listening on {}", listener.local_addr()?);
    let mut shutdown = state.shutdown.clone();
    let router = build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown_requested(&mut shutdown).await })
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use paych_core::config::SharedConfig;
    use paych_core::memory::MemoryNode;
    use paych_core::subscriptions::Subscriptions;
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn health_reports_the_version() {
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let state = AppState::new(
            Arc::new(Subscriptions::new(MemoryNode::new())),
            SharedConfig::new(Default::default()),
            rx,
        );
        let resp = build_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }
}
