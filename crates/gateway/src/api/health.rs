//! The health endpoint: a separate GET-only listener.
//!
//! Returns 200 when running, 503 when degraded, 404 for unknown paths.

use std::sync::Weak;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;

use drost_domain::config::HealthConfig;
use drost_domain::error::Result;
use drost_domain::runtime_event::GatewayState;

use super::{serve_router, ServerHandle, ServerKind};
use crate::supervisor::Supervisor;

pub async fn serve(cfg: &HealthConfig, supervisor: Weak<Supervisor>) -> Result<ServerHandle> {
    let router = Router::new()
        .route(&cfg.path, get(health))
        .fallback(not_found)
        .with_state(supervisor);
    serve_router(ServerKind::Health, &cfg.host, cfg.port, router).await
}

async fn health(State(supervisor): State<Weak<Supervisor>>) -> impl IntoResponse {
    let Some(supervisor) = supervisor.upgrade() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "ok": false, "state": "stopped" })),
        );
    };

    let status = supervisor.status_json();
    let code = match supervisor.state() {
        GatewayState::Running => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(status))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "not found" })),
    )
}
