//! The control API (`/control/v1/...`).
//!
//! JSON over HTTP. GETs need read scope, mutations need admin scope and
//! are rate limited per key per minute. Request bodies are capped.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;

use drost_domain::config::ControlApiConfig;
use drost_domain::error::{Error, Result};
use drost_domain::event::StreamEvent;
use drost_domain::runtime_event::RestartIntent;
use drost_sessions::SessionRecord;

use super::auth::{authorize, hash_token, rate_key, Scope};
use super::ratelimit::RateLimiter;
use super::{serve_router, ServerHandle, ServerKind};
use crate::lanes::OnEvent;
use crate::restart::RestartRequest;
use crate::runtime::session::{CreateOptions, EnsureOptions};
use crate::state::GatewayHandle;

#[derive(Clone)]
pub struct ControlState {
    pub gateway: GatewayHandle,
    pub cfg: ControlApiConfig,
    pub admin_hash: Option<Vec<u8>>,
    pub read_hash: Option<Vec<u8>>,
    pub limiter: Arc<RateLimiter>,
}

pub async fn serve(cfg: &ControlApiConfig, gateway: GatewayHandle) -> Result<ServerHandle> {
    let state = ControlState {
        gateway,
        cfg: cfg.clone(),
        admin_hash: cfg.token.as_deref().map(hash_token),
        read_hash: cfg.read_only_token.as_deref().map(hash_token),
        limiter: Arc::new(RateLimiter::new(cfg.mutation_rate_per_minute)),
    };

    let router = Router::new()
        .route("/control/v1/status", get(status))
        .route("/control/v1/sessions", get(list_sessions).post(create_session))
        .route("/control/v1/sessions/import", post(import_session))
        .route("/control/v1/sessions/:id", get(get_session))
        .route("/control/v1/sessions/:id/export", get(export_session))
        .route("/control/v1/sessions/:id/switch", post(switch_provider))
        .route("/control/v1/providers/status", get(providers_status))
        .route("/control/v1/events", get(super::events::runtime_events))
        .route("/control/v1/chat/send", post(chat_send))
        .route("/control/v1/runtime/restart", post(runtime_restart))
        .route("/control/v1/runtime/reload", post(runtime_reload))
        .route("/control/v1/evolution/begin", post(evolution_begin))
        .route("/control/v1/evolution/commit", post(evolution_commit))
        .route("/control/v1/evolution/abort", post(evolution_abort))
        .layer(RequestBodyLimitLayer::new(cfg.body_limit_bytes))
        .with_state(state);

    serve_router(ServerKind::Control, &cfg.host, cfg.port, router).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn error_response(e: &Error) -> Response {
    let code = match e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) | Error::Busy(_) => StatusCode::CONFLICT,
        Error::InvalidRequest(_) | Error::ValidationError(_) => StatusCode::BAD_REQUEST,
        Error::Disabled(_) => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        code,
        Json(json!({ "error": e.code(), "message": e.to_string() })),
    )
        .into_response()
}

/// Admin auth + mutation rate limit, in one check.
fn admit_mutation(
    state: &ControlState,
    headers: &HeaderMap,
    addr: SocketAddr,
) -> std::result::Result<(), Response> {
    authorize(state, headers, addr, Scope::Admin)?;
    if !state.limiter.check(&rate_key(headers, addr)) {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "rate_limited" })),
        )
            .into_response());
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Read endpoints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn status(
    State(state): State<ControlState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, addr, Scope::Read) {
        return resp;
    }
    match state.gateway.supervisor() {
        Ok(supervisor) => {
            let mut status = supervisor.status_json();
            if let Some(obj) = status.as_object_mut() {
                obj.insert(
                    "sessions".into(),
                    json!(state
                        .gateway
                        .app
                        .store
                        .list_index()
                        .map(|i| i.len())
                        .unwrap_or(0)),
                );
                obj.insert(
                    "providers".into(),
                    json!(state.gateway.app.providers.profile_ids()),
                );
                obj.insert(
                    "tools".into(),
                    json!({
                        "builtin": state.gateway.app.tools.builtin_count(),
                        "custom": state.gateway.app.tools.custom_count(),
                    }),
                );
            }
            Json(status).into_response()
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn list_sessions(
    State(state): State<ControlState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, addr, Scope::Read) {
        return resp;
    }
    match state.gateway.app.store.list_index() {
        Ok(mut index) => {
            if let Some(limit) = query.limit {
                index.truncate(limit);
            }
            Json(json!({ "sessions": index })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

async fn get_session(
    State(state): State<ControlState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, addr, Scope::Read) {
        return resp;
    }
    match state.gateway.app.store.load(&id) {
        Ok((Some(record), diagnostics)) => Json(json!({
            "session": record,
            "turnInProgress": state.gateway.app.sessions.turn_in_progress(&id),
            "diagnostics": diagnostics
                .iter()
                .map(|d| json!({ "code": d.code, "message": d.message }))
                .collect::<Vec<_>>(),
        }))
        .into_response(),
        Ok((None, _)) => error_response(&Error::NotFound(format!("session '{id}'"))),
        Err(e) => error_response(&e),
    }
}

async fn export_session(
    State(state): State<ControlState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, addr, Scope::Read) {
        return resp;
    }
    match state.gateway.app.store.export(&id) {
        Ok(record) => Json(record).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn providers_status(
    State(state): State<ControlState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, addr, Scope::Read) {
        return resp;
    }
    let cfg = state.gateway.app.config();
    let probes = state
        .gateway
        .app
        .providers
        .probe_all(cfg.providers.startup_probe.timeout_ms)
        .await;
    Json(json!({
        "profiles": cfg.providers.profiles,
        "routes": cfg.providers.routes,
        "probes": probes,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mutations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionBody {
    session_id: Option<String>,
    channel: Option<String>,
    title: Option<String>,
    from_session_id: Option<String>,
}

async fn create_session(
    State(state): State<ControlState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<CreateSessionBody>,
) -> Response {
    if let Err(resp) = admit_mutation(&state, &headers, addr) {
        return resp;
    }
    let result = match body.session_id {
        Some(id) => state.gateway.app.sessions.ensure_session(
            &id,
            EnsureOptions {
                title: body.title,
                origin: None,
            },
        ),
        None => state.gateway.app.sessions.create_session(CreateOptions {
            channel: body.channel,
            title: body.title,
            from_session_id: body.from_session_id,
            origin: None,
        }),
    };
    match result {
        Ok(record) => Json(json!({ "session": record })).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct ImportBody {
    record: SessionRecord,
    #[serde(default)]
    overwrite: bool,
}

async fn import_session(
    State(state): State<ControlState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ImportBody>,
) -> Response {
    if let Err(resp) = admit_mutation(&state, &headers, addr) {
        return resp;
    }
    let session_id = body.record.session_id.clone();
    match state.gateway.app.store.import(body.record, body.overwrite) {
        Ok(()) => Json(json!({ "imported": session_id })).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwitchBody {
    provider_id: String,
}

async fn switch_provider(
    State(state): State<ControlState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<SwitchBody>,
) -> Response {
    if let Err(resp) = admit_mutation(&state, &headers, addr) {
        return resp;
    }
    match state.gateway.switch_provider(&id, &body.provider_id) {
        Ok(()) => Json(json!({
            "sessionId": id,
            "pendingProviderId": body.provider_id,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatSendBody {
    session_id: String,
    input: String,
    #[serde(default)]
    include_events: bool,
}

async fn chat_send(
    State(state): State<ControlState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ChatSendBody>,
) -> Response {
    if let Err(resp) = admit_mutation(&state, &headers, addr) {
        return resp;
    }

    if let Err(e) = state
        .gateway
        .app
        .sessions
        .ensure_session(&body.session_id, EnsureOptions::default())
    {
        return error_response(&e);
    }

    let collected: Arc<Mutex<Vec<StreamEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let on_event: OnEvent = if body.include_events {
        let collected = collected.clone();
        Arc::new(move |event| collected.lock().push(event.clone()))
    } else {
        Arc::new(|_| {})
    };

    match state
        .gateway
        .run_session_turn(&body.session_id, &body.input, on_event)
        .await
    {
        Ok(outcome) => {
            let mut payload = json!({
                "sessionId": outcome.session_id,
                "providerId": outcome.provider_id,
                "response": outcome.response,
            });
            if body.include_events {
                payload["events"] = json!(*collected.lock());
            }
            Json(payload).into_response()
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestartBody {
    #[serde(default)]
    intent: Option<RestartIntent>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    dry_run: bool,
}

async fn runtime_restart(
    State(state): State<ControlState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<RestartBody>,
) -> Response {
    if let Err(resp) = admit_mutation(&state, &headers, addr) {
        return resp;
    }
    match state.gateway.supervisor() {
        Ok(supervisor) => {
            let decision = supervisor
                .request_restart(RestartRequest {
                    intent: body.intent.unwrap_or(RestartIntent::Manual),
                    reason: body.reason,
                    dry_run: body.dry_run,
                })
                .await;
            Json(json!(decision)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

async fn runtime_reload(
    State(state): State<ControlState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(patch): Json<serde_json::Value>,
) -> Response {
    if let Err(resp) = admit_mutation(&state, &headers, addr) {
        return resp;
    }
    match state.gateway.supervisor() {
        Ok(supervisor) => match supervisor.reload_config(&patch).await {
            Ok(report) => Json(json!(report)).into_response(),
            Err(e) => error_response(&e),
        },
        Err(e) => error_response(&e),
    }
}

// ── Evolution ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EvolutionBeginBody {
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvolutionTxBody {
    tx_id: String,
    #[serde(default)]
    reason: Option<String>,
}

fn evolution_manager(
    state: &ControlState,
) -> std::result::Result<Arc<crate::evolution::EvolutionManager>, Response> {
    state
        .gateway
        .supervisor()
        .ok()
        .and_then(|s| s.evolution())
        .ok_or_else(|| error_response(&Error::Stopping("gateway not running".into())))
}

async fn evolution_begin(
    State(state): State<ControlState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<EvolutionBeginBody>,
) -> Response {
    if let Err(resp) = admit_mutation(&state, &headers, addr) {
        return resp;
    }
    let manager = match evolution_manager(&state) {
        Ok(m) => m,
        Err(resp) => return resp,
    };
    match manager.begin(&body.description) {
        Ok(tx) => Json(json!({ "transaction": tx })).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn evolution_commit(
    State(state): State<ControlState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<EvolutionTxBody>,
) -> Response {
    if let Err(resp) = admit_mutation(&state, &headers, addr) {
        return resp;
    }
    let manager = match evolution_manager(&state) {
        Ok(m) => m,
        Err(resp) => return resp,
    };
    let tx = match manager.commit(&body.tx_id) {
        Ok(tx) => tx,
        Err(e) => return error_response(&e),
    };

    // A committed transaction restarts the gateway with self_mod
    // intent; a blocked restart surfaces as `failed`.
    match state.gateway.supervisor() {
        Ok(supervisor) => {
            let decision = supervisor
                .request_restart(RestartRequest {
                    intent: RestartIntent::SelfMod,
                    reason: Some(format!("evolution commit: {}", tx.description)),
                    dry_run: false,
                })
                .await;
            if decision.ok {
                Json(json!({ "committed": tx.tx_id, "restart": decision })).into_response()
            } else {
                error_response(&Error::Failed(format!(
                    "restart blocked: {}",
                    decision.code.as_deref().unwrap_or("unknown")
                )))
            }
        }
        Err(e) => error_response(&e),
    }
}

async fn evolution_abort(
    State(state): State<ControlState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<EvolutionTxBody>,
) -> Response {
    if let Err(resp) = admit_mutation(&state, &headers, addr) {
        return resp;
    }
    let manager = match evolution_manager(&state) {
        Ok(m) => m,
        Err(resp) => return resp,
    };
    match manager.abort(&body.tx_id, body.reason.as_deref().unwrap_or("aborted")) {
        Ok(()) => Json(json!({ "aborted": body.tx_id })).into_response(),
        Err(e) => error_response(&e),
    }
}
