//! The provider adapter contract.
//!
//! Adapters emit only normalized [`StreamPayload`]s through the emit
//! callback; the envelope (session, provider, timestamp) is stamped by
//! the caller. Image inputs arrive pre-resolved or lazily through the
//! [`ImageResolver`]; adapters without image support ignore them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use drost_domain::config::ProviderProfile;
use drost_domain::error::Result;
use drost_domain::event::StreamPayload;
use drost_domain::message::{HistoryMessage, ImageRef, InputImage};
use drost_domain::CancelToken;

use crate::auth::TokenResolver;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Probe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeCode {
    Ok,
    MissingAuth,
    Unreachable,
    IncompatibleTransport,
    ProviderError,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub provider_id: String,
    pub ok: bool,
    pub code: ProbeCode,
    pub message: String,
}

impl ProbeResult {
    pub fn ok(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            ok: true,
            code: ProbeCode::Ok,
            message: String::new(),
        }
    }

    pub fn fail(provider_id: impl Into<String>, code: ProbeCode, message: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            ok: false,
            code,
            message: message.into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn request / context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Event sink handed to the manager: `(provider_id, payload)`. The
/// provider id varies across failover attempts within one turn.
pub type EmitSink = Arc<dyn Fn(&str, StreamPayload) + Send + Sync>;

/// Result of one tool invocation, as seen by a provider adapter.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutcome {
    pub ok: bool,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Dispatches tool calls requested by a provider back into the tool
/// executor. Implementations emit the `tool.call.*` events themselves.
#[async_trait::async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn run_tool(&self, name: &str, input: Value) -> ToolOutcome;
}

/// Lazily resolves a persisted image reference into inline bytes.
#[async_trait::async_trait]
pub trait ImageResolver: Send + Sync {
    async fn resolve_input_image(&self, image: &ImageRef) -> Result<InputImage>;
}

/// Image resolver for contexts without a media store.
pub struct NoImages;

#[async_trait::async_trait]
impl ImageResolver for NoImages {
    async fn resolve_input_image(&self, image: &ImageRef) -> Result<InputImage> {
        Err(drost_domain::Error::NotFound(format!(
            "no media store; cannot resolve {}",
            image.sha256
        )))
    }
}

/// Everything an adapter may call back into during a turn.
pub struct TurnContext {
    /// Emit a normalized event. Adapters pass their own payloads; the
    /// envelope is stamped upstream.
    pub emit: Arc<dyn Fn(StreamPayload) + Send + Sync>,
    pub tools: Arc<dyn ToolDispatcher>,
    pub tokens: Arc<dyn TokenResolver>,
    pub images: Arc<dyn ImageResolver>,
}

/// One normalized turn request.
#[derive(Clone)]
pub struct TurnRequest {
    pub profile: ProviderProfile,
    pub provider_id: String,
    pub session_id: String,
    pub messages: Vec<HistoryMessage>,
    pub input_images: Vec<InputImage>,
    pub available_tool_names: Vec<String>,
    pub cancel: CancelToken,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every provider back-end implements.
///
/// `run_turn` must emit only normalized events and honour the request's
/// cancel token best-effort. A transport-class `Err` return allows the
/// manager to fail over along the session's route; emitting an explicit
/// `provider.error` event and returning `Ok` terminates the turn with
/// no failover.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn adapter_id(&self) -> &str;

    async fn probe(&self, profile: &ProviderProfile, tokens: &dyn TokenResolver) -> ProbeResult;

    async fn run_turn(&self, req: TurnRequest, ctx: &TurnContext) -> Result<()>;
}
