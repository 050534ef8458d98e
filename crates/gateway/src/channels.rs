//! The channel adapter contract.
//!
//! Channel adapters (a Telegram poller, an interactive terminal, …)
//! bridge a messaging surface to the gateway. They own their wire
//! protocol and rendering; the gateway hands them a [`ChannelContext`]
//! exposing `run_turn` and `dispatch_command`.

use std::sync::Arc;

use serde::Serialize;

use drost_domain::error::Result;
use drost_sessions::OriginIdentity;

use crate::commands;
use crate::lanes::OnEvent;
use crate::state::GatewayHandle;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelTurnResult {
    pub session_id: String,
    pub provider_id: String,
    pub response: String,
}

/// A turn submitted by a channel adapter.
pub struct ChannelTurnRequest {
    pub identity: OriginIdentity,
    pub input: String,
    /// Streaming callback for incremental rendering; `None` collects
    /// silently and returns only the final response.
    pub on_event: Option<OnEvent>,
}

/// A `/command` submitted by a channel adapter.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub identity: OriginIdentity,
    pub input: String,
}

/// When `handled` is false the adapter forwards the raw input as a
/// normal turn.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub handled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
}

/// Everything a connected channel adapter may call back into.
#[derive(Clone)]
pub struct ChannelContext {
    pub(crate) gateway: GatewayHandle,
}

impl ChannelContext {
    pub fn new(gateway: GatewayHandle) -> Self {
        Self { gateway }
    }

    pub async fn run_turn(&self, request: ChannelTurnRequest) -> Result<ChannelTurnResult> {
        let on_event = request.on_event.unwrap_or_else(|| Arc::new(|_| {}));
        self.gateway
            .run_channel_turn(&request.identity, &request.input, on_event)
            .await
    }

    pub async fn dispatch_command(&self, request: CommandRequest) -> CommandResult {
        commands::dispatch(&self.gateway, &request).await
    }
}

/// Contract implemented by each channel adapter.
#[async_trait::async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self, ctx: ChannelContext) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}
