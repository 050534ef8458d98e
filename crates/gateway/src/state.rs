//! Shared gateway state.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use drost_domain::config::Config;
use drost_domain::error::{Error, Result};
use drost_providers::ProviderManager;
use drost_sessions::{IdentityMap, MediaStore, SessionStore};
use drost_tools::ToolRegistry;

use crate::channels::ChannelTurnResult;
use crate::events::{EventHub, ObservabilitySinks};
use crate::lanes::{LaneScheduler, OnEvent, TurnOutcome};
use crate::runtime::session::SessionRuntime;
use crate::runtime::turn::TurnExecutor;
use crate::supervisor::Supervisor;

/// Deduplicated ordered list of degraded reasons, shared between the
/// supervisor and the turn executor (hook failures land here).
#[derive(Default)]
pub struct DegradedReasons {
    reasons: Mutex<Vec<String>>,
}

impl DegradedReasons {
    pub fn push(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut reasons = self.reasons.lock();
        if !reasons.contains(&reason) {
            tracing::warn!(reason = %reason, "gateway degraded");
            reasons.push(reason);
        }
    }

    pub fn list(&self) -> Vec<String> {
        self.reasons.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.lock().is_empty()
    }

    pub fn clear(&self) {
        self.reasons.lock().clear();
    }
}

/// Components built by the supervisor for one running generation.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<Arc<Config>>>,
    pub store: Arc<SessionStore>,
    pub sessions: Arc<SessionRuntime>,
    pub identity: Arc<IdentityMap>,
    pub providers: Arc<ProviderManager>,
    pub tools: Arc<ToolRegistry>,
    pub lanes: Arc<LaneScheduler>,
    pub executor: Arc<TurnExecutor>,
    pub hub: Arc<EventHub>,
    pub sinks: Arc<ObservabilitySinks>,
    pub media: Arc<MediaStore>,
    pub degraded: Arc<DegradedReasons>,
}

impl AppState {
    pub fn config(&self) -> Arc<Config> {
        self.config.read().clone()
    }
}

/// Handle given to channel adapters, slash commands, and the control
/// API. Holds the app state plus a weak link back to the supervisor
/// for lifecycle operations.
#[derive(Clone)]
pub struct GatewayHandle {
    pub app: AppState,
    pub supervisor: Weak<Supervisor>,
}

impl GatewayHandle {
    pub fn supervisor(&self) -> Result<Arc<Supervisor>> {
        self.supervisor
            .upgrade()
            .ok_or_else(|| Error::Stopping("supervisor is gone".into()))
    }

    /// Run a turn against an explicit session id, through the lanes
    /// when orchestration is enabled.
    pub async fn run_session_turn(
        &self,
        session_id: &str,
        input: &str,
        on_event: OnEvent,
    ) -> Result<TurnOutcome> {
        if self.app.config().orchestration.enabled {
            self.app.lanes.submit(session_id, input, on_event).await
        } else {
            use crate::lanes::TurnRunner;
            self.app
                .executor
                .run_turn(session_id, input, on_event, drost_domain::CancelToken::new())
                .await
        }
    }

    /// Channel entry point: resolve the identity to a session, then run
    /// the turn under the lane policy.
    pub async fn run_channel_turn(
        &self,
        identity: &drost_sessions::OriginIdentity,
        input: &str,
        on_event: OnEvent,
    ) -> Result<ChannelTurnResult> {
        let session_id = self.app.identity.resolve(identity)?;
        self.app.sessions.ensure_session(
            &session_id,
            crate::runtime::session::EnsureOptions {
                title: None,
                origin: Some(identity.clone()),
            },
        )?;

        let outcome = self.run_session_turn(&session_id, input, on_event).await?;
        Ok(ChannelTurnResult {
            session_id: outcome.session_id,
            provider_id: outcome.provider_id,
            response: outcome.response,
        })
    }

    /// Queue a provider switch: validated by the manager, mirrored into
    /// the persisted record so the snapshot shows `pendingProviderId`.
    pub fn switch_provider(&self, session_id: &str, provider_id: &str) -> Result<()> {
        self.app
            .providers
            .queue_provider_switch(session_id, provider_id)?;
        let (record, _) = self.app.store.load(session_id)?;
        let mut record =
            record.ok_or_else(|| Error::NotFound(format!("session '{session_id}'")))?;
        record.pending_provider_id = Some(provider_id.to_owned());
        record.touch();
        self.app.store.save(&mut record)?;
        Ok(())
    }
}
