//! The provider manager.
//!
//! Holds the adapter registry and profile/route tables, runs startup
//! probes, applies queued per-session provider switches, and retries
//! transport-class failures along a route's fallbacks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use drost_domain::config::{ProviderProfile, ProviderRoute, ProvidersConfig};
use drost_domain::error::{Error, Result};
use drost_domain::event::StreamPayload;
use drost_domain::message::{HistoryMessage, InputImage};
use drost_domain::CancelToken;

use crate::auth::TokenResolver;
use crate::traits::{
    EmitSink, ImageResolver, ProbeCode, ProbeResult, ProviderAdapter, ToolDispatcher,
    TurnContext, TurnRequest,
};

pub struct ProviderManager {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    profiles: HashMap<String, ProviderProfile>,
    /// Profile order as configured; the first is the implicit default.
    profile_order: Vec<String>,
    routes: Vec<ProviderRoute>,
    default_provider: Option<String>,
    failover_enabled: bool,
    tokens: Arc<dyn TokenResolver>,
    /// Session id → provider id to promote at the next turn start.
    pending: Mutex<HashMap<String, String>>,
}

impl ProviderManager {
    pub fn new(
        config: &ProvidersConfig,
        failover_enabled: bool,
        tokens: Arc<dyn TokenResolver>,
    ) -> Self {
        let mut profiles = HashMap::new();
        let mut profile_order = Vec::new();
        for p in &config.profiles {
            profile_order.push(p.id.clone());
            profiles.insert(p.id.clone(), p.clone());
        }
        Self {
            adapters: HashMap::new(),
            profiles,
            profile_order,
            routes: config.routes.clone(),
            default_provider: config.default_session_provider.clone(),
            failover_enabled,
            tokens: tokens.clone(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register an adapter implementation under its `adapter_id`.
    pub fn register_adapter(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let id = adapter.adapter_id().to_owned();
        tracing::info!(adapter_id = %id, "registered provider adapter");
        self.adapters.insert(id, adapter);
    }

    pub fn tokens(&self) -> Arc<dyn TokenResolver> {
        self.tokens.clone()
    }

    // ── Lookup ────────────────────────────────────────────────────────

    pub fn profile(&self, provider_id: &str) -> Result<&ProviderProfile> {
        self.profiles
            .get(provider_id)
            .ok_or_else(|| Error::NotFound(format!("provider profile '{provider_id}'")))
    }

    pub fn profile_ids(&self) -> Vec<String> {
        self.profile_order.clone()
    }

    /// Provider assigned to new sessions: the configured default, else
    /// the first profile.
    pub fn default_provider_id(&self) -> Result<String> {
        if let Some(ref id) = self.default_provider {
            return Ok(id.clone());
        }
        self.profile_order
            .first()
            .cloned()
            .ok_or_else(|| Error::Config("no provider profiles configured".into()))
    }

    fn adapter_for(&self, profile: &ProviderProfile) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(&profile.adapter_id)
            .cloned()
            .ok_or_else(|| {
                Error::Config(format!(
                    "no adapter '{}' registered for provider '{}'",
                    profile.adapter_id, profile.id
                ))
            })
    }

    /// Fallback providers declared by the route whose primary is
    /// `provider_id`, in route order.
    fn fallbacks_for(&self, provider_id: &str) -> Vec<String> {
        self.routes
            .iter()
            .find(|r| r.primary == provider_id)
            .map(|r| r.fallbacks.clone())
            .unwrap_or_default()
    }

    // ── Pending switch ────────────────────────────────────────────────

    /// Queue a provider switch; promoted atomically at next turn start.
    pub fn queue_provider_switch(&self, session_id: &str, provider_id: &str) -> Result<()> {
        self.profile(provider_id)?;
        self.pending
            .lock()
            .insert(session_id.to_owned(), provider_id.to_owned());
        tracing::info!(session_id, provider_id, "provider switch queued");
        Ok(())
    }

    /// Take (and clear) the pending provider for a session.
    pub fn take_pending(&self, session_id: &str) -> Option<String> {
        self.pending.lock().remove(session_id)
    }

    pub fn pending_for(&self, session_id: &str) -> Option<String> {
        self.pending.lock().get(session_id).cloned()
    }

    // ── Probes ────────────────────────────────────────────────────────

    /// Probe every profile concurrently. Failures are reported, never
    /// fatal; startup proceeds with degraded reasons.
    pub async fn probe_all(&self, timeout_ms: u64) -> Vec<ProbeResult> {
        let futures = self.profile_order.iter().map(|id| {
            let profile = self.profiles.get(id).cloned();
            async move {
                let Some(profile) = profile else {
                    return ProbeResult::fail(id.clone(), ProbeCode::ProviderError, "unknown profile");
                };
                let adapter = match self.adapter_for(&profile) {
                    Ok(a) => a,
                    Err(e) => {
                        return ProbeResult::fail(
                            profile.id.clone(),
                            ProbeCode::IncompatibleTransport,
                            mask_secrets(&e.to_string()),
                        )
                    }
                };
                match tokio::time::timeout(
                    Duration::from_millis(timeout_ms),
                    adapter.probe(&profile, self.tokens.as_ref()),
                )
                .await
                {
                    Ok(mut result) => {
                        result.message = mask_secrets(&result.message);
                        result
                    }
                    Err(_) => ProbeResult::fail(
                        profile.id.clone(),
                        ProbeCode::Unreachable,
                        format!("probe timed out after {timeout_ms}ms"),
                    ),
                }
            }
        });
        futures_util::future::join_all(futures).await
    }

    // ── Turn dispatch ─────────────────────────────────────────────────

    /// Run one provider turn, failing over along the session's route on
    /// transport-class errors when enabled.
    ///
    /// Returns the provider id that completed the turn. `missing_auth`
    /// is terminal; each failed attempt emits a `provider.error` event
    /// before the next is tried.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_turn(
        &self,
        session_id: &str,
        provider_id: &str,
        messages: Vec<HistoryMessage>,
        input_images: Vec<InputImage>,
        available_tool_names: Vec<String>,
        cancel: CancelToken,
        sink: EmitSink,
        tools: Arc<dyn ToolDispatcher>,
        images: Arc<dyn ImageResolver>,
    ) -> Result<String> {
        let mut attempts = vec![provider_id.to_owned()];
        if self.failover_enabled {
            attempts.extend(self.fallbacks_for(provider_id));
        }

        let mut last_err: Option<Error> = None;
        for attempt_id in attempts {
            let profile = self.profile(&attempt_id)?.clone();
            let adapter = self.adapter_for(&profile)?;

            let attempt = attempt_id.clone();
            let attempt_sink = sink.clone();
            let emit: Arc<dyn Fn(StreamPayload) + Send + Sync> =
                Arc::new(move |payload| attempt_sink(&attempt, payload));
            let ctx = TurnContext {
                emit: emit.clone(),
                tools: Arc::new(EmittingDispatcher {
                    inner: tools.clone(),
                    emit,
                }),
                tokens: self.tokens.clone(),
                images: images.clone(),
            };
            let req = TurnRequest {
                profile,
                provider_id: attempt_id.clone(),
                session_id: session_id.to_owned(),
                messages: messages.clone(),
                input_images: input_images.clone(),
                available_tool_names: available_tool_names.clone(),
                cancel: cancel.clone(),
            };

            match adapter.run_turn(req, &ctx).await {
                Ok(()) => return Ok(attempt_id),
                Err(e) if e.is_transport() => {
                    tracing::warn!(
                        session_id,
                        provider_id = %attempt_id,
                        error = %e,
                        "provider turn failed; considering fallback"
                    );
                    sink(
                        &attempt_id,
                        StreamPayload::ProviderError {
                            code: e.code().to_owned(),
                            message: mask_secrets(&e.to_string()),
                        },
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::ProviderError("no provider attempt ran".into())))
    }
}

/// Brackets every tool invocation with `tool.call.started` /
/// `tool.call.completed` events on the turn's stream.
struct EmittingDispatcher {
    inner: Arc<dyn ToolDispatcher>,
    emit: Arc<dyn Fn(StreamPayload) + Send + Sync>,
}

#[async_trait::async_trait]
impl ToolDispatcher for EmittingDispatcher {
    async fn run_tool(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> crate::traits::ToolOutcome {
        let call_id = uuid::Uuid::new_v4().to_string();
        (self.emit)(StreamPayload::ToolCallStarted {
            call_id: call_id.clone(),
            name: name.to_owned(),
            input: input.clone(),
        });
        let started = std::time::Instant::now();
        let outcome = self.inner.run_tool(name, input).await;
        (self.emit)(StreamPayload::ToolCallCompleted {
            call_id,
            name: name.to_owned(),
            ok: outcome.ok,
            code: outcome.code.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        });
        outcome
    }
}

/// Mask substrings that look like API keys or bearer tokens so raw
/// secrets never leak into logs or status endpoints.
pub fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_owned();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..]);
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenResolver;
    use crate::scripted::FailingAdapter;
    use crate::traits::{NoImages, ToolOutcome};
    use drost_domain::config::ProviderProfile;
    use parking_lot::Mutex as PlMutex;

    struct NoTools;

    #[async_trait::async_trait]
    impl ToolDispatcher for NoTools {
        async fn run_tool(&self, name: &str, _input: serde_json::Value) -> ToolOutcome {
            ToolOutcome {
                ok: false,
                output: serde_json::Value::Null,
                code: Some("tool_not_found".into()),
                message: Some(format!("'{name}' not available")),
            }
        }
    }

    fn profile(id: &str, adapter: &str) -> ProviderProfile {
        ProviderProfile {
            id: id.into(),
            kind: "echo".into(),
            adapter_id: adapter.into(),
            model: "m1".into(),
            base_url: None,
            auth_profile_id: "main".into(),
        }
    }

    fn manager_with(profiles: Vec<ProviderProfile>, routes: Vec<ProviderRoute>) -> ProviderManager {
        let cfg = ProvidersConfig {
            profiles,
            routes,
            default_session_provider: None,
            startup_probe: Default::default(),
        };
        ProviderManager::new(&cfg, true, Arc::new(StaticTokenResolver::default()))
    }

    #[test]
    fn default_provider_is_first_profile() {
        let mgr = manager_with(vec![profile("p1", "echo"), profile("p2", "echo")], vec![]);
        assert_eq!(mgr.default_provider_id().unwrap(), "p1");
    }

    #[test]
    fn queue_switch_validates_profile() {
        let mgr = manager_with(vec![profile("p1", "echo")], vec![]);
        assert!(mgr.queue_provider_switch("s1", "p1").is_ok());
        let err = mgr.queue_provider_switch("s1", "ghost").unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn take_pending_clears() {
        let mgr = manager_with(vec![profile("p1", "echo"), profile("p2", "echo")], vec![]);
        mgr.queue_provider_switch("s1", "p2").unwrap();
        assert_eq!(mgr.take_pending("s1").as_deref(), Some("p2"));
        assert!(mgr.take_pending("s1").is_none());
    }

    #[tokio::test]
    async fn failover_emits_error_then_tries_fallback() {
        let mut mgr = manager_with(
            vec![profile("p1", "down"), profile("p2", "echo")],
            vec![ProviderRoute {
                id: "r1".into(),
                primary: "p1".into(),
                fallbacks: vec!["p2".into()],
            }],
        );
        mgr.register_adapter(Arc::new(FailingAdapter::new("down", "unreachable")));
        mgr.register_adapter(Arc::new(crate::echo::EchoAdapter::new()));

        let seen: Arc<PlMutex<Vec<(String, String)>>> = Arc::new(PlMutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: EmitSink = Arc::new(move |pid, payload| {
            sink_seen
                .lock()
                .push((pid.to_owned(), payload.kind().to_owned()));
        });

        let used = mgr
            .run_turn(
                "s1",
                "p1",
                vec![HistoryMessage::user("hi")],
                vec![],
                vec![],
                CancelToken::new(),
                sink,
                Arc::new(NoTools),
                Arc::new(NoImages),
            )
            .await
            .unwrap();

        assert_eq!(used, "p2");
        let events = seen.lock();
        // p1 emitted provider.error before p2 started streaming.
        assert_eq!(events[0], ("p1".to_owned(), "provider.error".to_owned()));
        assert!(events
            .iter()
            .any(|(pid, kind)| pid == "p2" && kind == "response.completed"));
    }

    #[tokio::test]
    async fn missing_auth_is_terminal() {
        let mut mgr = manager_with(
            vec![profile("p1", "noauth"), profile("p2", "echo")],
            vec![ProviderRoute {
                id: "r1".into(),
                primary: "p1".into(),
                fallbacks: vec!["p2".into()],
            }],
        );
        mgr.register_adapter(Arc::new(FailingAdapter::new("noauth", "missing_auth")));
        mgr.register_adapter(Arc::new(crate::echo::EchoAdapter::new()));

        let sink: EmitSink = Arc::new(|_, _| {});
        let err = mgr
            .run_turn(
                "s1",
                "p1",
                vec![],
                vec![],
                vec![],
                CancelToken::new(),
                sink,
                Arc::new(NoTools),
                Arc::new(NoImages),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "missing_auth");
    }

    #[test]
    fn mask_secrets_hides_long_tokens() {
        let msg = "401 for token sk-ant-REDACTED";
        let masked = mask_secrets(msg);
        assert!(!masked.contains("abcdefghijklmnopqrst"));
        assert!(masked.contains("..."));
    }
}
