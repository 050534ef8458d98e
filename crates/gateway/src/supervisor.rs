//! The supervisor: lifecycle state machine, restart policy, hot reload.
//!
//! States: `stopped → running | degraded`; `running ↔ degraded`;
//! any → `stopped`. Recoverable startup failures append degraded
//! reasons and the gateway still serves traffic. Restart exits the
//! process with the sentinel code 42; an external supervisor re-launches
//! the gateway.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::watch;

use drost_domain::config::Config;
use drost_domain::error::{Error, Result};
use drost_domain::runtime_event::{GatewayRuntimeEvent, GatewayState, RestartIntent};
use drost_providers::traits::ProviderAdapter;
use drost_providers::{EchoAdapter, ProviderManager, StaticTokenResolver, TokenResolver};
use drost_sessions::retention::RetentionSweeper;
use drost_sessions::{IdentityMap, MediaStore, SessionStore};
use drost_tools::builtin::{CodeTool, FileTool, ShellTool, WebTool};
use drost_tools::ToolRegistry;

use crate::agent_tool::AgentTool;
use crate::api::{self, ServerHandle, ServerKind};
use crate::channels::{ChannelAdapter, ChannelContext};
use crate::events::{EventHub, JsonlSink, ObservabilitySinks};
use crate::evolution::EvolutionManager;
use crate::hooks::{AgentHooks, NoopHooks};
use crate::lanes::LaneScheduler;
use crate::reload::{apply_patch, ReloadReport};
use crate::restart::{
    evaluate_policy, ApproveAll, RestartApprover, RestartDecision, RestartHistory,
    RestartRequest,
};
use crate::runtime::session::SessionRuntime;
use crate::runtime::turn::TurnExecutor;
use crate::state::{AppState, DegradedReasons, GatewayHandle};

/// Exit code contract with the external process supervisor.
pub const RESTART_EXIT_CODE: i32 = 42;

pub struct SupervisorOptions {
    pub hooks: Arc<dyn AgentHooks>,
    pub approver: Arc<dyn RestartApprover>,
    pub tokens: Arc<dyn TokenResolver>,
    pub adapters: Vec<Arc<dyn ProviderAdapter>>,
    pub channels: Vec<Arc<dyn ChannelAdapter>>,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            hooks: Arc::new(NoopHooks),
            approver: Arc::new(ApproveAll),
            tokens: Arc::new(StaticTokenResolver::default()),
            adapters: vec![Arc::new(EchoAdapter::new())],
            channels: Vec::new(),
        }
    }
}

struct Lifecycle {
    state: GatewayState,
    started_at: Option<DateTime<Utc>>,
}

pub struct Supervisor {
    config: Arc<RwLock<Arc<Config>>>,
    hub: Arc<EventHub>,
    degraded: Arc<DegradedReasons>,
    hooks: Arc<dyn AgentHooks>,
    approver: Arc<dyn RestartApprover>,
    tokens: Arc<dyn TokenResolver>,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    channels: Vec<Arc<dyn ChannelAdapter>>,

    lifecycle: Mutex<Lifecycle>,
    core: Mutex<Option<AppState>>,
    evolution: Mutex<Option<Arc<EvolutionManager>>>,
    restart_history: Mutex<Option<RestartHistory>>,
    servers: tokio::sync::Mutex<Vec<ServerHandle>>,
    retention: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Serializes restart evaluation against concurrent requests.
    restart_gate: tokio::sync::Mutex<()>,
    exit_tx: watch::Sender<Option<i32>>,
}

impl Supervisor {
    pub fn new(config: Config, opts: SupervisorOptions) -> Arc<Self> {
        let (exit_tx, _) = watch::channel(None);
        Arc::new(Self {
            config: Arc::new(RwLock::new(Arc::new(config))),
            hub: Arc::new(EventHub::new()),
            degraded: Arc::new(DegradedReasons::default()),
            hooks: opts.hooks,
            approver: opts.approver,
            tokens: opts.tokens,
            adapters: opts.adapters,
            channels: opts.channels,
            lifecycle: Mutex::new(Lifecycle {
                state: GatewayState::Stopped,
                started_at: None,
            }),
            core: Mutex::new(None),
            evolution: Mutex::new(None),
            restart_history: Mutex::new(None),
            servers: tokio::sync::Mutex::new(Vec::new()),
            retention: Mutex::new(None),
            restart_gate: tokio::sync::Mutex::new(()),
            exit_tx,
        })
    }

    // ── Introspection ─────────────────────────────────────────────────

    pub fn state(&self) -> GatewayState {
        self.lifecycle.lock().state
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.lock().started_at
    }

    pub fn degraded_reasons(&self) -> Vec<String> {
        self.degraded.list()
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.read().clone()
    }

    pub fn hub(&self) -> Arc<EventHub> {
        self.hub.clone()
    }

    pub fn app(&self) -> Option<AppState> {
        self.core.lock().clone()
    }

    pub fn evolution(&self) -> Option<Arc<EvolutionManager>> {
        self.evolution.lock().clone()
    }

    pub fn handle(self: &Arc<Self>) -> Option<GatewayHandle> {
        self.app().map(|app| GatewayHandle {
            app,
            supervisor: Arc::downgrade(self),
        })
    }

    /// Exit-code channel: `Some(code)` once the process should exit.
    pub fn subscribe_exit(&self) -> watch::Receiver<Option<i32>> {
        self.exit_tx.subscribe()
    }

    pub fn health_url(&self) -> Option<String> {
        let cfg = self.config();
        cfg.health.enabled.then(|| {
            format!(
                "http://{}:{}{}",
                cfg.health.host, cfg.health.port, cfg.health.path
            )
        })
    }

    pub fn status_json(&self) -> Value {
        let lifecycle = self.lifecycle.lock();
        let uptime_sec = lifecycle
            .started_at
            .map(|t| (Utc::now() - t).num_seconds().max(0))
            .unwrap_or(0);
        serde_json::json!({
            "ok": lifecycle.state == GatewayState::Running,
            "state": lifecycle.state,
            "startedAt": lifecycle.started_at,
            "uptimeSec": uptime_sec,
            "degradedReasons": self.degraded.list(),
            "healthUrl": self.health_url(),
        })
    }

    // ── Start ─────────────────────────────────────────────────────────

    /// Bring the gateway up. Recoverable failures degrade; only an
    /// unusable configuration aborts.
    pub async fn start(self: &Arc<Self>) -> Result<GatewayState> {
        if self.state() != GatewayState::Stopped {
            return Ok(self.state());
        }
        self.degraded.clear();
        let cfg = self.config();

        // Workspace directories.
        std::fs::create_dir_all(&cfg.workspace.dir)?;
        std::fs::create_dir_all(cfg.state_dir())?;

        // Restart history.
        *self.restart_history.lock() = Some(RestartHistory::load(&cfg.state_dir())?);

        // Observability sinks; the runtime-event sink is synchronous.
        let sinks = Arc::new(ObservabilitySinks::new(
            &cfg.state_dir(),
            cfg.observability.enabled,
        )?);
        if cfg.observability.enabled {
            self.hub.set_sink(JsonlSink::new(
                cfg.state_dir()
                    .join("observability")
                    .join("runtime-events.jsonl"),
            ));
        }

        // Session store + identity + media.
        let store = Arc::new(SessionStore::new(
            cfg.session_dir(),
            cfg.session_store.lock.clone(),
            cfg.session_store.history.clone(),
        )?);
        let identity = Arc::new(IdentityMap::load(&cfg.state_dir())?);
        let media = Arc::new(MediaStore::new(&cfg.state_dir())?);

        // Provider manager.
        let mut manager =
            ProviderManager::new(&cfg.providers, cfg.failover.enabled, self.tokens.clone());
        for adapter in &self.adapters {
            manager.register_adapter(adapter.clone());
        }
        let providers = Arc::new(manager);

        // Startup probes: degraded, never fatal.
        if cfg.providers.startup_probe.enabled {
            for probe in providers
                .probe_all(cfg.providers.startup_probe.timeout_ms)
                .await
            {
                if !probe.ok {
                    self.degraded.push(format!(
                        "provider '{}' probe failed ({:?}): {}",
                        probe.provider_id, probe.code, probe.message
                    ));
                }
            }
        }

        // Tool registry: built-ins plus discovered manifests.
        let mut registry = ToolRegistry::new();
        registry.register_builtin(Arc::new(FileTool));
        registry.register_builtin(Arc::new(ShellTool::new(cfg.tools.shell.clone())));
        registry.register_builtin(Arc::new(WebTool::new(cfg.tools.web.clone())));
        registry.register_builtin(Arc::new(CodeTool::new(cfg.tools.shell.clone())));
        registry.register_builtin(Arc::new(AgentTool::new(Arc::downgrade(self))));
        if let Some(dir) = &cfg.tools.directory {
            registry.load_directory(dir, &cfg.tools.shell);
            for diag in registry.diagnostics() {
                tracing::warn!(code = diag.code, message = %diag.message, "tool skipped");
            }
        }
        let tools = Arc::new(registry);

        // Runtime: sessions → executor → lanes.
        let sessions = Arc::new(SessionRuntime::new(store.clone(), providers.clone()));
        let mutable_roots = drost_tools::sandbox::canonical_mutable_roots(
            &cfg.workspace.dir,
            &cfg.workspace.mutable_roots,
        );
        let executor = Arc::new(TurnExecutor::new(
            store.clone(),
            sessions.clone(),
            providers.clone(),
            tools.clone(),
            self.hub.clone(),
            sinks.clone(),
            self.degraded.clone(),
            self.hooks.clone(),
            media.clone(),
            cfg.workspace.dir.clone(),
            mutable_roots,
            Duration::from_millis(cfg.runtime.provider_timeout_ms),
        ));
        let lanes = LaneScheduler::new(
            executor.clone(),
            self.hub.clone(),
            &cfg.orchestration,
            cfg.state_dir(),
        )?;

        let app = AppState {
            config: self.config.clone(),
            store: store.clone(),
            sessions: sessions.clone(),
            identity,
            providers,
            tools,
            lanes,
            executor,
            hub: self.hub.clone(),
            sinks,
            media,
            degraded: self.degraded.clone(),
        };
        *self.core.lock() = Some(app.clone());
        *self.evolution.lock() = Some(Arc::new(EvolutionManager::new(
            cfg.evolution.enabled,
            self.hub.clone(),
        )));

        // Servers.
        if cfg.health.enabled {
            match api::health::serve(&cfg.health, Arc::downgrade(self)).await {
                Ok(handle) => self.servers.lock().await.push(handle),
                Err(e) => self.degraded.push(format!("health server failed: {e}")),
            }
        }
        if cfg.control_api.enabled {
            let handle = GatewayHandle {
                app: app.clone(),
                supervisor: Arc::downgrade(self),
            };
            match api::control::serve(&cfg.control_api, handle).await {
                Ok(server) => self.servers.lock().await.push(server),
                Err(e) => self.degraded.push(format!("control server failed: {e}")),
            }
        }

        // Agent + channel + config hooks.
        if let Err(e) = self.hooks.on_start().await {
            self.degraded.push(format!("agent.onStart failed: {e}"));
        }
        for channel in &self.channels {
            let ctx = ChannelContext::new(GatewayHandle {
                app: app.clone(),
                supervisor: Arc::downgrade(self),
            });
            match channel.connect(ctx).await {
                Ok(()) => self.hub.publish(GatewayRuntimeEvent::ChannelConnected {
                    channel: channel.name().to_owned(),
                }),
                Err(e) => self
                    .degraded
                    .push(format!("channel '{}' failed to connect: {e}", channel.name())),
            }
        }
        if let Some(command) = cfg.hooks.on_start.clone() {
            if let Err(e) = run_shell_hook(&command, &cfg.workspace.dir).await {
                self.degraded.push(format!("hooks.on_start failed: {e}"));
            }
        }

        // Retention sweep.
        let sweeper = Arc::new(RetentionSweeper::new(
            store,
            cfg.session_store.retention.clone(),
        ));
        *self.retention.lock() = Some(sweeper.spawn(sessions.protected_fn()));

        let state = if self.degraded.is_empty() {
            GatewayState::Running
        } else {
            GatewayState::Degraded
        };
        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.state = state;
            lifecycle.started_at = Some(Utc::now());
        }
        self.hub.publish(GatewayRuntimeEvent::GatewayStarted {
            state,
            degraded_reasons: self.degraded.list(),
        });
        tracing::info!(?state, "gateway started");
        Ok(state)
    }

    // ── Stop ──────────────────────────────────────────────────────────

    /// Tear everything down. Idempotent.
    pub async fn stop(&self) {
        if self.state() == GatewayState::Stopped {
            return;
        }

        if let Some(app) = self.app() {
            app.lanes.cancel_all("gateway stopping");
        }

        for channel in &self.channels {
            if let Err(e) = channel.disconnect().await {
                tracing::warn!(channel = channel.name(), error = %e, "disconnect failed");
            }
            self.hub.publish(GatewayRuntimeEvent::ChannelDisconnected {
                channel: channel.name().to_owned(),
            });
        }

        if let Err(e) = self.hooks.on_stop().await {
            tracing::warn!(error = %e, "agent.onStop failed");
        }
        let cfg = self.config();
        if let Some(command) = cfg.hooks.on_stop.clone() {
            if let Err(e) = run_shell_hook(&command, &cfg.workspace.dir).await {
                tracing::warn!(error = %e, "hooks.on_stop failed");
            }
        }

        for server in self.servers.lock().await.drain(..) {
            server.shutdown().await;
        }
        if let Some(task) = self.retention.lock().take() {
            task.abort();
        }

        *self.core.lock() = None;
        *self.evolution.lock() = None;
        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.state = GatewayState::Stopped;
        }
        self.hub.publish(GatewayRuntimeEvent::GatewayStopped);
        tracing::info!("gateway stopped");
    }

    // ── Restart ───────────────────────────────────────────────────────

    /// Evaluate the restart policy; on success persist the history
    /// record, stop, and signal the process to exit with code 42.
    pub async fn request_restart(self: &Arc<Self>, request: RestartRequest) -> RestartDecision {
        self.hub.publish(GatewayRuntimeEvent::RestartRequested {
            intent: request.intent,
            reason: request.reason.clone(),
        });

        let _gate = self.restart_gate.lock().await;
        let cfg = self.config();

        let decision = {
            let history = self.restart_history.lock();
            let records = history.as_ref().map(|h| h.records().to_vec()).unwrap_or_default();
            evaluate_policy(
                &cfg.restart_policy,
                self.approver.as_ref(),
                &records,
                &request,
                Utc::now(),
            )
        };
        if !decision.ok {
            self.hub.publish(GatewayRuntimeEvent::RestartBlocked {
                intent: request.intent,
                code: decision.code.clone().unwrap_or_default(),
            });
            return decision;
        }

        if request.dry_run {
            return decision;
        }

        if cfg.restart_policy.git_checkpoint {
            if let Err(e) = git_checkpoint(&cfg.workspace.dir, request.intent).await {
                let blocked = RestartDecision::blocked(
                    "git_checkpoint_failed",
                    e.to_string(),
                    request.dry_run,
                );
                self.hub.publish(GatewayRuntimeEvent::RestartBlocked {
                    intent: request.intent,
                    code: "git_checkpoint_failed".into(),
                });
                return blocked;
            }
        }

        if let Some(history) = self.restart_history.lock().as_mut() {
            if let Err(e) = history.record(request.intent) {
                tracing::warn!(error = %e, "failed to persist restart history");
            }
        }

        self.hub.publish(GatewayRuntimeEvent::RestartExecuting {
            intent: request.intent,
        });
        self.stop().await;
        let _ = self.exit_tx.send(Some(RESTART_EXIT_CODE));
        decision
    }

    // ── Hot reload ────────────────────────────────────────────────────

    /// Apply a config patch, classifying each path as hot or
    /// restart-required. Hot server sections rebind their listeners.
    pub async fn reload_config(self: &Arc<Self>, patch: &Value) -> Result<ReloadReport> {
        let current = self.config();
        let (updated, report) = apply_patch(&current, patch)?;

        if !report.applied.is_empty() {
            *self.config.write() = Arc::new(updated);

            if report.applied.iter().any(|p| p == "health") {
                self.rebind(ServerKind::Health).await;
            }
            if report.applied.iter().any(|p| p == "control_api") {
                self.rebind(ServerKind::Control).await;
            }
        }

        self.hub.publish(GatewayRuntimeEvent::ConfigReloaded {
            applied: report.applied.clone(),
            rejected: report.rejected.iter().map(|r| r.path.clone()).collect(),
            restart_required: report.restart_required,
        });
        Ok(report)
    }

    fn rebind(self: &Arc<Self>, kind: ServerKind) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let mut servers = self.servers.lock().await;
            if let Some(pos) = servers.iter().position(|s| s.kind == kind) {
                servers.remove(pos).shutdown().await;
            }
            let cfg = self.config();
            let result = match kind {
                ServerKind::Health if cfg.health.enabled => {
                    api::health::serve(&cfg.health, Arc::downgrade(self)).await.map(Some)
                }
                ServerKind::Control if cfg.control_api.enabled => match self.handle() {
                    Some(handle) => api::control::serve(&cfg.control_api, handle).await.map(Some),
                    None => Ok(None),
                },
                _ => Ok(None),
            };
            match result {
                Ok(Some(server)) => servers.push(server),
                Ok(None) => {}
                Err(e) => self.degraded.push(format!("{kind:?} server rebind failed: {e}")),
            }
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_shell_hook(command: &str, cwd: &Path) -> Result<()> {
    let status = tokio::time::timeout(
        Duration::from_secs(10),
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .status(),
    )
    .await
    .map_err(|_| Error::Failed("lifecycle hook timed out".into()))?
    .map_err(Error::Io)?;

    if status.success() {
        Ok(())
    } else {
        Err(Error::Failed(format!(
            "lifecycle hook exited with {:?}",
            status.code()
        )))
    }
}

async fn git_checkpoint(workspace: &Path, intent: RestartIntent) -> Result<()> {
    let command = format!(
        "git add -A && git commit --allow-empty -q -m 'checkpoint before {intent} restart'"
    );
    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .current_dir(workspace)
        .status()
        .await
        .map_err(Error::Io)?;
    if status.success() {
        Ok(())
    } else {
        Err(Error::GitCheckpointFailed(format!(
            "git checkpoint exited with {:?}",
            status.code()
        )))
    }
}
