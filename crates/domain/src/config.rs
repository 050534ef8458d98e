//! Gateway configuration tree.
//!
//! The gateway consumes a fully-built `Config` value; it never reads
//! environment variables itself. Credentials are resolved at runtime
//! through the injected token resolver, keyed by `auth_profile_id`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::runtime_event::RestartIntent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub session_store: SessionStoreConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub control_api: ControlApiConfig,
    #[serde(default)]
    pub restart_policy: RestartPolicyConfig,
    #[serde(default)]
    pub evolution: EvolutionConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
}

impl Config {
    /// Directory for session snapshots/logs/locks.
    pub fn session_dir(&self) -> PathBuf {
        self.session_store
            .dir
            .clone()
            .unwrap_or_else(|| self.workspace.dir.join("sessions"))
    }

    /// Gateway state directory (`.drost` under the workspace).
    pub fn state_dir(&self) -> PathBuf {
        self.workspace.dir.join(".drost")
    }

    /// Validate the config, returning issues to log before start.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.workspace.dir.as_os_str().is_empty() {
            issues.push(ConfigIssue::error("workspace.dir must not be empty"));
        }
        if self.health.enabled && self.health.port == 0 {
            issues.push(ConfigIssue::error("health.port must be non-zero"));
        }
        if self.control_api.enabled && self.control_api.port == 0 {
            issues.push(ConfigIssue::error("control_api.port must be non-zero"));
        }
        if self.control_api.enabled && self.control_api.token.is_none() {
            issues.push(ConfigIssue::warning(
                "control_api.token is unset; only loopback requests will be accepted",
            ));
        }

        let profile_ids: Vec<&str> = self
            .providers
            .profiles
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        for route in &self.providers.routes {
            for pid in std::iter::once(&route.primary).chain(route.fallbacks.iter()) {
                if !profile_ids.contains(&pid.as_str()) {
                    issues.push(ConfigIssue::error(format!(
                        "route '{}' references unknown provider profile '{pid}'",
                        route.id
                    )));
                }
            }
        }
        if let Some(ref dflt) = self.providers.default_session_provider {
            if !profile_ids.contains(&dflt.as_str()) {
                issues.push(ConfigIssue::error(format!(
                    "providers.default_session_provider '{dflt}' is not a configured profile"
                )));
            }
        }
        if self.providers.profiles.is_empty() {
            issues.push(ConfigIssue::warning(
                "no provider profiles configured; turns will fail until one is added",
            ));
        }

        issues
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }
    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "d_ws_dir")]
    pub dir: PathBuf,
    /// Roots (relative to the workspace) where mutating tool operations
    /// are allowed. Defaults to the whole workspace.
    #[serde(default = "d_mutable_roots")]
    pub mutable_roots: Vec<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: d_ws_dir(),
            mutable_roots: d_mutable_roots(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionStoreConfig {
    /// Session directory override. Defaults to `<workspace>/sessions`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub lock: LockSettings,
    #[serde(default)]
    pub history: HistoryLimits,
    #[serde(default)]
    pub retention: RetentionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    #[serde(default = "d_2000")]
    pub timeout_ms: u64,
    /// A lock older than this whose holder pid is gone may be broken.
    #[serde(default = "d_30000")]
    pub stale_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            stale_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HistoryLimits {
    #[serde(default)]
    pub max_messages: Option<usize>,
    #[serde(default)]
    pub max_characters: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSettings {
    #[serde(default)]
    pub max_age_days: Option<u64>,
    #[serde(default)]
    pub max_sessions: Option<usize>,
    #[serde(default)]
    pub max_total_bytes: Option<u64>,
    #[serde(default)]
    pub archive_after_idle_ms: Option<u64>,
    #[serde(default = "d_true")]
    pub archive_first: bool,
    #[serde(default = "d_sweep_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            max_age_days: None,
            max_sessions: None,
            max_total_bytes: None,
            archive_after_idle_ms: None,
            archive_first: true,
            sweep_interval_ms: d_sweep_ms(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub profiles: Vec<ProviderProfile>,
    #[serde(default)]
    pub routes: Vec<ProviderRoute>,
    /// Provider assigned to new sessions. Defaults to the first profile.
    #[serde(default)]
    pub default_session_provider: Option<String>,
    #[serde(default)]
    pub startup_probe: StartupProbeConfig,
}

/// An immutable provider profile; fixed for a supervisor generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderProfile {
    pub id: String,
    pub kind: String,
    pub adapter_id: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub auth_profile_id: String,
}

/// A primary-plus-fallbacks route used when a session does not pin a
/// provider directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRoute {
    pub id: String,
    pub primary: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupProbeConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_5000")]
    pub timeout_ms: u64,
}

impl Default for StartupProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FailoverConfig {
    #[serde(default)]
    pub enabled: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    /// Directory scanned for discovered tool manifests.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub shell: ShellToolConfig,
    #[serde(default)]
    pub web: WebToolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellToolConfig {
    #[serde(default = "d_30000")]
    pub timeout_ms: u64,
    #[serde(default = "d_256k")]
    pub max_buffer_bytes: usize,
    /// Command-prefix allow list. Empty = everything not denied.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Command-prefix deny list. Checked before the allow list.
    #[serde(default)]
    pub deny: Vec<String>,
}

impl Default for ShellToolConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_buffer_bytes: d_256k(),
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebToolConfig {
    #[serde(default = "d_256k")]
    pub fetch_max_bytes: usize,
    /// Search API endpoint. Unset disables `web.search`.
    #[serde(default)]
    pub search_url: Option<String>,
    #[serde(default = "d_5usize")]
    pub search_results: usize,
}

impl Default for WebToolConfig {
    fn default() -> Self {
        Self {
            fetch_max_bytes: d_256k(),
            search_url: None,
            search_results: 5,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestration lanes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneMode {
    Queue,
    Interrupt,
    Collect,
    /// Alias of `interrupt`; kept distinct on the wire.
    Steer,
    /// Alias of `queue`; kept distinct on the wire.
    SteerBacklog,
}

impl LaneMode {
    /// Resolve aliases to their effective scheduling behavior.
    pub fn effective(self) -> LaneMode {
        match self {
            LaneMode::Steer => LaneMode::Interrupt,
            LaneMode::SteerBacklog => LaneMode::Queue,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Shift the queue head; the dropped waiter is rejected.
    Old,
    /// Reject the submitter immediately.
    New,
    /// Reserved; behaves as `old`.
    Summarize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_lane_mode")]
    pub mode: LaneMode,
    #[serde(default = "d_8usize")]
    pub cap: usize,
    #[serde(default = "d_drop_policy")]
    pub drop_policy: DropPolicy,
    #[serde(default = "d_250")]
    pub collect_debounce_ms: u64,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: LaneMode::Queue,
            cap: 8,
            drop_policy: DropPolicy::Old,
            collect_debounce_ms: 250,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Health + control surface
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_health_port")]
    pub port: u16,
    #[serde(default = "d_health_path")]
    pub path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: d_host(),
            port: d_health_port(),
            path: d_health_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlApiConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_control_port")]
    pub port: u16,
    /// Admin bearer token. Required for mutations from non-loopback.
    #[serde(default)]
    pub token: Option<String>,
    /// Read-only bearer token for GET endpoints.
    #[serde(default)]
    pub read_only_token: Option<String>,
    /// Accept unauthenticated requests from 127.0.0.1/::1.
    #[serde(default = "d_true")]
    pub allow_loopback: bool,
    #[serde(default = "d_30u32")]
    pub mutation_rate_per_minute: u32,
    #[serde(default = "d_body_limit")]
    pub body_limit_bytes: usize,
}

impl Default for ControlApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: d_host(),
            port: d_control_port(),
            token: None,
            read_only_token: None,
            allow_loopback: true,
            mutation_rate_per_minute: 30,
            body_limit_bytes: d_body_limit(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Restart policy / evolution / observability / runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RestartPolicyConfig {
    #[serde(default)]
    pub budget: Option<RestartBudget>,
    /// Create a git checkpoint commit before restarting.
    #[serde(default)]
    pub git_checkpoint: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartBudget {
    pub max_restarts: usize,
    pub window_ms: u64,
    /// Intents the budget applies to. Empty = all intents.
    #[serde(default)]
    pub intents: Vec<RestartIntent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EvolutionConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Optional shell commands run at lifecycle edges. Failures degrade the
/// gateway but never block startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HooksConfig {
    #[serde(default)]
    pub on_start: Option<String>,
    #[serde(default)]
    pub on_stop: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Hard cap on one provider turn (adapter I/O).
    #[serde(default = "d_60000")]
    pub provider_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: 60_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Serde default helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_ws_dir() -> PathBuf {
    PathBuf::from("./workspace")
}
fn d_mutable_roots() -> Vec<String> {
    vec![".".into()]
}
fn d_true() -> bool {
    true
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_health_port() -> u16 {
    3240
}
fn d_control_port() -> u16 {
    3241
}
fn d_health_path() -> String {
    "/healthz".into()
}
fn d_lane_mode() -> LaneMode {
    LaneMode::Queue
}
fn d_drop_policy() -> DropPolicy {
    DropPolicy::Old
}
fn d_2000() -> u64 {
    2_000
}
fn d_5000() -> u64 {
    5_000
}
fn d_30000() -> u64 {
    30_000
}
fn d_60000() -> u64 {
    60_000
}
fn d_250() -> u64 {
    250
}
fn d_sweep_ms() -> u64 {
    300_000
}
fn d_256k() -> usize {
    262_144
}
fn d_body_limit() -> usize {
    524_288
}
fn d_5usize() -> usize {
    5
}
fn d_8usize() -> usize {
    8
}
fn d_30u32() -> u32 {
    30
}
