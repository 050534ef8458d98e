//! Typed runtime events emitted by the supervisor and its components.
//!
//! These flow through the gateway's event hub: an in-memory ring for
//! control-API subscribers, plus the append-only observability sink.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayState {
    Stopped,
    Running,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartIntent {
    Manual,
    SelfMod,
    ConfigChange,
    Signal,
}

impl std::fmt::Display for RestartIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RestartIntent::Manual => "manual",
            RestartIntent::SelfMod => "self_mod",
            RestartIntent::ConfigChange => "config_change",
            RestartIntent::Signal => "signal",
        };
        f.write_str(s)
    }
}

/// Structured runtime events for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayRuntimeEvent {
    GatewayStarted {
        state: GatewayState,
        degraded_reasons: Vec<String>,
    },
    GatewayStopped,
    GatewayDegraded {
        reason: String,
    },
    RestartRequested {
        intent: RestartIntent,
        reason: Option<String>,
    },
    RestartBlocked {
        intent: RestartIntent,
        code: String,
    },
    RestartExecuting {
        intent: RestartIntent,
    },
    ConfigReloaded {
        applied: Vec<String>,
        rejected: Vec<String>,
        restart_required: bool,
    },
    ChannelConnected {
        channel: String,
    },
    ChannelDisconnected {
        channel: String,
    },
    LaneAdmitted {
        session_id: String,
        queued: usize,
    },
    LaneStarted {
        session_id: String,
    },
    LaneCompleted {
        session_id: String,
        ok: bool,
    },
    LaneDropped {
        session_id: String,
        reason: String,
    },
    SessionTurn {
        session_id: String,
        provider_id: String,
        duration_ms: u64,
        input_chars: usize,
        output_chars: usize,
    },
    EvolutionBegan {
        tx_id: String,
        description: String,
    },
    EvolutionCommitted {
        tx_id: String,
    },
    EvolutionAborted {
        tx_id: String,
        reason: String,
    },
}

impl GatewayRuntimeEvent {
    /// Log the JSON form through `tracing` in addition to hub fan-out.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(runtime_event = %json, "drost_event");
    }
}
