//! The `agent` built-in tool: lets the model read gateway status and
//! request a `self_mod` restart.

use std::sync::Weak;

use serde::Deserialize;
use serde_json::{json, Value};

use drost_domain::runtime_event::RestartIntent;
use drost_tools::{Tool, ToolContext, ToolError, ToolResult};

use crate::restart::RestartRequest;
use crate::supervisor::Supervisor;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum AgentRequest {
    Status {},
    Restart {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default, rename = "dryRun")]
        dry_run: bool,
    },
}

pub struct AgentTool {
    supervisor: Weak<Supervisor>,
}

impl AgentTool {
    pub fn new(supervisor: Weak<Supervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait::async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        "agent"
    }

    fn description(&self) -> &str {
        "Inspect gateway status or request a restart"
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "required": ["op"],
            "properties": {
                "op": { "type": "string", "enum": ["status", "restart"] },
                "reason": { "type": "string" },
                "dryRun": { "type": "boolean" }
            }
        }))
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolResult {
        let req: AgentRequest = serde_json::from_value(input)
            .map_err(|e| ToolError::execution(format!("bad agent input: {e}")))?;
        let supervisor = self
            .supervisor
            .upgrade()
            .ok_or_else(|| ToolError::execution("gateway is shutting down"))?;

        match req {
            AgentRequest::Status {} => Ok(supervisor.status_json()),
            AgentRequest::Restart { reason, dry_run } => {
                let decision = supervisor
                    .request_restart(RestartRequest {
                        intent: RestartIntent::SelfMod,
                        reason,
                        dry_run,
                    })
                    .await;
                serde_json::to_value(&decision)
                    .map_err(|e| ToolError::execution(e.to_string()))
            }
        }
    }
}
