//! The echo adapter.
//!
//! A fully in-process adapter (profile kind `echo`) used by dev
//! configs and the end-to-end tests: it replies `echo: <input>` as two
//! deltas, reports usage, and completes. Inputs of the form
//! `tool:<name> <json>` exercise the tool-dispatch path.

use std::time::Duration;

use serde_json::Value;

use drost_domain::config::ProviderProfile;
use drost_domain::error::Result;
use drost_domain::event::StreamPayload;
use drost_domain::message::Role;

use crate::auth::TokenResolver;
use crate::traits::{ProbeResult, ProviderAdapter, TurnContext, TurnRequest};

pub struct EchoAdapter {
    /// Delay inserted before each emission; profiles with model
    /// `echo-slow` get 100ms regardless.
    delay: Duration,
}

impl EchoAdapter {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }

    fn delay_for(&self, profile: &ProviderProfile) -> Duration {
        if profile.model == "echo-slow" {
            Duration::from_millis(100)
        } else {
            self.delay
        }
    }

    /// Sleep in short slices so cancellation is observed promptly.
    /// Returns false when the turn was cancelled mid-sleep.
    async fn pause(delay: Duration, req: &TurnRequest) -> bool {
        let mut remaining = delay;
        let slice = Duration::from_millis(10);
        while !remaining.is_zero() {
            if req.cancel.is_cancelled() {
                return false;
            }
            let step = remaining.min(slice);
            tokio::time::sleep(step).await;
            remaining -= step;
        }
        !req.cancel.is_cancelled()
    }
}

impl Default for EchoAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for EchoAdapter {
    fn adapter_id(&self) -> &str {
        "echo"
    }

    async fn probe(&self, profile: &ProviderProfile, _tokens: &dyn TokenResolver) -> ProbeResult {
        ProbeResult::ok(profile.id.clone())
    }

    async fn run_turn(&self, req: TurnRequest, ctx: &TurnContext) -> Result<()> {
        let delay = self.delay_for(&req.profile);
        let input = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        // Tool-dispatch path: "tool:<name> <json-input>".
        if let Some(rest) = input.strip_prefix("tool:") {
            let (name, raw_input) = rest.split_once(' ').unwrap_or((rest, "{}"));
            let tool_input: Value = serde_json::from_str(raw_input).unwrap_or(Value::Null);
            let outcome = ctx.tools.run_tool(name.trim(), tool_input).await;
            let text = if outcome.ok {
                serde_json::to_string(&outcome.output)?
            } else {
                format!(
                    "tool {} failed: {}",
                    name.trim(),
                    outcome.message.as_deref().unwrap_or("unknown error")
                )
            };
            (ctx.emit)(StreamPayload::ResponseDelta { text: text.clone() });
            (ctx.emit)(StreamPayload::ResponseCompleted {
                text,
                stop_reason: Some("end_turn".into()),
            });
            return Ok(());
        }

        if !Self::pause(delay, &req).await {
            return Ok(());
        }
        (ctx.emit)(StreamPayload::ResponseDelta {
            text: "echo:".into(),
        });

        if !Self::pause(delay, &req).await {
            return Ok(());
        }
        (ctx.emit)(StreamPayload::ResponseDelta {
            text: format!(" {input}"),
        });

        if !Self::pause(delay, &req).await {
            return Ok(());
        }
        let full = format!("echo: {input}");
        (ctx.emit)(StreamPayload::UsageUpdated {
            input_tokens: input.split_whitespace().count() as u64,
            output_tokens: full.split_whitespace().count() as u64,
            total_tokens: (input.split_whitespace().count() + full.split_whitespace().count())
                as u64,
        });
        (ctx.emit)(StreamPayload::ResponseCompleted {
            text: full,
            stop_reason: Some("end_turn".into()),
        });
        Ok(())
    }
}
