//! Deterministic adapters for tests and wiring checks.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use drost_domain::config::ProviderProfile;
use drost_domain::error::{Error, Result};
use drost_domain::event::StreamPayload;

use crate::auth::TokenResolver;
use crate::traits::{ProbeCode, ProbeResult, ProviderAdapter, TurnContext, TurnRequest};

/// Emits a pre-scripted payload sequence per turn, with an optional
/// pause before each emission (cancellation is honoured between
/// payloads). Scripts are consumed front-to-back across turns; when
/// they run out the adapter completes with empty text.
pub struct ScriptedAdapter {
    id: String,
    delay: Duration,
    scripts: Mutex<VecDeque<Vec<StreamPayload>>>,
}

impl ScriptedAdapter {
    pub fn new(id: impl Into<String>, scripts: Vec<Vec<StreamPayload>>) -> Self {
        Self {
            id: id.into(),
            delay: Duration::ZERO,
            scripts: Mutex::new(scripts.into()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn adapter_id(&self) -> &str {
        &self.id
    }

    async fn probe(&self, profile: &ProviderProfile, _tokens: &dyn TokenResolver) -> ProbeResult {
        ProbeResult::ok(profile.id.clone())
    }

    async fn run_turn(&self, req: TurnRequest, ctx: &TurnContext) -> Result<()> {
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| {
                vec![StreamPayload::ResponseCompleted {
                    text: String::new(),
                    stop_reason: Some("end_turn".into()),
                }]
            });

        for payload in script {
            let mut remaining = self.delay;
            let slice = Duration::from_millis(10);
            while !remaining.is_zero() {
                if req.cancel.is_cancelled() {
                    return Ok(());
                }
                let step = remaining.min(slice);
                tokio::time::sleep(step).await;
                remaining -= step;
            }
            if req.cancel.is_cancelled() {
                return Ok(());
            }
            (ctx.emit)(payload);
        }
        Ok(())
    }
}

/// Always fails `run_turn` with a fixed error code; probes report the
/// same failure. Exercises failover and degraded-start paths.
pub struct FailingAdapter {
    id: String,
    code: String,
}

impl FailingAdapter {
    pub fn new(id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
        }
    }

    fn error(&self) -> Error {
        Error::from_code(&self.code, format!("adapter '{}' is down", self.id))
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for FailingAdapter {
    fn adapter_id(&self) -> &str {
        &self.id
    }

    async fn probe(&self, profile: &ProviderProfile, _tokens: &dyn TokenResolver) -> ProbeResult {
        let code = match self.code.as_str() {
            "missing_auth" => ProbeCode::MissingAuth,
            "incompatible_transport" => ProbeCode::IncompatibleTransport,
            "provider_error" => ProbeCode::ProviderError,
            _ => ProbeCode::Unreachable,
        };
        ProbeResult::fail(profile.id.clone(), code, self.error().to_string())
    }

    async fn run_turn(&self, _req: TurnRequest, _ctx: &TurnContext) -> Result<()> {
        Err(self.error())
    }
}
