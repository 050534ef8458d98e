//! Agent lifecycle hooks.
//!
//! The host may plug behavior around the gateway's lifecycle and each
//! turn. Hook failures degrade the gateway (or the turn's bookkeeping)
//! but never fail the turn itself.

use drost_domain::error::Result;

#[async_trait::async_trait]
pub trait AgentHooks: Send + Sync {
    async fn on_start(&self) -> Result<()> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<()> {
        Ok(())
    }

    /// May rewrite the user input before it enters history.
    async fn before_turn(&self, _session_id: &str, input: String) -> Result<String> {
        Ok(input)
    }

    async fn after_turn(&self, _session_id: &str, _response: &str) -> Result<()> {
        Ok(())
    }
}

/// Default hooks: everything is a no-op.
pub struct NoopHooks;

#[async_trait::async_trait]
impl AgentHooks for NoopHooks {}
