//! Provider routing for the drost gateway.
//!
//! The manager owns the adapter registry and per-session provider
//! selection (active / pending switch / route failover). Adapters are
//! pluggable implementations of [`ProviderAdapter`] that translate the
//! normalized turn request and event stream to a specific LLM back-end;
//! the manager performs no provider-specific logic.

pub mod auth;
pub mod echo;
pub mod manager;
pub mod scripted;
pub mod traits;

pub use auth::{StaticTokenResolver, TokenResolver};
pub use echo::EchoAdapter;
pub use manager::ProviderManager;
pub use traits::{
    EmitSink, ImageResolver, ProbeCode, ProbeResult, ProviderAdapter, ToolDispatcher,
    ToolOutcome, TurnContext, TurnRequest,
};
