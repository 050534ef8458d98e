//! The drost gateway runtime kernel.
//!
//! Ties the session store, provider manager, and tool registry into a
//! supervised gateway: per-session orchestration lanes serialize turns,
//! the turn executor streams normalized events back to channels, and
//! the supervisor owns lifecycle (start/stop/restart/reload), the
//! control surface, and the runtime event hub.

pub mod agent_tool;
pub mod api;
pub mod channels;
pub mod cli;
pub mod commands;
pub mod events;
pub mod evolution;
pub mod hooks;
pub mod lanes;
pub mod reload;
pub mod restart;
pub mod runtime;
pub mod state;
pub mod supervisor;

pub use channels::{ChannelAdapter, ChannelContext, ChannelTurnResult};
pub use lanes::{LaneScheduler, OnEvent, TurnOutcome, TurnRunner};
pub use state::{AppState, GatewayHandle};
pub use supervisor::{Supervisor, SupervisorOptions, RESTART_EXIT_CODE};
