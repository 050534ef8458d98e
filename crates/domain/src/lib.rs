//! Shared domain types for the drost gateway.
//!
//! Everything that crosses a crate boundary lives here: the error type,
//! normalized stream events and the delta-merge fold, conversation
//! messages, the configuration tree, runtime events, and the cancel token.

pub mod cancel;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod runtime_event;

pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use event::{merge_delta, DeltaFolder, StreamEvent, StreamPayload};
pub use message::{HistoryMessage, ImageRef, InputImage, Role};
pub use runtime_event::{GatewayRuntimeEvent, GatewayState, RestartIntent};
