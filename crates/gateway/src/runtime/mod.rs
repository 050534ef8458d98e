//! Session runtime and turn executor.

pub mod session;
pub mod turn;

pub use session::{CreateOptions, EnsureOptions, SessionRuntime};
pub use turn::TurnExecutor;
