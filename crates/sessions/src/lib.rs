//! Durable per-session state for the drost gateway.
//!
//! A session lives on disk as a JSON snapshot plus an append-only JSONL
//! event log, guarded by a pid-bearing advisory file lock. History is
//! trimmed to a configurable budget after every mutation; a background
//! sweep enforces retention.

pub mod history;
pub mod identity;
pub mod lock;
pub mod media;
pub mod record;
pub mod retention;
pub mod store;

pub use history::{trim_history, trim_history_collect, TrimReport};
pub use identity::{identity_slug, IdentityMap};
pub use lock::SessionLock;
pub use media::MediaStore;
pub use record::{OriginIdentity, SessionMetadata, SessionRecord};
pub use retention::{RetentionSweeper, SweepReport};
pub use store::{LoadDiagnostic, SessionIndexEntry, SessionStore};
