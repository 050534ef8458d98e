/// Shared error type used across all drost crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    // ── Session store ─────────────────────────────────────────────────
    #[error("lock held: {0}")]
    LockHeld(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("truncated log: {0}")]
    TruncatedLog(String),

    // ── Tools ─────────────────────────────────────────────────────────
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("execution error: {0}")]
    ExecutionError(String),

    // ── Providers ─────────────────────────────────────────────────────
    #[error("missing auth: {0}")]
    MissingAuth(String),

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("incompatible transport: {0}")]
    IncompatibleTransport(String),

    #[error("provider error: {0}")]
    ProviderError(String),

    // ── Evolution transactions ────────────────────────────────────────
    #[error("busy: {0}")]
    Busy(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("disabled: {0}")]
    Disabled(String),

    #[error("failed: {0}")]
    Failed(String),

    // ── Restart policy ────────────────────────────────────────────────
    #[error("approval required: {0}")]
    ApprovalRequired(String),

    #[error("approval denied: {0}")]
    ApprovalDenied(String),

    #[error("restart budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("git checkpoint failed: {0}")]
    GitCheckpointFailed(String),

    // ── Lifecycle ─────────────────────────────────────────────────────
    #[error("interrupted: {0}")]
    Interrupted(String),

    #[error("gateway stopping: {0}")]
    Stopping(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable wire code for this error, matching the on-wire error kinds.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::LockHeld(_) => "lock_held",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::MalformedSnapshot(_) => "malformed_snapshot",
            Error::TruncatedLog(_) => "truncated_log",
            Error::ValidationError(_) => "validation_error",
            Error::ToolNotFound(_) => "tool_not_found",
            Error::ExecutionError(_) => "execution_error",
            Error::MissingAuth(_) => "missing_auth",
            Error::Unreachable(_) => "unreachable",
            Error::IncompatibleTransport(_) => "incompatible_transport",
            Error::ProviderError(_) => "provider_error",
            Error::Busy(_) => "busy",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Disabled(_) => "disabled",
            Error::Failed(_) => "failed",
            Error::ApprovalRequired(_) => "approval_required",
            Error::ApprovalDenied(_) => "approval_denied",
            Error::BudgetExceeded(_) => "budget_exceeded",
            Error::GitCheckpointFailed(_) => "git_checkpoint_failed",
            Error::Interrupted(_) => "interrupted",
            Error::Stopping(_) => "stopping",
            Error::Config(_) => "config",
            Error::Other(_) => "other",
        }
    }

    /// Reconstruct an error from a wire code + message pair.
    ///
    /// Used by the orchestration lanes, which must resolve several
    /// waiters with the same failure (the error type itself is not
    /// `Clone` because of the IO variant).
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let m = message.into();
        match code {
            "lock_held" => Error::LockHeld(m),
            "not_found" => Error::NotFound(m),
            "conflict" => Error::Conflict(m),
            "malformed_snapshot" => Error::MalformedSnapshot(m),
            "truncated_log" => Error::TruncatedLog(m),
            "validation_error" => Error::ValidationError(m),
            "tool_not_found" => Error::ToolNotFound(m),
            "execution_error" => Error::ExecutionError(m),
            "missing_auth" => Error::MissingAuth(m),
            "unreachable" => Error::Unreachable(m),
            "incompatible_transport" => Error::IncompatibleTransport(m),
            "provider_error" => Error::ProviderError(m),
            "busy" => Error::Busy(m),
            "invalid_request" => Error::InvalidRequest(m),
            "disabled" => Error::Disabled(m),
            "failed" => Error::Failed(m),
            "approval_required" => Error::ApprovalRequired(m),
            "approval_denied" => Error::ApprovalDenied(m),
            "budget_exceeded" => Error::BudgetExceeded(m),
            "git_checkpoint_failed" => Error::GitCheckpointFailed(m),
            "interrupted" => Error::Interrupted(m),
            "stopping" => Error::Stopping(m),
            "config" => Error::Config(m),
            _ => Error::Other(m),
        }
    }

    /// Whether this error is a transport-class provider failure that a
    /// route fallback may retry.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Unreachable(_) | Error::IncompatibleTransport(_) | Error::ProviderError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        let errors = [
            Error::LockHeld("x".into()),
            Error::BudgetExceeded("x".into()),
            Error::Interrupted("x".into()),
            Error::ProviderError("x".into()),
        ];
        for e in errors {
            let rebuilt = Error::from_code(e.code(), "x");
            assert_eq!(rebuilt.code(), e.code());
        }
    }

    #[test]
    fn transport_classification() {
        assert!(Error::Unreachable("net".into()).is_transport());
        assert!(Error::ProviderError("500".into()).is_transport());
        assert!(!Error::MissingAuth("no token".into()).is_transport());
    }
}
