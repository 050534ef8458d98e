//! Normalized stream events and the delta-merge fold.
//!
//! Every provider adapter emits only this event set; the turn executor
//! folds `response.delta` chunks with [`merge_delta`] so providers that
//! re-send cumulative text ("snapshot chunks") never duplicate output
//! downstream. Observable deltas are the net-new suffix after each
//! merge, computed by [`DeltaFolder`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Normalized event envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A normalized stream event: `{type, sessionId, providerId, timestamp,
/// payload}`. The payload shape is fixed per type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub session_id: String,
    pub provider_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: StreamPayload,
}

impl StreamEvent {
    pub fn now(session_id: &str, provider_id: &str, payload: StreamPayload) -> Self {
        Self {
            session_id: session_id.to_owned(),
            provider_id: provider_id.to_owned(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// The normalized payload set. Adapters may emit nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum StreamPayload {
    /// A partial text chunk. May be incremental or cumulative; the fold
    /// in [`merge_delta`] handles both.
    #[serde(rename = "response.delta")]
    ResponseDelta { text: String },

    /// The turn's final assistant text. At most once per turn.
    #[serde(rename = "response.completed")]
    ResponseCompleted {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },

    /// Token counters. May arrive several times, monotonically growing.
    #[serde(rename = "usage.updated")]
    UsageUpdated {
        input_tokens: u64,
        output_tokens: u64,
        total_tokens: u64,
    },

    /// A tool invocation is about to execute.
    #[serde(rename = "tool.call.started")]
    ToolCallStarted {
        call_id: String,
        name: String,
        input: Value,
    },

    /// A tool invocation finished.
    #[serde(rename = "tool.call.completed")]
    ToolCallCompleted {
        call_id: String,
        name: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        duration_ms: u64,
    },

    /// A provider-side failure. Terminates the turn.
    #[serde(rename = "provider.error")]
    ProviderError { code: String, message: String },
}

impl StreamPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamPayload::ResponseDelta { .. } => "response.delta",
            StreamPayload::ResponseCompleted { .. } => "response.completed",
            StreamPayload::UsageUpdated { .. } => "usage.updated",
            StreamPayload::ToolCallStarted { .. } => "tool.call.started",
            StreamPayload::ToolCallCompleted { .. } => "tool.call.completed",
            StreamPayload::ProviderError { .. } => "provider.error",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delta merge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Minimum suffix/prefix overlap considered meaningful when stitching
/// two chunks together. Shorter overlaps are treated as coincidence and
/// the incoming chunk is appended whole.
const MIN_OVERLAP: usize = 4;

/// Fold one incoming delta chunk onto the merged text so far.
///
/// Total over all inputs:
/// 1. empty incoming → existing unchanged;
/// 2. empty existing → incoming;
/// 3. identical → existing;
/// 4. incoming extends existing (snapshot chunk) → incoming;
/// 5. incoming is a prefix or suffix of existing (duplicate/stale) →
///    existing;
/// 6. largest overlap k ≥ 4 between existing's tail and incoming's head
///    → append `incoming[k..]`;
/// 7. otherwise append the full incoming chunk.
pub fn merge_delta(existing: &str, incoming: &str) -> String {
    if incoming.is_empty() {
        return existing.to_owned();
    }
    if existing.is_empty() {
        return incoming.to_owned();
    }
    if incoming == existing {
        return existing.to_owned();
    }
    if incoming.starts_with(existing) {
        return incoming.to_owned();
    }
    if existing.starts_with(incoming) || existing.ends_with(incoming) {
        return existing.to_owned();
    }

    let max_k = existing.len().min(incoming.len());
    let mut k = max_k;
    while k >= MIN_OVERLAP {
        if incoming.is_char_boundary(k)
            && existing.is_char_boundary(existing.len() - k)
            && existing.as_bytes()[existing.len() - k..] == incoming.as_bytes()[..k]
        {
            let mut merged = existing.to_owned();
            merged.push_str(&incoming[k..]);
            return merged;
        }
        k -= 1;
    }

    let mut merged = existing.to_owned();
    merged.push_str(incoming);
    merged
}

/// Stateful fold over a turn's delta chunks.
///
/// `push` merges one incoming chunk and returns the net-new suffix to
/// emit downstream, or `None` when the chunk added nothing. Emitted
/// suffixes are pairwise non-overlapping and concatenate to the final
/// merged text.
#[derive(Debug, Default)]
pub struct DeltaFolder {
    merged: String,
    emitted: usize,
}

impl DeltaFolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one incoming chunk; return the suffix not yet emitted.
    pub fn push(&mut self, incoming: &str) -> Option<String> {
        self.merged = merge_delta(&self.merged, incoming);
        if self.merged.len() > self.emitted {
            let suffix = self.merged[self.emitted..].to_owned();
            self.emitted = self.merged.len();
            Some(suffix)
        } else {
            None
        }
    }

    /// The merged text so far.
    pub fn merged(&self) -> &str {
        &self.merged
    }

    /// Consume the folder, returning the merged text.
    pub fn into_merged(self) -> String {
        self.merged
    }
}
