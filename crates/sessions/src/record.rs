//! The durable session record and its on-disk projections.
//!
//! Snapshot keyset is stable for migration compatibility:
//! `sessionId, activeProviderId, pendingProviderId?, history,
//! metadata{createdAt,lastActivityAt,title?,origin?}, revision,
//! updatedAt`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use drost_domain::message::HistoryMessage;

/// Where a session originated (channel identity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OriginIdentity {
    #[serde(default)]
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<OriginIdentity>,
}

impl SessionMetadata {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_activity_at: now,
            title: None,
            origin: None,
        }
    }
}

/// One durable session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub active_provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_provider_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    pub metadata: SessionMetadata,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            active_provider_id: provider_id.into(),
            pending_provider_id: None,
            history: Vec::new(),
            metadata: SessionMetadata::now(),
            revision: 0,
            updated_at: Utc::now(),
        }
    }

    /// Bump the revision and the activity/update timestamps.
    pub fn touch(&mut self) {
        self.revision += 1;
        let now = Utc::now();
        self.metadata.last_activity_at = now;
        self.updated_at = now;
    }

    /// Content of the most recent assistant message, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|m| m.role == drost_domain::Role::Assistant)
            .map(|m| m.content.as_str())
    }
}

/// One line of the append-only session event log.
///
/// Keys include `timestamp, type, payload`; `revision` ties the entry to
/// the snapshot generation it follows, so a reader replays only the log
/// tail newer than the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLogRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
    pub revision: u64,
}

/// Log record type whose payload is a history message to replay.
pub const LOG_MESSAGE_APPENDED: &str = "message.appended";

#[cfg(test)]
mod tests {
    use super::*;
    use drost_domain::message::HistoryMessage;

    #[test]
    fn snapshot_keyset_is_stable() {
        let mut rec = SessionRecord::new("s1", "p1");
        rec.history.push(HistoryMessage::user("hi"));
        let v = serde_json::to_value(&rec).unwrap();
        let keys: Vec<&str> = v.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "sessionId",
                "activeProviderId",
                "history",
                "metadata",
                "revision",
                "updatedAt"
            ]
        );
        let meta_keys: Vec<&str> = v["metadata"]
            .as_object()
            .unwrap()
            .keys()
            .map(|k| k.as_str())
            .collect();
        assert_eq!(meta_keys, vec!["createdAt", "lastActivityAt"]);
    }

    #[test]
    fn pending_provider_appears_when_set() {
        let mut rec = SessionRecord::new("s1", "p1");
        rec.pending_provider_id = Some("p2".into());
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["pendingProviderId"], "p2");
    }

    #[test]
    fn touch_bumps_revision() {
        let mut rec = SessionRecord::new("s1", "p1");
        let before = rec.revision;
        rec.touch();
        assert_eq!(rec.revision, before + 1);
    }
}
