//! Conversation messages (provider-agnostic).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry in a session's ordered history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
    /// Persisted image references; the blobs live in the media store.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageRef>,
}

impl HistoryMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            images: Vec::new(),
        }
    }
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: Vec::new(),
        }
    }

    /// Character length used by the history budget.
    pub fn chars(&self) -> usize {
        self.content.chars().count()
    }
}

/// A content-addressed reference to a persisted image blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub sha256: String,
    pub ext: String,
    pub mime_type: String,
}

/// An inline image handed to a provider adapter. Adapters that do not
/// support images ignore these without failing the turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputImage {
    pub mime_type: String,
    pub data_base64: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_message_wire_shape() {
        let m = HistoryMessage::user("ping");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["role"], "user");
        assert_eq!(v["content"], "ping");
        // No images key when empty.
        assert!(v.get("images").is_none());
    }

    #[test]
    fn image_ref_round_trip() {
        let r = ImageRef {
            sha256: "ab".repeat(32),
            ext: "png".into(),
            mime_type: "image/png".into(),
        };
        let json = serde_json::to_string(&r).unwrap();
        let back: ImageRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
