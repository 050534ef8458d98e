//! Channel-identity → session-id resolution.
//!
//! A deterministic slug maps `(channel, workspaceId, chatId, userId?,
//! threadId?)` to a canonical string; the first turn from an identity
//! stores the assignment, and commands like `/new` re-point it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use drost_domain::error::Result;

use crate::record::OriginIdentity;

/// Canonical slug for an identity, e.g.
/// `telegram:ws1:chat42:user7:thread3` with absent parts skipped.
pub fn identity_slug(identity: &OriginIdentity) -> String {
    let mut parts = vec![sanitize(&identity.channel)];
    for opt in [
        &identity.workspace_id,
        &identity.chat_id,
        &identity.user_id,
        &identity.thread_id,
    ] {
        if let Some(v) = opt {
            parts.push(sanitize(v));
        }
    }
    parts.join(":")
}

fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".into()
    } else {
        cleaned
    }
}

/// Persisted identity → session-id assignments.
pub struct IdentityMap {
    path: PathBuf,
    map: RwLock<HashMap<String, String>>,
}

impl IdentityMap {
    /// Load (or start empty) from `state_dir/identity-map.json`.
    pub fn load(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join("identity-map.json");
        let map = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            map: RwLock::new(map),
        })
    }

    /// Resolve an identity to its session id, assigning the slug itself
    /// as the session id on first use.
    pub fn resolve(&self, identity: &OriginIdentity) -> Result<String> {
        let slug = identity_slug(identity);
        if let Some(existing) = self.map.read().get(&slug) {
            return Ok(existing.clone());
        }
        self.assign(&slug, &slug)?;
        Ok(slug)
    }

    /// Point a slug at a (possibly new) session id.
    pub fn assign(&self, slug: &str, session_id: &str) -> Result<()> {
        {
            let mut map = self.map.write();
            map.insert(slug.to_owned(), session_id.to_owned());
        }
        self.flush()
    }

    pub fn get(&self, slug: &str) -> Option<String> {
        self.map.read().get(slug).cloned()
    }

    fn flush(&self) -> Result<()> {
        let map = self.map.read();
        let json = serde_json::to_string_pretty(&*map)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn identity(channel: &str, chat: Option<&str>, user: Option<&str>) -> OriginIdentity {
        OriginIdentity {
            channel: channel.into(),
            workspace_id: None,
            chat_id: chat.map(Into::into),
            user_id: user.map(Into::into),
            thread_id: None,
        }
    }

    #[test]
    fn slug_is_deterministic_and_ordered() {
        let id = identity("telegram", Some("42"), Some("alice"));
        assert_eq!(identity_slug(&id), "telegram:42:alice");
        assert_eq!(identity_slug(&id), identity_slug(&id));
    }

    #[test]
    fn slug_sanitizes_unsafe_chars() {
        let id = identity("Tele gram!", Some("A/B"), None);
        assert_eq!(identity_slug(&id), "tele-gram-:a-b");
    }

    #[test]
    fn resolve_assigns_once_and_persists() {
        let dir = TempDir::new().unwrap();
        let map = IdentityMap::load(dir.path()).unwrap();
        let id = identity("telegram", Some("42"), None);

        let first = map.resolve(&id).unwrap();
        let second = map.resolve(&id).unwrap();
        assert_eq!(first, second);

        // Reload from disk sees the same assignment.
        let reloaded = IdentityMap::load(dir.path()).unwrap();
        assert_eq!(reloaded.resolve(&id).unwrap(), first);
    }

    #[test]
    fn reassign_points_to_new_session() {
        let dir = TempDir::new().unwrap();
        let map = IdentityMap::load(dir.path()).unwrap();
        let id = identity("telegram", Some("42"), None);

        let slug = map.resolve(&id).unwrap();
        map.assign(&slug, "telegram-20260801-101500-001").unwrap();
        assert_eq!(
            map.resolve(&id).unwrap(),
            "telegram-20260801-101500-001"
        );
    }
}
