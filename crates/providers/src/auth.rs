//! Bearer-token resolution.
//!
//! The gateway never reads credentials from the environment or disk
//! itself; the host injects a [`TokenResolver`] keyed by auth profile
//! id (OAuth-style bearer resolution).

use std::collections::HashMap;

use drost_domain::error::{Error, Result};

#[async_trait::async_trait]
pub trait TokenResolver: Send + Sync {
    /// Resolve the bearer token for an auth profile.
    ///
    /// Returns `Error::MissingAuth` when the profile has no credential.
    async fn resolve_bearer_token(&self, auth_profile_id: &str) -> Result<String>;
}

/// A fixed in-memory token map, used by tests and embedded hosts.
#[derive(Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, String>,
}

impl StaticTokenResolver {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn single(profile_id: impl Into<String>, token: impl Into<String>) -> Self {
        let mut tokens = HashMap::new();
        tokens.insert(profile_id.into(), token.into());
        Self { tokens }
    }
}

#[async_trait::async_trait]
impl TokenResolver for StaticTokenResolver {
    async fn resolve_bearer_token(&self, auth_profile_id: &str) -> Result<String> {
        self.tokens
            .get(auth_profile_id)
            .cloned()
            .ok_or_else(|| Error::MissingAuth(format!("auth profile '{auth_profile_id}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_resolver_hits_and_misses() {
        let resolver = StaticTokenResolver::single("main", "tok-123");
        assert_eq!(
            resolver.resolve_bearer_token("main").await.unwrap(),
            "tok-123"
        );
        let err = resolver.resolve_bearer_token("other").await.unwrap_err();
        assert_eq!(err.code(), "missing_auth");
    }
}
