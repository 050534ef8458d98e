//! Control-API authentication.
//!
//! Bearer tokens are hashed once at startup; each request's token is
//! hashed and compared in constant time. Loopback peers may be exempt.
//! The admin token unlocks everything; the read-only token unlocks GET
//! endpoints.

use std::net::SocketAddr;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::control::ControlState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Read,
    Admin,
}

pub fn hash_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

fn bearer(headers: &HeaderMap) -> &str {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("")
}

fn matches(provided_hash: &[u8], expected: &Option<Vec<u8>>) -> bool {
    expected
        .as_ref()
        .map(|h| bool::from(provided_hash.ct_eq(h.as_slice())))
        .unwrap_or(false)
}

/// Authorize a request, or produce the error response to return.
pub fn authorize(
    state: &ControlState,
    headers: &HeaderMap,
    addr: SocketAddr,
    scope: Scope,
) -> Result<(), Response> {
    if state.cfg.allow_loopback && addr.ip().is_loopback() {
        return Ok(());
    }

    let provided = bearer(headers);
    if provided.is_empty() {
        return Err(unauthorized("missing bearer token"));
    }
    let provided_hash = Sha256::digest(provided.as_bytes());

    if matches(&provided_hash, &state.admin_hash) {
        return Ok(());
    }
    if scope == Scope::Read && matches(&provided_hash, &state.read_hash) {
        return Ok(());
    }

    Err(match scope {
        Scope::Admin => forbidden("admin scope required"),
        Scope::Read => unauthorized("invalid token"),
    })
}

/// Rate-limit key for a request: the token when present, else the peer
/// address.
pub fn rate_key(headers: &HeaderMap, addr: SocketAddr) -> String {
    let token = bearer(headers);
    if token.is_empty() {
        addr.ip().to_string()
    } else {
        // Key on the digest, never the raw token.
        hex_prefix(&Sha256::digest(token.as_bytes()))
    }
}

fn hex_prefix(digest: &[u8]) -> String {
    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

fn forbidden(message: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}
