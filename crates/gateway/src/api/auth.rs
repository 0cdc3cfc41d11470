//! Bearer-token authentication.
//!
//! Both tokens are read from the environment **once at startup** and only
//! their SHA-256 digests are kept in `AppState`.
//! - If a token is configured, requests must carry `Authorization: Bearer <token>`.
//! - If it is unset or empty, the server logs a warning once and allows
//!   unauthenticated access (dev mode).

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::api::error::{ApiError, CorrelationId};
use crate::state::AppState;

/// Hash the configured token in `env_var`, or `None` when it is unset.
pub fn token_hash_from_env(env_var: &str, label: &str) -> Option<Vec<u8>> {
    match std::env::var(env_var) {
        Ok(token) if !token.trim().is_empty() => {
            tracing::info!(env_var = %env_var, "{label} bearer-token auth enabled");
            Some(Sha256::digest(token.trim().as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!("{label} bearer-token auth DISABLED, set {env_var} to enable it");
            None
        }
    }
}

/// Compare the request's bearer token against `expected` in constant time.
/// `None` means no token is configured and every request passes.
pub fn bearer_matches(headers: &HeaderMap, expected: Option<&[u8]>) -> bool {
    let Some(expected) = expected else {
        return true;
    };

    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Hash the provided token to a fixed-length digest, then compare
    // in constant time. This avoids leaking the token length.
    let provided_hash = Sha256::digest(provided.as_bytes());
    bool::from(provided_hash.ct_eq(expected))
}

/// Axum middleware that enforces the API token on protected routes. The
/// admin token is accepted as well, so admin routes need only one header.
/// Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let admin = state.admin_token_hash.is_some() && is_admin(&state, req.headers());
    if admin || bearer_matches(req.headers(), state.api_token_hash.as_deref()) {
        return next.run(req).await;
    }
    let cid = req
        .extensions()
        .get::<CorrelationId>()
        .cloned()
        .unwrap_or_else(CorrelationId::generate);
    ApiError::unauthorized("invalid or missing API token", &cid).into_response()
}

/// Whether the request carries the admin token (always true in dev mode).
pub fn is_admin(state: &AppState, headers: &HeaderMap) -> bool {
    admin_allowed(
        headers,
        state.api_token_hash.as_deref(),
        state.admin_token_hash.as_deref(),
    )
}

/// Admin access rule. With an admin token, only that token passes. Without
/// one, admin operations stay open only while the whole API is open; once an
/// API token is configured they are closed.
fn admin_allowed(headers: &HeaderMap, api: Option<&[u8]>, admin: Option<&[u8]>) -> bool {
    match (admin, api) {
        (Some(admin), _) => bearer_matches(headers, Some(admin)),
        (None, Some(_)) => false,
        (None, None) => true,
    }
}

// ── AdminGuard ─────────────────────────────────────────────────────

/// Axum extractor that enforces the admin bearer token. Handlers opt in by
/// adding `_guard: AdminGuard` to their parameter list.
pub struct AdminGuard;

#[async_trait]
impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if is_admin(state, &parts.headers) {
            return Ok(AdminGuard);
        }
        Err(ApiError::unauthorized(
            "invalid admin token",
            &CorrelationId::from_parts(parts),
        ))
    }
}
