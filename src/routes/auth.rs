//! Auth plumbing — bearer-token extractor, session info, WS tickets.
//!
//! Token issuance (login) is handled outside this service; tokens arrive
//! pre-provisioned in the sessions table and are only validated, listed,
//! and revoked here.

use axum::extract::{FromRef, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::response::Json;

use crate::services::session;
use crate::state::AppState;

const BEARER_PREFIX: &str = "Bearer ";

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated user extracted from the Authorization header.
/// Use as a handler parameter to require authentication.
pub struct AuthUser {
    pub user: session::AuthedUser,
    pub token: String,
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let Some(token) = parse_bearer(header) else {
            return Err(StatusCode::UNAUTHORIZED);
        };

        let app_state = AppState::from_ref(state);
        let user = session::validate_token(&app_state.pool, token)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(Self { user, token: token.to_owned() })
    }
}

pub(crate) fn parse_bearer(header: &str) -> Option<&str> {
    let token = header.strip_prefix(BEARER_PREFIX)?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `GET /api/auth/me` — the authenticated user.
pub async fn me(auth: AuthUser) -> Json<session::AuthedUser> {
    Json(auth.user)
}

/// `POST /api/auth/logout` — revoke the presented bearer token.
pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> Result<Json<serde_json::Value>, StatusCode> {
    session::delete_token(&state.pool, &auth.token)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `POST /api/auth/ws-ticket` — one-time ticket for the WS handshake.
pub async fn ws_ticket(State(state): State<AppState>, auth: AuthUser) -> Result<Json<serde_json::Value>, StatusCode> {
    let ticket = session::create_ws_ticket(&state.pool, auth.user.id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(serde_json::json!({ "ticket": ticket })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bearer_extracts_token() {
        assert_eq!(parse_bearer("Bearer abc123"), Some("abc123"));
        assert_eq!(parse_bearer("Bearer   spaced  "), Some("spaced"));
    }

    #[test]
    fn parse_bearer_rejects_malformed() {
        assert_eq!(parse_bearer(""), None);
        assert_eq!(parse_bearer("abc123"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("bearer abc123"), None);
        assert_eq!(parse_bearer("Basic abc123"), None);
    }
}
