//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the HTTP API and the websocket gateway under a single Axum
//! router. Everything except the health probe requires a bearer token;
//! the websocket authenticates with a one-time ticket at upgrade.

pub mod auth;
pub mod groups;
pub mod users;
pub mod voting;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{delete, get, patch, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/ws-ticket", post(auth::ws_ticket))
        .route("/api/users/me", get(users::profile))
        .route("/api/users/me/preferences", patch(users::update_preferences))
        .route("/api/groups", get(groups::list_groups).post(groups::create_group))
        .route("/api/groups/join", post(groups::join_group))
        .route(
            "/api/groups/{id}",
            get(groups::get_group).delete(groups::delete_group),
        )
        .route("/api/groups/{id}/leave", post(groups::leave_group))
        .route("/api/groups/{id}/members/{user_id}", delete(groups::remove_member))
        .route("/api/voting/{group_id}/start", post(voting::start_session))
        .route("/api/voting/{group_id}/current", get(voting::current_session))
        .route("/api/voting/{group_id}/vote", post(voting::cast_vote))
        .route("/api/voting/{group_id}/end", post(voting::end_session))
        .route(
            "/api/voting/{group_id}/results/{session_id}",
            get(voting::session_results),
        )
        .route("/api/voting/{group_id}/history", get(voting::voting_history))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
