//! WebSocket handler — the realtime voting gateway.
//!
//! DESIGN
//! ======
//! On upgrade the connection exchanges a one-time ticket for a verified
//! user id, then enters a `select!` loop:
//! - Incoming client events → parse + dispatch by event name
//! - Broadcast events from room peers → forward to the client
//!
//! Lifecycle events are authoritative-first: `vote-movie`,
//! `start-voting-session`, and `end-voting-session` all apply the state
//! machine transition and broadcast only after it succeeds, so peers never
//! observe a vote or a session close that did not actually persist.
//! Failures go back to the originating connection as an `error` event and
//! are never broadcast.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade with `?ticket=` → ticket consumed, connection authenticated
//! 2. `join-voting-session` → membership verified → room registration
//! 3. Events dispatch → transition → broadcast to room peers
//! 4. Close → broadcast `user-left-voting` → deregistration

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::event::{self, Event};
use crate::services::ledger::Choice;
use crate::services::voting::VotingError;
use crate::services::{group, room, session, voting};
use crate::state::AppState;

const OUTBOX_CAPACITY: usize = 256;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(ticket) = params.get("ticket") else {
        return (StatusCode::UNAUTHORIZED, "ticket required").into_response();
    };

    let user_id = match session::consume_ws_ticket(&state.pool, ticket).await {
        Ok(Some(uid)) => uid,
        Ok(None) => return (StatusCode::UNAUTHORIZED, "invalid or expired ticket").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "ws ticket validation failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "ticket validation error").into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, user_id))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, user_id: Uuid) {
    let conn_id = Uuid::new_v4();

    // Per-connection channel for receiving broadcast events from peers.
    let (client_tx, mut client_rx) = mpsc::channel::<Event>(OUTBOX_CAPACITY);

    info!(%conn_id, %user_id, "ws: client connected");

    // Track which room this connection has joined.
    let mut current_group: Option<Uuid> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_event(&state, &mut current_group, conn_id, user_id, &client_tx, &text).await;
                        let mut send_failed = false;
                        for event in replies {
                            if send_event(&mut socket, &event).await.is_err() {
                                send_failed = true;
                                break;
                            }
                        }
                        if send_failed {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(event) = client_rx.recv() => {
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    // Tell the remaining members BEFORE deregistering (the room may be
    // evicted once this connection is gone).
    if let Some(group_id) = current_group {
        let left = Event::notify(event::USER_LEFT).with_data("userId", user_id.to_string());
        room::broadcast(&state, group_id, &left, Some(conn_id)).await;
        room::deregister(&state, group_id, conn_id).await;
    }
    info!(%conn_id, "ws: client disconnected");
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Parse and process one inbound text event, returning events for the
/// sender (errors, mostly — notifications fan out to room peers).
///
/// Split from the socket loop so tests can exercise dispatch without a
/// live websocket.
async fn process_event(
    state: &AppState,
    current_group: &mut Option<Uuid>,
    conn_id: Uuid,
    user_id: Uuid,
    client_tx: &mpsc::Sender<Event>,
    text: &str,
) -> Vec<Event> {
    let req: Event = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(%conn_id, error = %e, "ws: invalid inbound event");
            return vec![Event::error(format!("invalid json: {e}"))];
        }
    };

    info!(%conn_id, event = %req.event, "ws: recv event");

    let result = match req.event.as_str() {
        event::JOIN_SESSION => handle_join(state, current_group, conn_id, user_id, client_tx, &req).await,
        event::VOTE_MOVIE => handle_vote(state, *current_group, conn_id, user_id, &req).await,
        event::START_SESSION => handle_start(state, *current_group, conn_id, user_id, &req).await,
        event::END_SESSION => handle_end(state, *current_group, conn_id, user_id, &req).await,
        event::LEAVE_SESSION => {
            handle_leave(state, current_group, conn_id, user_id).await;
            Ok(())
        }
        other => Err(Event::error(format!("unknown event: {other}"))),
    };

    match result {
        Ok(()) => vec![],
        Err(err_event) => {
            warn!(
                %conn_id,
                event = %req.event,
                code = err_event.str_field(event::EVENT_CODE).unwrap_or("-"),
                message = err_event.str_field(event::EVENT_MESSAGE).unwrap_or("-"),
                "ws: operation failed"
            );
            vec![err_event]
        }
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// Register the connection in a group room after verifying membership,
/// then announce the join to the rest of the room.
async fn handle_join(
    state: &AppState,
    current_group: &mut Option<Uuid>,
    conn_id: Uuid,
    user_id: Uuid,
    client_tx: &mpsc::Sender<Event>,
    req: &Event,
) -> Result<(), Event> {
    let Some(group_id) = req.uuid_field("groupId") else {
        return Err(Event::error("groupId required"));
    };

    // Same membership gate as the HTTP surface: no eavesdropping on rooms
    // of groups the user does not belong to.
    match group::is_member(&state.pool, group_id, user_id).await {
        Ok(true) => {}
        Ok(false) => return Err(Event::error_from(&VotingError::NotMember)),
        Err(e) => return Err(Event::error_from(&VotingError::Database(e))),
    }

    // Leave the previous room first if switching groups.
    if let Some(old_group) = current_group.take() {
        let left = Event::notify(event::USER_LEFT).with_data("userId", user_id.to_string());
        room::broadcast(state, old_group, &left, Some(conn_id)).await;
        room::deregister(state, old_group, conn_id).await;
    }

    room::register(state, group_id, conn_id, user_id, client_tx.clone()).await;
    *current_group = Some(group_id);

    let joined = Event::notify(event::USER_JOINED).with_data("userId", user_id.to_string());
    room::broadcast(state, group_id, &joined, Some(conn_id)).await;
    Ok(())
}

/// Persist a vote through the state machine, then announce it. A vote
/// that fails to persist is never announced.
async fn handle_vote(
    state: &AppState,
    current_group: Option<Uuid>,
    conn_id: Uuid,
    user_id: Uuid,
    req: &Event,
) -> Result<(), Event> {
    let Some(group_id) = current_group else {
        return Err(Event::error("not in a voting session"));
    };
    let Some(movie_id) = req.str_field("movieId") else {
        return Err(Event::error("movieId required"));
    };
    let Some(choice) = req.str_field("vote").and_then(Choice::parse) else {
        return Err(Event::error("vote must be \"yes\" or \"no\""));
    };

    voting::cast_vote(&state.pool, group_id, user_id, movie_id, choice)
        .await
        .map_err(|e| Event::error_from(&e))?;

    let voted = Event::notify(event::MOVIE_VOTED)
        .with_data("userId", user_id.to_string())
        .with_data("movieId", movie_id)
        .with_data("vote", choice.as_str());
    room::broadcast(state, group_id, &voted, Some(conn_id)).await;
    Ok(())
}

/// Apply the pending→active transition, then announce it. The broadcast
/// is a side effect of the successful transition, not an independent
/// client-triggered message.
async fn handle_start(
    state: &AppState,
    current_group: Option<Uuid>,
    conn_id: Uuid,
    user_id: Uuid,
    req: &Event,
) -> Result<(), Event> {
    let Some(group_id) = req.uuid_field("groupId").or(current_group) else {
        return Err(Event::error("groupId required"));
    };

    voting::activate_session(&state.pool, group_id, user_id)
        .await
        .map_err(|e| Event::error_from(&e))?;

    let started = Event::notify(event::SESSION_STARTED).with_data("groupId", group_id.to_string());
    room::broadcast(state, group_id, &started, Some(conn_id)).await;
    Ok(())
}

/// Close the session authoritatively, then announce the winner chosen by
/// the scoring engine — not one supplied by the client.
async fn handle_end(
    state: &AppState,
    current_group: Option<Uuid>,
    conn_id: Uuid,
    user_id: Uuid,
    req: &Event,
) -> Result<(), Event> {
    let Some(group_id) = req.uuid_field("groupId").or(current_group) else {
        return Err(Event::error("groupId required"));
    };

    let (session, _results) = voting::end_session(&state.pool, group_id, user_id)
        .await
        .map_err(|e| Event::error_from(&e))?;

    let selected = serde_json::to_value(&session.selected_movie).unwrap_or(serde_json::Value::Null);
    let ended = Event::notify(event::SESSION_ENDED)
        .with_data("groupId", group_id.to_string())
        .with_value("selectedMovie", selected);
    room::broadcast(state, group_id, &ended, Some(conn_id)).await;
    Ok(())
}

/// Leave the current room without closing the connection.
async fn handle_leave(state: &AppState, current_group: &mut Option<Uuid>, conn_id: Uuid, user_id: Uuid) {
    let Some(group_id) = current_group.take() else {
        return;
    };
    let left = Event::notify(event::USER_LEFT).with_data("userId", user_id.to_string());
    room::broadcast(state, group_id, &left, Some(conn_id)).await;
    room::deregister(state, group_id, conn_id).await;
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_event(socket: &mut WebSocket, event: &Event) -> Result<(), ()> {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize event");
            return Err(());
        }
    };
    info!(event = %event.event, "ws: send event");
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
