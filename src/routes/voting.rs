//! Voting session routes.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::services::ledger::{Choice, VoteRow};
use crate::services::recommend::Movie;
use crate::services::scoring::Tally;
use crate::services::voting::{self, SessionStatus, VotingError, VotingSession};
use crate::state::AppState;

// =============================================================================
// RESPONSES
// =============================================================================

#[derive(Serialize)]
pub struct UserVote {
    pub movie_id: String,
    pub vote: Choice,
}

#[derive(Serialize)]
pub struct CurrentSessionResponse {
    pub session: VotingSession,
    pub user_votes: Vec<UserVote>,
    pub progress: f64,
}

#[derive(Serialize)]
pub struct SessionResultsResponse {
    pub session: VotingSession,
    pub vote_results: HashMap<String, Tally>,
}

#[derive(Serialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub status: SessionStatus,
    pub selected_movie: Option<Movie>,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
}

pub(crate) fn voting_error_to_status(err: &VotingError) -> StatusCode {
    match err {
        VotingError::GroupNotFound(_) | VotingError::SessionNotFound => StatusCode::NOT_FOUND,
        VotingError::NotMember | VotingError::NotOwner => StatusCode::FORBIDDEN,
        VotingError::SessionExists
        | VotingError::InvalidState(_)
        | VotingError::UnknownMovie(_)
        | VotingError::NoCandidates
        | VotingError::WrongGroup => StatusCode::BAD_REQUEST,
        VotingError::Recommend(_) => StatusCode::BAD_GATEWAY,
        VotingError::Corrupt(_) | VotingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn user_votes_response(votes: Vec<VoteRow>) -> Vec<UserVote> {
    votes
        .into_iter()
        .map(|vote| UserVote { movie_id: vote.movie_id, vote: vote.choice })
        .collect()
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `POST /api/voting/:group_id/start` — create a pending session for the
/// group, owner only.
pub async fn start_session(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
) -> Result<(StatusCode, Json<VotingSession>), StatusCode> {
    let session = voting::create_session(&state, group_id, auth.user.id)
        .await
        .map_err(|e| voting_error_to_status(&e))?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// `GET /api/voting/:group_id/current` — the live session with the
/// caller's votes and derived progress.
pub async fn current_session(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
) -> Result<Json<CurrentSessionResponse>, StatusCode> {
    let (session, own_votes, progress) = voting::current_session(&state.pool, group_id, auth.user.id)
        .await
        .map_err(|e| voting_error_to_status(&e))?;

    Ok(Json(CurrentSessionResponse { session, user_votes: user_votes_response(own_votes), progress }))
}

#[derive(Deserialize)]
pub struct VoteBody {
    pub movie_id: String,
    pub vote: String,
}

/// `POST /api/voting/:group_id/vote` — cast or overwrite a vote.
pub async fn cast_vote(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
    Json(body): Json<VoteBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let Some(choice) = Choice::parse(&body.vote) else {
        return Err(StatusCode::BAD_REQUEST);
    };
    if body.movie_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    voting::cast_vote(&state.pool, group_id, auth.user.id, &body.movie_id, choice)
        .await
        .map_err(|e| voting_error_to_status(&e))?;

    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `POST /api/voting/:group_id/end` — close the live session, owner only.
pub async fn end_session(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
) -> Result<Json<SessionResultsResponse>, StatusCode> {
    let (session, vote_results) = voting::end_session(&state.pool, group_id, auth.user.id)
        .await
        .map_err(|e| voting_error_to_status(&e))?;

    Ok(Json(SessionResultsResponse { session, vote_results }))
}

/// `GET /api/voting/:group_id/results/:session_id` — results for any
/// session of the group, members only.
pub async fn session_results(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((group_id, session_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<SessionResultsResponse>, StatusCode> {
    let (session, vote_results) = voting::session_results(&state.pool, group_id, session_id, auth.user.id)
        .await
        .map_err(|e| voting_error_to_status(&e))?;

    Ok(Json(SessionResultsResponse { session, vote_results }))
}

/// `GET /api/voting/:group_id/history` — completed sessions, newest
/// first, capped at ten.
pub async fn voting_history(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
) -> Result<Json<Vec<HistoryEntry>>, StatusCode> {
    let sessions = voting::voting_history(&state.pool, group_id, auth.user.id)
        .await
        .map_err(|e| voting_error_to_status(&e))?;

    Ok(Json(
        sessions
            .into_iter()
            .map(|session| HistoryEntry {
                id: session.id,
                status: session.status,
                selected_movie: session.selected_movie,
                started_at: session.started_at,
                ended_at: session.ended_at,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voting_error_to_status_maps_not_found() {
        assert_eq!(voting_error_to_status(&VotingError::GroupNotFound(Uuid::nil())), StatusCode::NOT_FOUND);
        assert_eq!(voting_error_to_status(&VotingError::SessionNotFound), StatusCode::NOT_FOUND);
    }

    #[test]
    fn voting_error_to_status_maps_forbidden() {
        assert_eq!(voting_error_to_status(&VotingError::NotOwner), StatusCode::FORBIDDEN);
        assert_eq!(voting_error_to_status(&VotingError::NotMember), StatusCode::FORBIDDEN);
    }

    #[test]
    fn voting_error_to_status_maps_bad_request() {
        assert_eq!(voting_error_to_status(&VotingError::SessionExists), StatusCode::BAD_REQUEST);
        assert_eq!(voting_error_to_status(&VotingError::NoCandidates), StatusCode::BAD_REQUEST);
        assert_eq!(
            voting_error_to_status(&VotingError::UnknownMovie("603".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(voting_error_to_status(&VotingError::WrongGroup), StatusCode::BAD_REQUEST);
        assert_eq!(
            voting_error_to_status(&VotingError::InvalidState("already completed")),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn vote_body_rejects_unknown_choice() {
        assert!(Choice::parse("maybe").is_none());
        assert!(Choice::parse("yes").is_some());
    }
}
