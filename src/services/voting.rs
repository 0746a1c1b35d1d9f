//! Voting session state machine — lifecycle, eligibility, and close-out.
//!
//! DESIGN
//! ======
//! The persisted session row is the single source of truth. Every mutating
//! transition is an atomic conditional update keyed on the current status:
//! a partial unique index makes concurrent creates collapse to one live
//! session per group, `start` and `end` flip the status with a
//! `WHERE status ...` guard, and the ledger's vote upsert share-locks the
//! session row. Racing callers observe `InvalidState` instead of
//! double-applying a transition.
//!
//! Voting is accepted in both `pending` and `active`; `start` only marks
//! the owner's explicit kickoff. `completed` is terminal and frozen.

use std::collections::HashMap;

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::event::now_ms;
use crate::services::group;
use crate::services::ledger::{self, Choice, VoteRow};
use crate::services::recommend::{Movie, RecommendError};
use crate::services::scoring::{self, Tally};
use crate::state::AppState;

/// Candidates requested from the recommendation provider per session.
pub const CANDIDATE_LIMIT: usize = 20;

const HISTORY_LIMIT: i64 = 10;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Live sessions accept votes and block new ones for the same group.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }
}

/// One voting round over a fixed candidate list.
#[derive(Debug, Clone, Serialize)]
pub struct VotingSession {
    pub id: Uuid,
    pub group_id: Uuid,
    pub status: SessionStatus,
    pub movies: Vec<Movie>,
    pub selected_movie: Option<Movie>,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
}

impl VotingSession {
    /// Whether a movie id belongs to this session's fixed candidate list.
    #[must_use]
    pub fn contains_candidate(&self, movie_id: &str) -> bool {
        self.movies.iter().any(|movie| movie.id == movie_id)
    }

    /// Voting progress as a 0–100 percentage, derived on read and never
    /// persisted. Live sessions estimate against five expected voters per
    /// candidate.
    #[must_use]
    pub fn progress(&self, vote_count: u64) -> f64 {
        match self.status {
            SessionStatus::Pending => 0.0,
            SessionStatus::Completed => 100.0,
            SessionStatus::Active | SessionStatus::Cancelled => {
                let expected = self.movies.len() as u64 * 5;
                if expected == 0 {
                    return 0.0;
                }
                #[allow(clippy::cast_precision_loss)]
                let ratio = vote_count as f64 / expected as f64;
                (ratio * 100.0).min(100.0)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VotingError {
    #[error("group not found: {0}")]
    GroupNotFound(Uuid),
    #[error("no voting session found")]
    SessionNotFound,
    #[error("not a member of this group")]
    NotMember,
    #[error("only the group owner can do this")]
    NotOwner,
    #[error("a voting session is already running for this group")]
    SessionExists,
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),
    #[error("movie is not among this session's candidates: {0}")]
    UnknownMovie(String),
    #[error("no movie recommendations available")]
    NoCandidates,
    #[error("session does not belong to this group")]
    WrongGroup,
    #[error("corrupt session record: {0}")]
    Corrupt(&'static str),
    #[error(transparent)]
    Recommend(#[from] RecommendError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::event::ErrorCode for VotingError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::GroupNotFound(_) => "E_GROUP_NOT_FOUND",
            Self::SessionNotFound => "E_NO_SESSION",
            Self::NotMember => "E_NOT_MEMBER",
            Self::NotOwner => "E_NOT_OWNER",
            Self::SessionExists => "E_SESSION_EXISTS",
            Self::InvalidState(_) => "E_INVALID_STATE",
            Self::UnknownMovie(_) => "E_UNKNOWN_MOVIE",
            Self::NoCandidates => "E_NO_CANDIDATES",
            Self::WrongGroup => "E_WRONG_GROUP",
            Self::Corrupt(_) => "E_CORRUPT_SESSION",
            Self::Recommend(_) => "E_CATALOG",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

type SessionRow = (
    Uuid,
    Uuid,
    String,
    serde_json::Value,
    Option<serde_json::Value>,
    Option<i64>,
    Option<i64>,
);

const SESSION_COLUMNS: &str = "id, group_id, status, movies, selected_movie, started_at, ended_at";

fn row_to_session(row: SessionRow) -> Result<VotingSession, VotingError> {
    let (id, group_id, status, movies, selected_movie, started_at, ended_at) = row;
    let status = SessionStatus::parse(&status).ok_or(VotingError::Corrupt("unrecognized status"))?;
    let movies: Vec<Movie> =
        serde_json::from_value(movies).map_err(|_| VotingError::Corrupt("candidate list does not parse"))?;
    let selected_movie = selected_movie
        .map(serde_json::from_value)
        .transpose()
        .map_err(|_| VotingError::Corrupt("selected movie does not parse"))?;
    Ok(VotingSession { id, group_id, status, movies, selected_movie, started_at, ended_at })
}

async fn fetch_live_session(pool: &PgPool, group_id: Uuid) -> Result<Option<VotingSession>, VotingError> {
    let row = sqlx::query_as::<_, SessionRow>(&format!(
        "SELECT {SESSION_COLUMNS} FROM voting_sessions WHERE group_id = $1 AND status IN ('pending', 'active')",
    ))
    .bind(group_id)
    .fetch_optional(pool)
    .await?;
    row.map(row_to_session).transpose()
}

/// Fetch one session by id regardless of status.
///
/// # Errors
///
/// Returns a database error or `Corrupt` if the record doesn't parse.
pub async fn fetch_session(pool: &PgPool, session_id: Uuid) -> Result<Option<VotingSession>, VotingError> {
    let row = sqlx::query_as::<_, SessionRow>(&format!(
        "SELECT {SESSION_COLUMNS} FROM voting_sessions WHERE id = $1",
    ))
    .bind(session_id)
    .fetch_optional(pool)
    .await?;
    row.map(row_to_session).transpose()
}

// =============================================================================
// ELIGIBILITY
// =============================================================================

async fn require_group(pool: &PgPool, group_id: Uuid) -> Result<group::GroupRow, VotingError> {
    group::fetch_group(pool, group_id)
        .await?
        .ok_or(VotingError::GroupNotFound(group_id))
}

async fn require_owner(pool: &PgPool, group_id: Uuid, caller: Uuid) -> Result<group::GroupRow, VotingError> {
    let row = require_group(pool, group_id).await?;
    if row.owner_id != caller {
        return Err(VotingError::NotOwner);
    }
    Ok(row)
}

async fn require_member(pool: &PgPool, group_id: Uuid, caller: Uuid) -> Result<(), VotingError> {
    require_group(pool, group_id).await?;
    if !group::is_member(pool, group_id, caller).await? {
        return Err(VotingError::NotMember);
    }
    Ok(())
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// Create a new pending session for the group. Owner only; fails when a
/// live session exists or the recommendation provider has no candidates.
///
/// # Errors
///
/// Returns `GroupNotFound`, `NotOwner`, `SessionExists`, `NoCandidates`,
/// a provider error, or a database error.
pub async fn create_session(state: &AppState, group_id: Uuid, caller: Uuid) -> Result<VotingSession, VotingError> {
    require_owner(&state.pool, group_id, caller).await?;

    if fetch_live_session(&state.pool, group_id).await?.is_some() {
        return Err(VotingError::SessionExists);
    }

    let member_genres = group::member_genres(&state.pool, group_id).await?;
    let movies = state
        .recommender
        .candidates(&member_genres, CANDIDATE_LIMIT)
        .await?;
    if movies.is_empty() {
        return Err(VotingError::NoCandidates);
    }

    let id = Uuid::new_v4();
    let movies_json = serde_json::to_value(&movies).map_err(|_| VotingError::Corrupt("candidate list does not serialize"))?;
    let insert = sqlx::query("INSERT INTO voting_sessions (id, group_id, status, movies) VALUES ($1, $2, 'pending', $3)")
        .bind(id)
        .bind(group_id)
        .bind(movies_json)
        .execute(&state.pool)
        .await;

    match insert {
        Ok(_) => Ok(VotingSession {
            id,
            group_id,
            status: SessionStatus::Pending,
            movies,
            selected_movie: None,
            started_at: None,
            ended_at: None,
        }),
        // The one-live-session partial unique index is the authoritative
        // guard; a concurrent create that slipped past the pre-check lands
        // here.
        Err(e) if is_unique_violation(&e) => Err(VotingError::SessionExists),
        Err(e) => Err(e.into()),
    }
}

/// Open the group's pending session for voting. Owner only.
///
/// # Errors
///
/// Returns `SessionNotFound` when no live session exists, `InvalidState`
/// when it is not pending (including a lost race).
pub async fn activate_session(pool: &PgPool, group_id: Uuid, caller: Uuid) -> Result<VotingSession, VotingError> {
    require_owner(pool, group_id, caller).await?;

    let mut session = fetch_live_session(pool, group_id)
        .await?
        .ok_or(VotingError::SessionNotFound)?;
    if session.status != SessionStatus::Pending {
        return Err(VotingError::InvalidState("session is already active"));
    }

    let started_at = now_ms();
    let updated = sqlx::query("UPDATE voting_sessions SET status = 'active', started_at = $2 WHERE id = $1 AND status = 'pending'")
        .bind(session.id)
        .bind(started_at)
        .execute(pool)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(VotingError::InvalidState("session is no longer pending"));
    }

    session.status = SessionStatus::Active;
    session.started_at = Some(started_at);
    Ok(session)
}

/// Cast or overwrite a vote. Any member, while the session is live.
///
/// # Errors
///
/// Returns `NotMember`, `SessionNotFound`, `UnknownMovie` for a movie
/// outside the candidate list, or `InvalidState` when the session closed
/// under the caller.
pub async fn cast_vote(
    pool: &PgPool,
    group_id: Uuid,
    caller: Uuid,
    movie_id: &str,
    choice: Choice,
) -> Result<(), VotingError> {
    require_member(pool, group_id, caller).await?;

    let session = fetch_live_session(pool, group_id)
        .await?
        .ok_or(VotingError::SessionNotFound)?;
    if !session.contains_candidate(movie_id) {
        return Err(VotingError::UnknownMovie(movie_id.to_string()));
    }

    let recorded = ledger::record_vote(pool, session.id, caller, movie_id, choice).await?;
    if !recorded {
        // Lost the race against a concurrent end: nothing was written.
        return Err(VotingError::InvalidState("session closed while voting"));
    }
    Ok(())
}

/// Close the group's live session: freeze the tally, pick the winner, and
/// mark it completed. Owner only. Exactly one of two racing calls
/// succeeds; the loser observes `InvalidState`.
///
/// # Errors
///
/// Returns `SessionNotFound`, `NotOwner`, `InvalidState`, or a database
/// error.
pub async fn end_session(
    pool: &PgPool,
    group_id: Uuid,
    caller: Uuid,
) -> Result<(VotingSession, HashMap<String, Tally>), VotingError> {
    require_owner(pool, group_id, caller).await?;

    let session = fetch_live_session(pool, group_id)
        .await?
        .ok_or(VotingError::SessionNotFound)?;
    let ended_at = now_ms();

    let mut tx = pool.begin().await?;

    // Exclusive row lock: concurrent votes queue behind this and then see
    // the terminal status; a second end affects zero rows.
    let flipped = sqlx::query(
        "UPDATE voting_sessions SET status = 'completed', ended_at = $2
         WHERE id = $1 AND status IN ('pending', 'active')",
    )
    .bind(session.id)
    .bind(ended_at)
    .execute(&mut *tx)
    .await?;
    if flipped.rows_affected() == 0 {
        return Err(VotingError::InvalidState("session already completed"));
    }

    let votes = ledger::session_votes(&mut *tx, session.id).await?;
    let results = scoring::vote_results(&session.movies, &votes);
    let winner = scoring::select_winner(&session.movies, &results).cloned();

    let winner_json = winner
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|_| VotingError::Corrupt("selected movie does not serialize"))?;
    sqlx::query("UPDATE voting_sessions SET selected_movie = $2 WHERE id = $1")
        .bind(session.id)
        .bind(winner_json)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let completed = VotingSession {
        status: SessionStatus::Completed,
        selected_movie: winner,
        ended_at: Some(ended_at),
        ..session
    };
    Ok((completed, results))
}

// =============================================================================
// READS
// =============================================================================

/// The caller's view of the group's live session: the session, the
/// caller's own votes, and derived progress.
///
/// # Errors
///
/// Returns `NotMember` or `SessionNotFound`.
pub async fn current_session(
    pool: &PgPool,
    group_id: Uuid,
    caller: Uuid,
) -> Result<(VotingSession, Vec<VoteRow>, f64), VotingError> {
    require_member(pool, group_id, caller).await?;

    let session = fetch_live_session(pool, group_id)
        .await?
        .ok_or(VotingError::SessionNotFound)?;
    let own_votes = ledger::user_votes(pool, session.id, caller).await?;
    let total = ledger::vote_count(pool, session.id).await?;
    let progress = session.progress(u64::try_from(total).unwrap_or(0));
    Ok((session, own_votes, progress))
}

/// Results view of any session by id, restricted to members of the group
/// it belongs to.
///
/// # Errors
///
/// Returns `SessionNotFound` or `WrongGroup` when the session belongs to
/// another group.
pub async fn session_results(
    pool: &PgPool,
    group_id: Uuid,
    session_id: Uuid,
    caller: Uuid,
) -> Result<(VotingSession, HashMap<String, Tally>), VotingError> {
    require_member(pool, group_id, caller).await?;

    let session = fetch_session(pool, session_id)
        .await?
        .ok_or(VotingError::SessionNotFound)?;
    if session.group_id != group_id {
        return Err(VotingError::WrongGroup);
    }

    let votes = ledger::session_votes(pool, session.id).await?;
    let results = scoring::vote_results(&session.movies, &votes);
    Ok((session, results))
}

/// Completed sessions for a group, newest first, capped at ten.
///
/// # Errors
///
/// Returns `GroupNotFound` or `NotMember`.
pub async fn voting_history(pool: &PgPool, group_id: Uuid, caller: Uuid) -> Result<Vec<VotingSession>, VotingError> {
    require_member(pool, group_id, caller).await?;

    let rows = sqlx::query_as::<_, SessionRow>(&format!(
        "SELECT {SESSION_COLUMNS} FROM voting_sessions
         WHERE group_id = $1 AND status = 'completed'
         ORDER BY ended_at DESC NULLS LAST
         LIMIT {HISTORY_LIMIT}",
    ))
    .bind(group_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_to_session).collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.kind() == sqlx::error::ErrorKind::UniqueViolation)
}

#[cfg(test)]
#[path = "voting_test.rs"]
mod tests;
