//! Vote ledger — persisted (user, movie, choice) triples scoped to one session.
//!
//! DESIGN
//! ======
//! One row per (session, user, movie); a later vote for the same pair
//! overwrites the earlier one in place, so arrival order is authoritative
//! and client retries are idempotent. The write is a single statement that
//! takes a share lock on the session row restricted to live statuses:
//! a vote racing a concurrent `end` either lands before the status flip or
//! affects zero rows, never both.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::event::now_ms;

// =============================================================================
// TYPES
// =============================================================================

/// A yes/no swipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Choice {
    Yes,
    No,
}

impl Choice {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "yes" => Some(Self::Yes),
            "no" => Some(Self::No),
            _ => None,
        }
    }
}

impl std::fmt::Display for Choice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger entry.
#[derive(Debug, Clone, Serialize)]
pub struct VoteRow {
    pub user_id: Uuid,
    pub movie_id: String,
    pub choice: Choice,
    pub voted_at: i64,
}

// =============================================================================
// WRITES
// =============================================================================

/// Record or overwrite one vote. Returns `false` when the session is not
/// in a live status (including a lost race against `end`), in which case
/// nothing was written.
///
/// # Errors
///
/// Returns a database error if the statement fails.
pub async fn record_vote(
    pool: &PgPool,
    session_id: Uuid,
    user_id: Uuid,
    movie_id: &str,
    choice: Choice,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "WITH live AS (
             SELECT id FROM voting_sessions
             WHERE id = $1 AND status IN ('pending', 'active')
             FOR SHARE
         )
         INSERT INTO session_votes (session_id, user_id, movie_id, choice, voted_at)
         SELECT id, $2, $3, $4, $5 FROM live
         ON CONFLICT (session_id, user_id, movie_id)
         DO UPDATE SET choice = EXCLUDED.choice, voted_at = EXCLUDED.voted_at",
    )
    .bind(session_id)
    .bind(user_id)
    .bind(movie_id)
    .bind(choice.as_str())
    .bind(now_ms())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// READS
// =============================================================================

/// All votes for a session, in insertion order.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn session_votes<'e, E>(executor: E, session_id: Uuid) -> Result<Vec<VoteRow>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let rows = sqlx::query(
        "SELECT user_id, movie_id, choice, voted_at
         FROM session_votes
         WHERE session_id = $1
         ORDER BY voted_at ASC, movie_id ASC",
    )
    .bind(session_id)
    .fetch_all(executor)
    .await?;

    Ok(rows.iter().filter_map(row_to_vote).collect())
}

/// One user's votes within a session.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn user_votes(pool: &PgPool, session_id: Uuid, user_id: Uuid) -> Result<Vec<VoteRow>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT user_id, movie_id, choice, voted_at
         FROM session_votes
         WHERE session_id = $1 AND user_id = $2
         ORDER BY voted_at ASC, movie_id ASC",
    )
    .bind(session_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().filter_map(row_to_vote).collect())
}

/// Total stored votes for a session (distinct user/movie pairs).
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn vote_count(pool: &PgPool, session_id: Uuid) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM session_votes WHERE session_id = $1")
        .bind(session_id)
        .fetch_one(pool)
        .await
}

fn row_to_vote(row: &sqlx::postgres::PgRow) -> Option<VoteRow> {
    let choice: String = row.get("choice");
    // The choice column is CHECK-constrained; an unparseable row would mean
    // a schema drift and is skipped rather than crashing the tally.
    Some(VoteRow {
        user_id: row.get("user_id"),
        movie_id: row.get("movie_id"),
        choice: Choice::parse(&choice)?,
        voted_at: row.get("voted_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choice_parse_round_trip() {
        assert_eq!(Choice::parse("yes"), Some(Choice::Yes));
        assert_eq!(Choice::parse("no"), Some(Choice::No));
        assert_eq!(Choice::parse("maybe"), None);
        assert_eq!(Choice::parse(""), None);
        assert_eq!(Choice::parse(Choice::Yes.as_str()), Some(Choice::Yes));
        assert_eq!(Choice::parse(Choice::No.as_str()), Some(Choice::No));
    }

    #[test]
    fn choice_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Choice::Yes).unwrap(), r#""yes""#);
        let restored: Choice = serde_json::from_str(r#""no""#).unwrap();
        assert_eq!(restored, Choice::No);
    }
}
