//! Group service — creation, membership, invite codes.
//!
//! DESIGN
//! ======
//! The owner gets a member row at creation, so membership checks reduce to
//! "owner or member row". The invite code is generated once, stored
//! uppercase, and matched case-insensitively by uppercasing the input; it
//! never changes after creation. Owners cannot leave or be removed — a
//! group dissolves only by owner deletion.

use rand::Rng;
use sqlx::{PgPool, Row};
use uuid::Uuid;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("group not found: {0}")]
    NotFound(Uuid),
    #[error("invalid invitation code")]
    InvalidCode,
    #[error("only the group owner can do this")]
    NotOwner,
    #[error("not a member of this group")]
    NotMember,
    #[error("already a member of this group")]
    AlreadyMember,
    #[error("the group owner cannot leave or be removed")]
    OwnerImmovable,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::event::ErrorCode for GroupError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_GROUP_NOT_FOUND",
            Self::InvalidCode => "E_BAD_INVITE_CODE",
            Self::NotOwner => "E_NOT_OWNER",
            Self::NotMember => "E_NOT_MEMBER",
            Self::AlreadyMember => "E_ALREADY_MEMBER",
            Self::OwnerImmovable => "E_OWNER_IMMOVABLE",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

/// Row returned from group queries.
#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub invite_code: String,
}

/// Group listing entry with its member count.
#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub invite_code: String,
    pub member_count: i64,
}

/// One member as shown in group detail.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GroupMember {
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

// =============================================================================
// INVITE CODES
// =============================================================================

const INVITE_CODE_LEN: usize = 8;
const INVITE_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const INVITE_CODE_ATTEMPTS: usize = 5;

/// Generate a random 8-character uppercase invitation code.
#[must_use]
pub fn generate_invite_code() -> String {
    let mut rng = rand::rng();
    (0..INVITE_CODE_LEN)
        .map(|_| INVITE_CODE_CHARSET[rng.random_range(0..INVITE_CODE_CHARSET.len())] as char)
        .collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.kind() == sqlx::error::ErrorKind::UniqueViolation)
}

// =============================================================================
// PRIMITIVES
// =============================================================================

/// Fetch one group by id.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn fetch_group(pool: &PgPool, group_id: Uuid) -> Result<Option<GroupRow>, sqlx::Error> {
    let row = sqlx::query_as::<_, (Uuid, String, Uuid, String)>(
        "SELECT id, name, owner_id, invite_code FROM groups WHERE id = $1",
    )
    .bind(group_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id, name, owner_id, invite_code)| GroupRow { id, name, owner_id, invite_code }))
}

/// Whether the user is the owner or a member of the group.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn is_member(pool: &PgPool, group_id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM groups WHERE id = $1 AND owner_id = $2)
             OR EXISTS(SELECT 1 FROM group_members WHERE group_id = $1 AND user_id = $2)",
    )
    .bind(group_id)
    .bind(user_id)
    .fetch_one(pool)
    .await
}

/// Genre preference lists of all members, feeding the recommendation
/// provider. The owner is included via their member row.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn member_genres(pool: &PgPool, group_id: Uuid) -> Result<Vec<Vec<String>>, sqlx::Error> {
    let rows = sqlx::query_scalar::<_, Vec<String>>(
        "SELECT u.genre_prefs
         FROM group_members m
         JOIN users u ON u.id = m.user_id
         WHERE m.group_id = $1",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// =============================================================================
// CRUD
// =============================================================================

/// Create a group owned by `owner_id`, who also becomes its first member.
/// Retries invite-code generation a few times on the (unlikely) unique
/// collision.
///
/// # Errors
///
/// Returns a database error if the insert fails.
pub async fn create_group(pool: &PgPool, name: &str, owner_id: Uuid) -> Result<GroupRow, GroupError> {
    let mut last_err = None;
    for _ in 0..INVITE_CODE_ATTEMPTS {
        let id = Uuid::new_v4();
        let invite_code = generate_invite_code();
        let mut tx = pool.begin().await?;
        let insert = sqlx::query("INSERT INTO groups (id, name, owner_id, invite_code) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(name)
            .bind(owner_id)
            .bind(&invite_code)
            .execute(&mut *tx)
            .await;

        match insert {
            Ok(_) => {
                sqlx::query("INSERT INTO group_members (group_id, user_id) VALUES ($1, $2)")
                    .bind(id)
                    .bind(owner_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                return Ok(GroupRow { id, name: name.to_string(), owner_id, invite_code });
            }
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                last_err = Some(e);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(last_err.map_or(GroupError::InvalidCode, GroupError::Database))
}

/// List all groups the user owns or belongs to, newest first.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_groups(pool: &PgPool, user_id: Uuid) -> Result<Vec<GroupSummary>, GroupError> {
    let rows = sqlx::query_as::<_, (Uuid, String, Uuid, String, i64)>(
        "SELECT g.id, g.name, g.owner_id, g.invite_code,
                (SELECT COUNT(*) FROM group_members c WHERE c.group_id = g.id) AS member_count
         FROM groups g
         WHERE g.owner_id = $1
            OR EXISTS (SELECT 1 FROM group_members m WHERE m.group_id = g.id AND m.user_id = $1)
         ORDER BY g.created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, name, owner_id, invite_code, member_count)| GroupSummary {
            id,
            name,
            owner_id,
            invite_code,
            member_count,
        })
        .collect())
}

/// List a group's members with their profiles.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_members(pool: &PgPool, group_id: Uuid) -> Result<Vec<GroupMember>, GroupError> {
    let rows = sqlx::query(
        "SELECT u.id, u.name, u.email, u.avatar_url
         FROM group_members m
         JOIN users u ON u.id = m.user_id
         WHERE m.group_id = $1
         ORDER BY m.joined_at ASC",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| GroupMember {
            user_id: row.get("id"),
            name: row.get("name"),
            email: row.get("email"),
            avatar_url: row.get("avatar_url"),
        })
        .collect())
}

/// Join a group by invitation code (case-insensitive).
///
/// # Errors
///
/// Returns `InvalidCode` for an unknown code, `AlreadyMember` if the user
/// already belongs to the group.
pub async fn join_by_code(pool: &PgPool, code: &str, user_id: Uuid) -> Result<GroupRow, GroupError> {
    let normalized = code.trim().to_ascii_uppercase();
    let row = sqlx::query_as::<_, (Uuid, String, Uuid, String)>(
        "SELECT id, name, owner_id, invite_code FROM groups WHERE invite_code = $1",
    )
    .bind(&normalized)
    .fetch_optional(pool)
    .await?;

    let Some((id, name, owner_id, invite_code)) = row else {
        return Err(GroupError::InvalidCode);
    };

    let inserted = sqlx::query("INSERT INTO group_members (group_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

    if inserted.rows_affected() == 0 {
        return Err(GroupError::AlreadyMember);
    }

    Ok(GroupRow { id, name, owner_id, invite_code })
}

/// Leave a group. The owner cannot leave.
///
/// # Errors
///
/// Returns `NotFound`, `OwnerImmovable`, or `NotMember`.
pub async fn leave_group(pool: &PgPool, group_id: Uuid, user_id: Uuid) -> Result<(), GroupError> {
    let group = fetch_group(pool, group_id)
        .await?
        .ok_or(GroupError::NotFound(group_id))?;
    if group.owner_id == user_id {
        return Err(GroupError::OwnerImmovable);
    }

    let deleted = sqlx::query("DELETE FROM group_members WHERE group_id = $1 AND user_id = $2")
        .bind(group_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(GroupError::NotMember);
    }
    Ok(())
}

/// Delete a group. Owner only; members and sessions cascade.
///
/// # Errors
///
/// Returns `NotFound` or `NotOwner`.
pub async fn delete_group(pool: &PgPool, group_id: Uuid, caller: Uuid) -> Result<(), GroupError> {
    let group = fetch_group(pool, group_id)
        .await?
        .ok_or(GroupError::NotFound(group_id))?;
    if group.owner_id != caller {
        return Err(GroupError::NotOwner);
    }

    sqlx::query("DELETE FROM groups WHERE id = $1")
        .bind(group_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Remove a member. Owner only; the owner cannot be removed.
///
/// # Errors
///
/// Returns `NotFound`, `NotOwner`, `OwnerImmovable`, or `NotMember`.
pub async fn remove_member(pool: &PgPool, group_id: Uuid, caller: Uuid, member_id: Uuid) -> Result<(), GroupError> {
    let group = fetch_group(pool, group_id)
        .await?
        .ok_or(GroupError::NotFound(group_id))?;
    if group.owner_id != caller {
        return Err(GroupError::NotOwner);
    }
    if member_id == group.owner_id {
        return Err(GroupError::OwnerImmovable);
    }

    let deleted = sqlx::query("DELETE FROM group_members WHERE group_id = $1 AND user_id = $2")
        .bind(group_id)
        .bind(member_id)
        .execute(pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(GroupError::NotMember);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ErrorCode;

    #[test]
    fn invite_code_shape() {
        for _ in 0..100 {
            let code = generate_invite_code();
            assert_eq!(code.len(), INVITE_CODE_LEN);
            assert!(code.bytes().all(|b| INVITE_CODE_CHARSET.contains(&b)));
            assert_eq!(code, code.to_ascii_uppercase());
        }
    }

    #[test]
    fn error_codes_are_grepable() {
        assert_eq!(GroupError::NotFound(Uuid::nil()).error_code(), "E_GROUP_NOT_FOUND");
        assert_eq!(GroupError::InvalidCode.error_code(), "E_BAD_INVITE_CODE");
        assert_eq!(GroupError::NotOwner.error_code(), "E_NOT_OWNER");
        assert_eq!(GroupError::OwnerImmovable.error_code(), "E_OWNER_IMMOVABLE");
    }
}
