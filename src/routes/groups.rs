//! Group management routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::services::group::{self, GroupError, GroupMember};
use crate::state::AppState;

const MAX_GROUP_NAME_LEN: usize = 50;

// =============================================================================
// RESPONSES
// =============================================================================

#[derive(Serialize)]
pub struct GroupResponse {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub invite_code: String,
}

#[derive(Serialize)]
pub struct GroupSummaryResponse {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub invite_code: String,
    pub member_count: i64,
}

#[derive(Serialize)]
pub struct GroupDetailResponse {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub invite_code: String,
    pub members: Vec<GroupMember>,
}

pub(crate) fn group_error_to_status(err: &GroupError) -> StatusCode {
    match err {
        GroupError::NotFound(_) | GroupError::InvalidCode => StatusCode::NOT_FOUND,
        GroupError::NotOwner => StatusCode::FORBIDDEN,
        GroupError::NotMember | GroupError::AlreadyMember | GroupError::OwnerImmovable => StatusCode::BAD_REQUEST,
        GroupError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

#[derive(Deserialize)]
pub struct CreateGroupBody {
    pub name: String,
}

/// `POST /api/groups` — create a group owned by the caller.
pub async fn create_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateGroupBody>,
) -> Result<(StatusCode, Json<GroupResponse>), StatusCode> {
    let name = body.name.trim();
    if name.is_empty() || name.len() > MAX_GROUP_NAME_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    let row = group::create_group(&state.pool, name, auth.user.id)
        .await
        .map_err(|e| group_error_to_status(&e))?;

    Ok((
        StatusCode::CREATED,
        Json(GroupResponse { id: row.id, name: row.name, owner_id: row.owner_id, invite_code: row.invite_code }),
    ))
}

/// `GET /api/groups` — list the caller's groups.
pub async fn list_groups(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<GroupSummaryResponse>>, StatusCode> {
    let rows = group::list_groups(&state.pool, auth.user.id)
        .await
        .map_err(|e| group_error_to_status(&e))?;

    Ok(Json(
        rows.into_iter()
            .map(|row| GroupSummaryResponse {
                id: row.id,
                name: row.name,
                owner_id: row.owner_id,
                invite_code: row.invite_code,
                member_count: row.member_count,
            })
            .collect(),
    ))
}

/// `GET /api/groups/:id` — group detail with members, members only.
pub async fn get_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
) -> Result<Json<GroupDetailResponse>, StatusCode> {
    let row = group::fetch_group(&state.pool, group_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let member = group::is_member(&state.pool, group_id, auth.user.id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if !member {
        return Err(StatusCode::FORBIDDEN);
    }

    let members = group::list_members(&state.pool, group_id)
        .await
        .map_err(|e| group_error_to_status(&e))?;

    Ok(Json(GroupDetailResponse {
        id: row.id,
        name: row.name,
        owner_id: row.owner_id,
        invite_code: row.invite_code,
        members,
    }))
}

#[derive(Deserialize)]
pub struct JoinGroupBody {
    pub invite_code: String,
}

/// `POST /api/groups/join` — join via invitation code (case-insensitive).
pub async fn join_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<JoinGroupBody>,
) -> Result<Json<GroupResponse>, StatusCode> {
    if body.invite_code.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let row = group::join_by_code(&state.pool, &body.invite_code, auth.user.id)
        .await
        .map_err(|e| group_error_to_status(&e))?;

    Ok(Json(GroupResponse { id: row.id, name: row.name, owner_id: row.owner_id, invite_code: row.invite_code }))
}

/// `POST /api/groups/:id/leave` — leave a group (owner cannot).
pub async fn leave_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    group::leave_group(&state.pool, group_id, auth.user.id)
        .await
        .map_err(|e| group_error_to_status(&e))?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `DELETE /api/groups/:id` — delete a group, owner only.
pub async fn delete_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    group::delete_group(&state.pool, group_id, auth.user.id)
        .await
        .map_err(|e| group_error_to_status(&e))?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `DELETE /api/groups/:id/members/:user_id` — remove a member, owner only.
pub async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((group_id, member_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    group::remove_member(&state.pool, group_id, auth.user.id, member_id)
        .await
        .map_err(|e| group_error_to_status(&e))?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_error_to_status_maps_not_found() {
        assert_eq!(group_error_to_status(&GroupError::NotFound(Uuid::nil())), StatusCode::NOT_FOUND);
        assert_eq!(group_error_to_status(&GroupError::InvalidCode), StatusCode::NOT_FOUND);
    }

    #[test]
    fn group_error_to_status_maps_forbidden() {
        assert_eq!(group_error_to_status(&GroupError::NotOwner), StatusCode::FORBIDDEN);
    }

    #[test]
    fn group_error_to_status_maps_bad_request() {
        assert_eq!(group_error_to_status(&GroupError::AlreadyMember), StatusCode::BAD_REQUEST);
        assert_eq!(group_error_to_status(&GroupError::NotMember), StatusCode::BAD_REQUEST);
        assert_eq!(group_error_to_status(&GroupError::OwnerImmovable), StatusCode::BAD_REQUEST);
    }
}
