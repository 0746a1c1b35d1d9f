//! User profile and preference routes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

use crate::routes::auth::AuthUser;
use crate::state::AppState;

/// `GET /api/users/me` — the caller's profile including genre preferences.
pub async fn profile(auth: AuthUser) -> Json<crate::services::session::AuthedUser> {
    Json(auth.user)
}

#[derive(Deserialize)]
pub struct UpdatePreferencesBody {
    pub genres: Vec<String>,
}

/// `PATCH /api/users/me/preferences` — replace the caller's genre
/// preferences. Blank entries are dropped; order is preserved.
pub async fn update_preferences(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<UpdatePreferencesBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let genres = normalize_genres(body.genres);

    sqlx::query("UPDATE users SET genre_prefs = $2 WHERE id = $1")
        .bind(auth.user.id)
        .bind(&genres)
        .execute(&state.pool)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(serde_json::json!({ "genres": genres })))
}

pub(crate) fn normalize_genres(raw: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.into_iter()
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .filter(|g| seen.insert(g.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_drops_blanks() {
        let got = normalize_genres(vec![" Action ".into(), String::new(), "  ".into(), "Drama".into()]);
        assert_eq!(got, vec!["Action".to_string(), "Drama".to_string()]);
    }

    #[test]
    fn normalize_dedupes_preserving_order() {
        let got = normalize_genres(vec!["Drama".into(), "Action".into(), "Drama".into()]);
        assert_eq!(got, vec!["Drama".to_string(), "Action".to_string()]);
    }
}
