pub mod bookings;
pub mod health;
pub mod payments;

use axum::http::HeaderMap;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::User;
use crate::state::AppState;

/// Resolve `Authorization: Bearer <api_token>` to a user row. The resolved
/// user is passed explicitly into every service call; there is no ambient
/// current-user.
pub(crate) fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token.is_empty() {
        return Err(AppError::Unauthorized);
    }

    let conn = state.db.lock().unwrap();
    queries::get_user_by_token(&conn, token)?.ok_or(AppError::Unauthorized)
}
