use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::{Json, Router};
use murmur_store::NotificationRow;
use serde::{Deserialize, Serialize};

use crate::routes::AuthUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub id: i64,
    pub read: bool,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread_count: i64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/unread/count", get(unread_count))
        .route("/{id}/read", patch(mark_read))
}

async fn list_notifications(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<NotificationRow>>, StatusCode> {
    let notifications = state
        .store
        .notifications_for(claims.tenant_id, claims.user_id, params.unread_only)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(notifications))
}

async fn unread_count(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<UnreadCountResponse>, StatusCode> {
    let unread_count = state
        .store
        .unread_notification_count(claims.tenant_id, claims.user_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

/// Only the recipient can mark a notification read; anyone else's id
/// behaves as if the notification does not exist.
async fn mark_read(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<MarkReadResponse>, StatusCode> {
    let updated = state
        .store
        .mark_notification_read(claims.tenant_id, claims.user_id, id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if !updated {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(MarkReadResponse { id, read: true }))
}
