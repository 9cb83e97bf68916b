use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use murmur_schema::{message_stream, QueuedPayload, UserSnapshot};
use murmur_store::MessageRow;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::routes::AuthUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub status: &'static str,
    pub message_id: i64,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub session_id: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(send_message).get(session_history))
}

/// Accept a message for asynchronous processing. The reply arrives over
/// the caller's live connection, not in this response.
async fn send_message(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendMessageResponse>), StatusCode> {
    if body.content.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let session_id = body
        .session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let payload = QueuedPayload {
        tenant_id: claims.tenant_id,
        user_id: claims.user_id,
        session_id: session_id.clone(),
        content: body.content,
        user_info: UserSnapshot {
            id: claims.user_id,
            name: claims.name,
            email: claims.email,
            role: claims.role,
        },
    };
    let fields = payload
        .to_fields()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let message_id = state
        .queue
        .enqueue(&message_stream(claims.tenant_id), &fields)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!(
        tenant_id = claims.tenant_id,
        user_id = claims.user_id,
        message_id,
        "message queued"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(SendMessageResponse {
            status: "queued",
            message_id,
            session_id,
        }),
    ))
}

async fn session_history(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<MessageRow>>, StatusCode> {
    let messages = state
        .store
        .session_messages(claims.tenant_id, claims.user_id, &params.session_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(messages))
}
