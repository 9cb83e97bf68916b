pub mod auth;
pub mod messages;
pub mod notifications;
pub mod ws;

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use murmur_auth::Claims;
use serde_json::{json, Value};

use crate::state::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth::router())
        .nest("/messages", messages::router())
        .nest("/notifications", notifications::router())
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Bearer-token identity for protected routes.
pub struct AuthUser(pub Claims);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(StatusCode::UNAUTHORIZED)?;
        let claims = state.tokens.verify(token).ok_or(StatusCode::UNAUTHORIZED)?;
        Ok(AuthUser(claims))
    }
}
