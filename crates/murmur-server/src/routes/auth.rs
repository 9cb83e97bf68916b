use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use murmur_auth::{verify_password, Claims};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: LoginUser,
}

#[derive(Debug, Serialize)]
pub struct LoginUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
    pub tenant_id: i64,
    pub tenant_name: String,
    pub tenant_type: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/login", post(login))
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, StatusCode> {
    let user = state
        .store
        .get_user_by_email(&body.email)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if !verify_password(&body.password, &user.password_hash) {
        warn!(email = %body.email, "login rejected");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let tenant = state
        .store
        .get_tenant(user.tenant_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = state
        .tokens
        .issue(Claims {
            user_id: user.id,
            tenant_id: user.tenant_id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role.clone(),
            tenant_name: tenant.name.clone(),
            tenant_type: tenant.kind.clone(),
            exp: 0,
        })
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!(user_id = user.id, tenant_id = user.tenant_id, "login ok");
    Ok(Json(LoginResponse {
        token,
        user: LoginUser {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            tenant_id: user.tenant_id,
            tenant_name: tenant.name,
            tenant_type: tenant.kind,
        },
    }))
}
