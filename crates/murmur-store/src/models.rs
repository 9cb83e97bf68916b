use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantRow {
    pub id: i64,
    pub name: String,
    /// Business type (e.g. "restaurant"); column is named `type`.
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRow {
    pub id: i64,
    pub tenant_id: i64,
    pub user_id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationRow {
    pub id: i64,
    pub tenant_id: i64,
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
