use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Snapshot of the sending user carried alongside a queued message, so the
/// worker never has to re-resolve identity from storage mid-flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
}

/// Wire format of one stream entry. Fields are flat strings on the stream
/// (ids stringified, the user snapshot nested as JSON) so any consumer can
/// decode them without the full schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedPayload {
    pub tenant_id: i64,
    pub user_id: i64,
    pub session_id: String,
    pub content: String,
    pub user_info: UserSnapshot,
}

impl QueuedPayload {
    pub fn to_fields(&self) -> Result<HashMap<String, String>> {
        let mut fields = HashMap::new();
        fields.insert("tenant_id".to_string(), self.tenant_id.to_string());
        fields.insert("user_id".to_string(), self.user_id.to_string());
        fields.insert("session_id".to_string(), self.session_id.clone());
        fields.insert("content".to_string(), self.content.clone());
        fields.insert(
            "user_info".to_string(),
            serde_json::to_string(&self.user_info)?,
        );
        Ok(fields)
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            fields
                .get(key)
                .ok_or_else(|| anyhow!("queued payload missing field: {key}"))
        };
        Ok(Self {
            tenant_id: get("tenant_id")?
                .parse()
                .context("invalid tenant_id in queued payload")?,
            user_id: get("user_id")?
                .parse()
                .context("invalid user_id in queued payload")?,
            session_id: get("session_id")?.clone(),
            content: get("content")?.clone(),
            user_info: serde_json::from_str(get("user_info")?)
                .context("invalid user_info in queued payload")?,
        })
    }
}

/// Machine-actionable directive extracted from a structured response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    NotifyUser { user_id: i64, message: String },
    LogEvent { event: String },
}

/// The responder's answer decomposed into displayable text plus directives.
/// Immutable once produced for an inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    pub response: String,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl AgentReply {
    /// Plain-text reply with no actions, used for parser and responder
    /// fallbacks.
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            actions: Vec::new(),
        }
    }
}

/// Events relayed to a live client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    Connected {
        user_id: i64,
        tenant_id: i64,
    },
    Message {
        content: String,
        session_id: String,
        actions_taken: usize,
    },
    Error {
        content: String,
        session_id: String,
    },
}

/// Stream key for one tenant's inbound messages.
pub fn message_stream(tenant_id: i64) -> String {
    format!("messages:{tenant_id}")
}

/// Pub/sub channel name for one (tenant, user, session) triple.
pub fn delivery_channel(tenant_id: i64, user_id: i64, session_id: &str) -> String {
    format!("response:{tenant_id}:{user_id}:{session_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> QueuedPayload {
        QueuedPayload {
            tenant_id: 7,
            user_id: 42,
            session_id: "sess-1".into(),
            content: "hello".into(),
            user_info: UserSnapshot {
                id: 42,
                name: "Luigi".into(),
                email: "luigi@example.com".into(),
                role: "employee".into(),
            },
        }
    }

    #[test]
    fn payload_fields_round_trip() {
        let payload = sample_payload();
        let fields = payload.to_fields().unwrap();
        assert_eq!(fields["tenant_id"], "7");
        assert_eq!(fields["user_id"], "42");

        let decoded = QueuedPayload::from_fields(&fields).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn payload_missing_field_errors() {
        let mut fields = sample_payload().to_fields().unwrap();
        fields.remove("session_id");
        let err = QueuedPayload::from_fields(&fields).unwrap_err();
        assert!(err.to_string().contains("session_id"));
    }

    #[test]
    fn payload_bad_user_info_errors() {
        let mut fields = sample_payload().to_fields().unwrap();
        fields.insert("user_info".into(), "not json".into());
        assert!(QueuedPayload::from_fields(&fields).is_err());
    }

    #[test]
    fn action_serde_uses_snake_case_tags() {
        let json = r#"{"type":"notify_user","user_id":1,"message":"hi"}"#;
        let action: Action = serde_json::from_str(json).unwrap();
        assert_eq!(
            action,
            Action::NotifyUser {
                user_id: 1,
                message: "hi".into()
            }
        );

        let log = Action::LogEvent {
            event: "it happened".into(),
        };
        let value = serde_json::to_value(&log).unwrap();
        assert_eq!(value["type"], "log_event");
        assert_eq!(value["event"], "it happened");
    }

    #[test]
    fn unknown_action_tag_is_rejected() {
        let json = r#"{"type":"launch_rocket","target":"moon"}"#;
        assert!(serde_json::from_str::<Action>(json).is_err());
    }

    #[test]
    fn delivery_event_wire_shape() {
        let event = DeliveryEvent::Message {
            content: "done".into(),
            session_id: "s1".into(),
            actions_taken: 2,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["actions_taken"], 2);

        let connected = DeliveryEvent::Connected {
            user_id: 1,
            tenant_id: 2,
        };
        let value = serde_json::to_value(&connected).unwrap();
        assert_eq!(value["type"], "connected");
    }

    #[test]
    fn reply_actions_default_to_empty() {
        let reply: AgentReply = serde_json::from_str(r#"{"response":"ok"}"#).unwrap();
        assert!(reply.actions.is_empty());
    }

    #[test]
    fn channel_names_are_deterministic() {
        assert_eq!(message_stream(3), "messages:3");
        assert_eq!(delivery_channel(3, 9, "abc"), "response:3:9:abc");
    }
}
