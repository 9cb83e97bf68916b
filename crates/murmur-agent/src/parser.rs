//! Turns raw responder text into a validated [`AgentReply`].

use anyhow::{anyhow, Result};
use murmur_schema::{Action, AgentReply};
use tracing::warn;

/// Parse raw responder output against the structured schema: required
/// string `response`, optional array `actions`. Tolerates the whole body
/// being wrapped in a (possibly labeled) code fence. Action elements are
/// validated one by one so an unrecognized tag is logged and skipped
/// without discarding the reply or its sibling actions; a missing or
/// malformed top level is an error the caller turns into a raw-text
/// fallback.
pub fn parse_structured(raw: &str) -> Result<AgentReply> {
    let text = strip_fences(raw.trim());
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| anyhow!("response is not valid JSON: {e}"))?;

    let response = value
        .get("response")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("response field missing or not a string"))?
        .to_string();

    let mut actions = Vec::new();
    if let Some(raw_actions) = value.get("actions") {
        if raw_actions.is_null() {
            return Ok(AgentReply { response, actions });
        }
        let items = raw_actions
            .as_array()
            .ok_or_else(|| anyhow!("actions field is not an array"))?;
        for item in items {
            match serde_json::from_value::<Action>(item.clone()) {
                Ok(action) => actions.push(action),
                Err(error) => {
                    warn!(%error, action = %item, "skipping unrecognized action");
                }
            }
        }
    }

    Ok(AgentReply { response, actions })
}

/// Strip a leading/trailing code fence, with or without a language label.
fn strip_fences(text: &str) -> &str {
    let mut text = text;
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &str = r#"{"response":"Noted, I'll tell Mario.","actions":[{"type":"notify_user","user_id":1,"message":"Delivery arriving at 10am"}]}"#;

    #[test]
    fn parses_plain_json() {
        let reply = parse_structured(PLAIN).unwrap();
        assert_eq!(reply.response, "Noted, I'll tell Mario.");
        assert_eq!(
            reply.actions,
            vec![Action::NotifyUser {
                user_id: 1,
                message: "Delivery arriving at 10am".into()
            }]
        );
    }

    #[test]
    fn fenced_output_parses_identically() {
        let labeled = format!("```json\n{PLAIN}\n```");
        let unlabeled = format!("```\n{PLAIN}\n```");
        assert_eq!(
            parse_structured(&labeled).unwrap(),
            parse_structured(PLAIN).unwrap()
        );
        assert_eq!(
            parse_structured(&unlabeled).unwrap(),
            parse_structured(PLAIN).unwrap()
        );
    }

    #[test]
    fn missing_actions_defaults_empty() {
        let reply = parse_structured(r#"{"response":"just text"}"#).unwrap();
        assert!(reply.actions.is_empty());

        let reply = parse_structured(r#"{"response":"t","actions":null}"#).unwrap();
        assert!(reply.actions.is_empty());
    }

    #[test]
    fn prose_is_an_error() {
        assert!(parse_structured("Sure, I'll let Mario know!").is_err());
    }

    #[test]
    fn missing_response_is_an_error() {
        assert!(parse_structured(r#"{"actions":[]}"#).is_err());
        assert!(parse_structured(r#"{"response":42}"#).is_err());
    }

    #[test]
    fn non_array_actions_is_an_error() {
        assert!(parse_structured(r#"{"response":"t","actions":"nope"}"#).is_err());
    }

    #[test]
    fn unknown_action_tag_is_skipped_not_fatal() {
        let raw = r#"{"response":"ok","actions":[
            {"type":"notify_user","user_id":2,"message":"hi"},
            {"type":"self_destruct","countdown":10},
            {"type":"log_event","event":"noted"}
        ]}"#;
        let reply = parse_structured(raw).unwrap();
        assert_eq!(reply.actions.len(), 2);
        assert!(matches!(reply.actions[0], Action::NotifyUser { .. }));
        assert!(matches!(reply.actions[1], Action::LogEvent { .. }));
    }

    #[test]
    fn action_with_bad_fields_is_skipped() {
        let raw = r#"{"response":"ok","actions":[{"type":"notify_user","user_id":"not a number","message":"hi"}]}"#;
        let reply = parse_structured(raw).unwrap();
        assert!(reply.actions.is_empty());
    }
}
