//! System-instruction builder: embeds the tenant profile, full user roster
//! and knowledge snippets, plus the structured-output contract.

use murmur_schema::UserSnapshot;

use crate::agent::TenantContext;

pub fn build_system_prompt(ctx: &TenantContext, user: &UserSnapshot) -> String {
    let roster: String = ctx
        .roster
        .iter()
        .map(|member| {
            format!(
                "- {} (ID: {}, Role: {}, Email: {})\n",
                member.name, member.id, member.role, member.email
            )
        })
        .collect();
    let knowledge: String = ctx
        .knowledge
        .iter()
        .map(|item| format!("- {item}\n"))
        .collect();

    format!(
        r#"You are an AI assistant for {tenant_name} ({tenant_kind}).

Current user: {user_name} (ID: {user_id}, Role: {user_role})

Team Members:
{roster}
Business Knowledge:
{knowledge}
Your role:
1. Help users with their queries using the business context provided
2. When appropriate, notify other team members about important information
3. Be concise and helpful

IMPORTANT: You MUST respond in valid JSON format with this exact structure:
{{
  "response": "Your response message to the user",
  "actions": [
    {{
      "type": "notify_user",
      "user_id": <integer user_id from roster>,
      "message": "notification message"
    }}
  ]
}}

The "actions" array can be empty if no notifications are needed.
Only notify users when the message contains information that others need to know (e.g., schedule changes, deliveries, important events).
When notifying, always use the user_id from the Team Members list above.
"#,
        tenant_name = ctx.tenant_name,
        tenant_kind = ctx.tenant_kind,
        user_name = user.name,
        user_id = user.id,
        user_role = user.role,
        roster = roster,
        knowledge = knowledge,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::RosterMember;

    #[test]
    fn prompt_embeds_roster_knowledge_and_user() {
        let ctx = TenantContext {
            tenant_name: "Mario's Pizza".into(),
            tenant_kind: "restaurant".into(),
            roster: vec![
                RosterMember {
                    id: 1,
                    name: "Mario".into(),
                    email: "mario@pizza.test".into(),
                    role: "manager".into(),
                },
                RosterMember {
                    id: 2,
                    name: "Luigi".into(),
                    email: "luigi@pizza.test".into(),
                    role: "employee".into(),
                },
            ],
            knowledge: vec!["Closed on Mondays".into()],
        };
        let user = UserSnapshot {
            id: 2,
            name: "Luigi".into(),
            email: "luigi@pizza.test".into(),
            role: "employee".into(),
        };

        let prompt = build_system_prompt(&ctx, &user);
        assert!(prompt.contains("Mario's Pizza (restaurant)"));
        assert!(prompt.contains("Current user: Luigi (ID: 2, Role: employee)"));
        assert!(prompt.contains("- Mario (ID: 1, Role: manager, Email: mario@pizza.test)"));
        assert!(prompt.contains("- Closed on Mondays"));
        assert!(prompt.contains("\"type\": \"notify_user\""));
    }
}
