//! The per-tenant stateful responder.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use murmur_provider::{ChatMessage, LlmProvider};
use murmur_schema::{AgentReply, UserSnapshot};
use murmur_store::Store;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::parser;
use crate::prompt;
use crate::session::SessionStore;

/// Turns of history handed to the responder per call.
pub const HISTORY_WINDOW: usize = 10;

const APOLOGY: &str =
    "I apologize, but I encountered an error processing your request. Please try again.";

/// Read-mostly snapshot of one tenant, loaded at agent construction and
/// accepted as stale until the agent is recreated.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_name: String,
    pub tenant_kind: String,
    pub roster: Vec<RosterMember>,
    pub knowledge: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RosterMember {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
}

pub struct TenantAgent {
    tenant_id: i64,
    store: Arc<Store>,
    provider: Arc<dyn LlmProvider>,
    context: RwLock<Option<TenantContext>>,
    sessions: Mutex<SessionStore>,
    context_loads: AtomicUsize,
}

impl TenantAgent {
    pub fn new(
        tenant_id: i64,
        store: Arc<Store>,
        provider: Arc<dyn LlmProvider>,
        max_sessions: usize,
        max_turns: usize,
    ) -> Self {
        Self {
            tenant_id,
            store,
            provider,
            context: RwLock::new(None),
            sessions: Mutex::new(SessionStore::new(max_sessions, max_turns)),
            context_loads: AtomicUsize::new(0),
        }
    }

    pub fn tenant_id(&self) -> i64 {
        self.tenant_id
    }

    /// Load the tenant profile, user roster and knowledge snippets.
    pub async fn load_context(&self) -> Result<()> {
        let tenant = self
            .store
            .get_tenant(self.tenant_id)
            .await?
            .ok_or_else(|| anyhow!("tenant context unavailable: no tenant {}", self.tenant_id))?;
        let roster: Vec<RosterMember> = self
            .store
            .list_users(self.tenant_id)
            .await?
            .into_iter()
            .map(|u| RosterMember {
                id: u.id,
                name: u.name,
                email: u.email,
                role: u.role,
            })
            .collect();
        let knowledge = self.store.list_knowledge(self.tenant_id).await?;

        info!(
            tenant_id = self.tenant_id,
            users = roster.len(),
            knowledge = knowledge.len(),
            "loaded tenant context"
        );
        self.context_loads.fetch_add(1, Ordering::SeqCst);
        *self.context.write().await = Some(TenantContext {
            tenant_name: tenant.name,
            tenant_kind: tenant.kind,
            roster,
            knowledge,
        });
        Ok(())
    }

    pub async fn context_loaded(&self) -> bool {
        self.context.read().await.is_some()
    }

    /// How many times the context snapshot was loaded from storage.
    pub fn context_load_count(&self) -> usize {
        self.context_loads.load(Ordering::SeqCst)
    }

    /// Turn one inbound message into a structured reply.
    ///
    /// Responder transport failures come back as a fixed apology, malformed
    /// structured output as the raw text with no actions; an `Err` here
    /// means a hard failure (context unavailable), never a declined
    /// responder.
    pub async fn respond(
        &self,
        user_id: i64,
        user_info: &UserSnapshot,
        session_id: &str,
        message: &str,
    ) -> Result<AgentReply> {
        // Defensive re-entry: a registry-built agent already has context.
        if !self.context_loaded().await {
            self.load_context().await?;
        }

        let system = {
            let guard = self.context.read().await;
            let ctx = guard
                .as_ref()
                .ok_or_else(|| anyhow!("tenant context unavailable"))?;
            prompt::build_system_prompt(ctx, user_info)
        };

        let mut messages = {
            let sessions = self.sessions.lock().await;
            sessions.recent(user_id, session_id, HISTORY_WINDOW)
        };
        messages.push(ChatMessage::user(message));

        let raw = match self.provider.generate(&system, &messages).await {
            Ok(text) => text,
            Err(error) => {
                error!(tenant_id = self.tenant_id, %error, "responder invocation failed");
                return Ok(AgentReply::text(APOLOGY));
            }
        };

        let reply = match parser::parse_structured(&raw) {
            Ok(reply) => reply,
            Err(error) => {
                warn!(tenant_id = self.tenant_id, %error, "unparseable responder output, using raw text");
                AgentReply::text(raw)
            }
        };

        let mut sessions = self.sessions.lock().await;
        sessions.append(user_id, session_id, ChatMessage::user(message));
        sessions.append(user_id, session_id, ChatMessage::assistant(&reply.response));

        Ok(reply)
    }
}
