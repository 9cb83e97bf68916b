//! Responder boundary: prompt in, text out. Failures surface as errors,
//! never as malformed text.

pub mod gemini;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use gemini::GeminiProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// One inference call: system instruction plus ordered conversation.
    async fn generate(&self, system: &str, messages: &[ChatMessage]) -> Result<String>;
}

// ============================================================
// Provider configuration
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Stub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Responder call timeout, independent of the queue read timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Stub,
            api_key: None,
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.kind {
        ProviderKind::Gemini => {
            let key = config
                .api_key
                .as_ref()
                .ok_or_else(|| anyhow!("gemini requires api_key"))?;
            Arc::new(GeminiProvider::new(
                key.clone(),
                &config.model,
                config.timeout_secs,
            ))
        }
        ProviderKind::Stub => Arc::new(StubProvider::new()),
    };
    Ok(provider)
}

// ============================================================
// Stub provider (tests, local development)
// ============================================================

/// Scriptable in-process responder. Replies are consumed in order; when the
/// script is exhausted it echoes the last user message. Records every call
/// so tests can assert on the prompt actually sent.
pub struct StubProvider {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(String, Vec<ChatMessage>)>>,
    fail: bool,
}

impl StubProvider {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn with_replies(replies: impl IntoIterator<Item = String>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// A responder that is always unreachable.
    pub fn failing() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn last_call(&self) -> Option<(String, Vec<ChatMessage>)> {
        self.calls.lock().expect("stub calls lock").last().cloned()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("stub calls lock").len()
    }
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for StubProvider {
    async fn generate(&self, system: &str, messages: &[ChatMessage]) -> Result<String> {
        if self.fail {
            anyhow::bail!("responder unreachable (stub)");
        }
        self.calls
            .lock()
            .expect("stub calls lock")
            .push((system.to_string(), messages.to_vec()));
        if let Some(reply) = self.replies.lock().expect("stub replies lock").pop_front() {
            return Ok(reply);
        }
        let echo = messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(format!(r#"{{"response":"echo: {echo}","actions":[]}}"#))
    }
}
