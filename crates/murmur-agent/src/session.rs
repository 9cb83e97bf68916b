//! In-memory conversation history, bounded two ways: a cap on retained
//! turns per conversation key and an LRU cap on the number of keys. History
//! does not survive agent eviction or process restart.

use std::collections::{HashMap, VecDeque};

use murmur_provider::ChatMessage;

pub struct SessionStore {
    sessions: HashMap<String, SessionSlot>,
    max_sessions: usize,
    max_turns: usize,
    clock: u64,
}

struct SessionSlot {
    turns: VecDeque<ChatMessage>,
    last_used: u64,
}

impl SessionStore {
    pub fn new(max_sessions: usize, max_turns: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_sessions: max_sessions.max(1),
            max_turns: max_turns.max(1),
            clock: 0,
        }
    }

    fn key(user_id: i64, session_id: &str) -> String {
        format!("{user_id}:{session_id}")
    }

    /// Most recent turns for one conversation key, oldest first.
    pub fn recent(&self, user_id: i64, session_id: &str, limit: usize) -> Vec<ChatMessage> {
        let Some(slot) = self.sessions.get(&Self::key(user_id, session_id)) else {
            return Vec::new();
        };
        let skip = slot.turns.len().saturating_sub(limit);
        slot.turns.iter().skip(skip).cloned().collect()
    }

    pub fn append(&mut self, user_id: i64, session_id: &str, turn: ChatMessage) {
        self.clock += 1;
        let clock = self.clock;
        let key = Self::key(user_id, session_id);

        if !self.sessions.contains_key(&key) && self.sessions.len() >= self.max_sessions {
            self.evict_lru();
        }

        let slot = self.sessions.entry(key).or_insert_with(|| SessionSlot {
            turns: VecDeque::new(),
            last_used: clock,
        });
        slot.last_used = clock;
        slot.turns.push_back(turn);
        while slot.turns.len() > self.max_turns {
            slot.turns.pop_front();
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            tracing::debug!(session_key = %key, "evicting least-recently-used session");
            self.sessions.remove(&key);
        }
    }
}
