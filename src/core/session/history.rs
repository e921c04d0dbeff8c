//! In-memory conversation history, bounded per session.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// One user/assistant exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

struct SessionEntry {
    turns: Vec<Turn>,
    last_active: Instant,
}

/// Conversation store shared by all sessions. Each session keeps at most
/// `max_turns` of history; inactive sessions are reaped by age.
pub struct ConversationStore {
    max_turns: usize,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl ConversationStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new session and return its id.
    pub fn create_session(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write();
        sessions.insert(
            id.clone(),
            SessionEntry {
                turns: Vec::new(),
                last_active: Instant::now(),
            },
        );
        info!("Created session {} ({} active)", id, sessions.len());
        id
    }

    pub fn remove_session(&self, id: &str) {
        let mut sessions = self.sessions.write();
        if sessions.remove(id).is_some() {
            info!("Removed session {} ({} remain)", id, sessions.len());
        }
    }

    /// Append one exchange, truncating to the configured bound.
    pub fn append_turn(&self, id: &str, user: &str, assistant: &str) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(id) {
            entry.turns.push(Turn {
                user: user.to_string(),
                assistant: assistant.to_string(),
            });
            if entry.turns.len() > self.max_turns {
                let excess = entry.turns.len() - self.max_turns;
                entry.turns.drain(..excess);
            }
            entry.last_active = Instant::now();
            debug!("Session {} history now holds {} turns", id, entry.turns.len());
        }
    }

    pub fn history(&self, id: &str) -> Vec<Turn> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(id) {
            Some(entry) => {
                entry.last_active = Instant::now();
                entry.turns.clone()
            }
            None => Vec::new(),
        }
    }

    pub fn reset(&self, id: &str) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(id) {
            entry.turns.clear();
            entry.last_active = Instant::now();
            info!("Reset conversation history for session {}", id);
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.read().len()
    }

    /// Drop sessions idle longer than `max_age`, returning how many went.
    pub fn cleanup_inactive(&self, max_age: Duration) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_active.elapsed() <= max_age);
        let removed = before - sessions.len();
        if removed > 0 {
            info!("Cleaned up {} inactive sessions", removed);
        }
        removed
    }
}
