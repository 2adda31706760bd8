//! Conversation state kept between turns.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Turn;

/// Identity of a conversation: one session entry per `(user_id, session_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_id, self.session_id)
    }
}

/// Bounded turn history plus the one-shot image context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub turns: VecDeque<Turn>,
    pub last_access: DateTime<Utc>,
    /// Description attached to the next turn only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_context: Option<String>,
}

impl Session {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            turns: VecDeque::new(),
            last_access: now,
            image_context: None,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_access = now;
    }

    /// Append a turn, evicting the oldest ones beyond `max_turns`.
    pub fn push_turn(&mut self, turn: Turn, max_turns: usize) {
        self.turns.push_back(turn);
        while self.turns.len() > max_turns.max(1) {
            self.turns.pop_front();
        }
    }

    /// The last `n` turns, oldest first.
    pub fn recent_turns(&self, n: usize) -> Vec<Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).cloned().collect()
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_access > ttl
    }
}

/// What a new turn gets to see of its session: recent history and the
/// image context, which is consumed by reading it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionContext {
    pub recent_turns: Vec<Turn>,
    pub image_context: Option<String>,
}
