//! Session types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::Turn;

/// First assistant turn of every server-created session
pub const GREETING: &str =
    "Hello, I am your digital marketing assistant. How can I assist you today?";

/// Represents a conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier
    pub id: String,
    /// Conversation turns, oldest first
    pub turns: Vec<Turn>,
    /// Session creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session seeded with the greeting
    pub fn new() -> Self {
        Self::with_turns(vec![Turn::assistant(GREETING)])
    }

    /// Create a new session seeded with the given turns
    pub fn with_turns(turns: Vec<Turn>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            turns,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a turn to the session
    pub fn add_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.updated_at = Utc::now();
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Listing entry for a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub turn_count: usize,
}
