//! Per-speaker conversation history
//!
//! One bounded, role-tagged transcript per speaker per call, mutated only by
//! the pipeline stage while that speaker's utterance is being processed.

use serde::{Deserialize, Serialize};

/// Role of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Seeded assistant instruction
    System,
    /// Transcribed speaker audio
    User,
    /// Generated reply
    Assistant,
}

impl Role {
    /// Wire name used by chat completion APIs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One role-tagged text turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Turn role
    pub role: Role,
    /// Turn text
    pub content: String,
}

impl Turn {
    /// Build a turn
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Bounded conversation history for one speaker
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    /// Create a history seeded with the system instruction
    #[must_use]
    pub fn seeded(system_prompt: &str) -> Self {
        Self {
            turns: vec![Turn::new(Role::System, system_prompt)],
        }
    }

    /// Append a turn
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(Turn::new(role, content));
    }

    /// Keep only the most recent `max_turns` turns.
    ///
    /// This is a plain suffix-keep: after enough exchanges the seeded system
    /// turn ages out along with everything else. Known quirk, preserved
    /// deliberately.
    pub fn truncate(&mut self, max_turns: usize) {
        if self.turns.len() > max_turns {
            self.turns.drain(..self.turns.len() - max_turns);
        }
    }

    /// All turns in order
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of turns held
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// True if no turns are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_history_starts_with_system_turn() {
        let history = ConversationHistory::seeded("be brief");
        assert_eq!(history.len(), 1);
        assert_eq!(history.turns()[0].role, Role::System);
        assert_eq!(history.turns()[0].content, "be brief");
    }

    #[test]
    fn truncate_keeps_newest_suffix() {
        let mut history = ConversationHistory::seeded("sys");
        for i in 0..30 {
            history.push(Role::User, format!("u{i}"));
            history.push(Role::Assistant, format!("a{i}"));
        }
        history.truncate(20);
        assert_eq!(history.len(), 20);
        // Suffix-keep: the system seed is gone once the cap is exceeded
        assert_eq!(history.turns()[0].role, Role::User);
        assert_eq!(history.turns().last().unwrap().content, "a29");
    }

    #[test]
    fn truncate_is_noop_under_cap() {
        let mut history = ConversationHistory::seeded("sys");
        history.push(Role::User, "hello");
        history.truncate(20);
        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[0].role, Role::System);
    }
}
