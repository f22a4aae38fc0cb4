//! Conversation turns and rolling history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier for a conversation turn, unique within a conversation
pub type TurnId = u64;

/// Role in a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// The human speaker
    User,
    /// The active agent persona
    Agent,
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnRole::User => write!(f, "user"),
            TurnRole::Agent => write!(f, "agent"),
        }
    }
}

/// Completion state of a turn
///
/// Transitions are monotonic: `Open -> {Complete | Interrupted}`.
/// A closed turn never reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    #[default]
    Open,
    Complete,
    Interrupted,
}

impl TurnState {
    pub fn is_closed(&self) -> bool {
        !matches!(self, TurnState::Open)
    }
}

/// One user-or-agent utterance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: TurnId,
    pub role: TurnRole,
    /// Accumulated transcript text
    pub text: String,
    pub state: TurnState,
    pub started_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(id: TurnId, role: TurnRole) -> Self {
        Self {
            id,
            role,
            text: String::new(),
            state: TurnState::Open,
            started_at: Utc::now(),
        }
    }

    /// Append transcript text; ignored once the turn is closed
    pub fn append_text(&mut self, text: &str) {
        if self.state.is_closed() {
            tracing::debug!(turn = self.id, "Ignoring transcript append on closed turn");
            return;
        }
        self.text.push_str(text);
    }

    /// Mark the turn complete. Returns false if it was already closed.
    pub fn complete(&mut self) -> bool {
        if self.state.is_closed() {
            return false;
        }
        self.state = TurnState::Complete;
        true
    }

    /// Mark the turn interrupted. Returns false if it was already closed.
    pub fn interrupt(&mut self) -> bool {
        if self.state.is_closed() {
            return false;
        }
        self.state = TurnState::Interrupted;
        true
    }

    pub fn is_open(&self) -> bool {
        self.state == TurnState::Open
    }
}

/// Rolling ordered sequence of conversation turns
///
/// The orchestrator appends as events arrive; at most one turn is open at a
/// time (the floor alternates, but an interrupted agent turn and the user
/// turn that interrupted it may briefly overlap, so the history keys open
/// turns by role).
#[derive(Debug, Default)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
    next_id: TurnId,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the open turn for a role, starting a new one if needed.
    /// Returns the turn id.
    pub fn open_turn(&mut self, role: TurnRole) -> TurnId {
        if let Some(turn) = self.turns.iter().rev().find(|t| t.role == role && t.is_open()) {
            return turn.id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.turns.push(ConversationTurn::new(id, role));
        id
    }

    /// Append transcript text to the open turn for `role`, opening one if absent
    pub fn append_text(&mut self, role: TurnRole, text: &str) -> TurnId {
        let id = self.open_turn(role);
        if let Some(turn) = self.turn_mut(id) {
            turn.append_text(text);
        }
        id
    }

    /// Complete the open turn for `role`. Returns the closed turn id, if any.
    pub fn complete_turn(&mut self, role: TurnRole) -> Option<TurnId> {
        let id = self
            .turns
            .iter()
            .rev()
            .find(|t| t.role == role && t.is_open())
            .map(|t| t.id)?;
        let turn = self.turn_mut(id)?;
        if turn.complete() {
            Some(turn.id)
        } else {
            None
        }
    }

    /// Interrupt the open agent turn. Returns its id, if one was open.
    pub fn interrupt_agent_turn(&mut self) -> Option<TurnId> {
        let id = self
            .turns
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::Agent && t.is_open())
            .map(|t| t.id)?;
        let turn = self.turn_mut(id)?;
        if turn.interrupt() {
            Some(turn.id)
        } else {
            None
        }
    }

    pub fn turn(&self, id: TurnId) -> Option<&ConversationTurn> {
        self.turns.iter().find(|t| t.id == id)
    }

    fn turn_mut(&mut self, id: TurnId) -> Option<&mut ConversationTurn> {
        self.turns.iter_mut().find(|t| t.id == id)
    }

    /// True if the turn exists and was closed as interrupted
    pub fn is_interrupted(&self, id: TurnId) -> bool {
        self.turn(id)
            .map(|t| t.state == TurnState::Interrupted)
            .unwrap_or(false)
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Build the condensed context carried across an agent switch
    ///
    /// A bounded summary, not the full transcript: the last `max_turns`
    /// closed turns rendered one per line as `role: text` (each line
    /// truncated), preceded by a note naming the outgoing agent.
    pub fn condensed_context(&self, outgoing_agent_id: &str, max_turns: usize) -> String {
        const MAX_LINE_CHARS: usize = 240;

        let mut lines = vec![format!(
            "Conversation handed over from agent '{}'. Recent exchange:",
            outgoing_agent_id
        )];

        let recent: Vec<&ConversationTurn> = self
            .turns
            .iter()
            .filter(|t| t.state.is_closed() && !t.text.is_empty())
            .rev()
            .take(max_turns)
            .collect();

        for turn in recent.into_iter().rev() {
            let mut text = turn.text.trim().to_string();
            if text.len() > MAX_LINE_CHARS {
                let cut = text
                    .char_indices()
                    .take_while(|(i, _)| *i < MAX_LINE_CHARS)
                    .last()
                    .map(|(i, c)| i + c.len_utf8())
                    .unwrap_or(0);
                text.truncate(cut);
                text.push('…');
            }
            lines.push(format!("{}: {}", turn.role, text));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_completion_monotonic() {
        let mut turn = ConversationTurn::new(0, TurnRole::User);
        assert!(turn.is_open());

        assert!(turn.complete());
        assert_eq!(turn.state, TurnState::Complete);

        // Closed turns never reopen or change state
        assert!(!turn.interrupt());
        assert!(!turn.complete());
        assert_eq!(turn.state, TurnState::Complete);
    }

    #[test]
    fn test_interrupted_turn_stays_interrupted() {
        let mut turn = ConversationTurn::new(0, TurnRole::Agent);
        assert!(turn.interrupt());
        assert!(!turn.complete());
        assert_eq!(turn.state, TurnState::Interrupted);
    }

    #[test]
    fn test_append_ignored_after_close() {
        let mut turn = ConversationTurn::new(0, TurnRole::Agent);
        turn.append_text("hello");
        turn.complete();
        turn.append_text(" world");
        assert_eq!(turn.text, "hello");
    }

    #[test]
    fn test_history_open_and_complete() {
        let mut history = ConversationHistory::new();
        let id = history.append_text(TurnRole::User, "hi");
        assert_eq!(history.append_text(TurnRole::User, " there"), id);

        assert_eq!(history.complete_turn(TurnRole::User), Some(id));
        assert_eq!(history.complete_turn(TurnRole::User), None);
        assert_eq!(history.turn(id).unwrap().text, "hi there");
    }

    #[test]
    fn test_history_interrupt_agent_turn() {
        let mut history = ConversationHistory::new();
        let id = history.append_text(TurnRole::Agent, "as I was saying");

        assert_eq!(history.interrupt_agent_turn(), Some(id));
        assert!(history.is_interrupted(id));
        // Nothing left to interrupt
        assert_eq!(history.interrupt_agent_turn(), None);
    }

    #[test]
    fn test_condensed_context_bounded() {
        let mut history = ConversationHistory::new();
        for i in 0..10 {
            history.append_text(TurnRole::User, &format!("question {}", i));
            history.complete_turn(TurnRole::User);
            history.append_text(TurnRole::Agent, &format!("answer {}", i));
            history.complete_turn(TurnRole::Agent);
        }

        let context = history.condensed_context("sales", 4);
        assert!(context.starts_with("Conversation handed over from agent 'sales'"));
        // Header plus exactly four turn lines
        assert_eq!(context.lines().count(), 5);
        assert!(context.contains("agent: answer 9"));
        assert!(!context.contains("question 0"));
    }

    #[test]
    fn test_condensed_context_truncates_long_turns() {
        let mut history = ConversationHistory::new();
        history.append_text(TurnRole::User, &"x".repeat(1000));
        history.complete_turn(TurnRole::User);

        let context = history.condensed_context("support", 6);
        let line = context.lines().nth(1).unwrap();
        assert!(line.chars().count() < 300);
        assert!(line.ends_with('…'));
    }
}
