use crate::errors::{AgentError, AgentResult};
use crate::models::role::Role;
use crate::models::turn::Turn;

/// Ordered, append-only log of the turns of one conversation.
///
/// Every append is checked so that tool calls only come from the assistant and every
/// tool turn answers a call of the assistant turn directly before it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a validated copy of `turns`
    pub fn from_turns(turns: &[Turn]) -> AgentResult<Self> {
        let mut history = Self::new();
        for turn in turns {
            history.push(turn.clone())?;
        }
        Ok(history)
    }

    pub fn push(&mut self, turn: Turn) -> AgentResult<()> {
        self.check(&turn)?;
        self.turns.push(turn);
        Ok(())
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    fn check(&self, turn: &Turn) -> AgentResult<()> {
        if turn.tool_calls.is_some() && turn.role != Role::Assistant {
            return Err(AgentError::ProtocolViolation(format!(
                "tool calls can only be made by the assistant, got a {} turn",
                turn.role
            )));
        }
        if turn.role != Role::Tool {
            return Ok(());
        }

        let id = turn.tool_call_id.as_deref().ok_or_else(|| {
            AgentError::ProtocolViolation("tool turn without a tool_call_id".to_string())
        })?;

        // Walk back over earlier tool results to the assistant turn that asked for them
        let request = self
            .turns
            .iter()
            .rev()
            .find(|t| t.role != Role::Tool)
            .filter(|t| t.has_tool_calls())
            .ok_or_else(|| {
                AgentError::ProtocolViolation(format!(
                    "tool result '{}' does not follow an assistant tool call",
                    id
                ))
            })?;

        if request.tool_requests().iter().any(|call| call.id == id) {
            Ok(())
        } else {
            Err(AgentError::ProtocolViolation(format!(
                "tool result answers unknown tool call '{}'",
                id
            )))
        }
    }
}
