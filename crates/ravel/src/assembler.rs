//! Folds streamed response fragments into conversation turns.
//!
//! Text is accumulated until the speaking role changes or the assistant attaches tool
//! calls. Same-role fragments coalesce into one turn, so a stream like
//! `assistant "Hi"`, `" there"`, `assistant <tool calls>` becomes a single assistant turn.
use crate::errors::{AgentError, AgentResult};
use crate::history::ConversationHistory;
use crate::models::fragment::ResponseFragment;
use crate::models::role::Role;
use crate::models::tool::ToolCallRequest;
use crate::models::turn::Turn;

#[derive(Debug, Default)]
pub struct StreamAssembler {
    last_role: Option<Role>,
    content_cache: String,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fragment into `history`.
    ///
    /// Returns the tool calls when the fragment closed an assistant tool-call turn, so the
    /// caller can dispatch them.
    pub fn absorb(
        &mut self,
        fragment: &ResponseFragment,
        history: &mut ConversationHistory,
    ) -> AgentResult<Option<Vec<ToolCallRequest>>> {
        if let Some(role) = fragment.role {
            if self.last_role != Some(role) {
                self.flush(history)?;
                self.last_role = Some(role);
            }
        }

        if let Some(content) = fragment.content.as_deref().filter(|c| !c.is_empty()) {
            if self.last_role.is_none() {
                return Err(AgentError::ProtocolViolation(
                    "content received before any role was announced".to_string(),
                ));
            }
            self.content_cache.push_str(content);
        }

        match fragment.tool_calls.as_ref().filter(|calls| !calls.is_empty()) {
            Some(calls) => {
                if self.last_role != Some(Role::Assistant) {
                    return Err(AgentError::ProtocolViolation(format!(
                        "tool calls can only be made by the {}, not {}",
                        Role::Assistant,
                        self.last_role
                            .map(|r| r.to_string())
                            .unwrap_or_else(|| "an unannounced speaker".to_string())
                    )));
                }
                let content = std::mem::take(&mut self.content_cache);
                history.push(Turn::assistant(content).with_tool_calls(calls.clone()))?;
                Ok(Some(calls.clone()))
            }
            None => Ok(None),
        }
    }

    /// Flush any pending text as a turn of the current role
    pub fn finish(&mut self, history: &mut ConversationHistory) -> AgentResult<()> {
        self.flush(history)
    }

    fn flush(&mut self, history: &mut ConversationHistory) -> AgentResult<()> {
        if self.content_cache.is_empty() {
            return Ok(());
        }
        // Content is only cached once a role is known
        let role = self.last_role.ok_or_else(|| {
            AgentError::Internal("pending content without a role".to_string())
        })?;
        let content = std::mem::take(&mut self.content_cache);
        history.push(Turn::new(role, content))
    }
}
