use serde::{Deserialize, Serialize};

use super::role::Role;
use super::tool::ToolCallRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One role-tagged message of a conversation
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
}

impl Turn {
    /// Create a turn for any role with the given content
    pub fn new<S: Into<String>>(role: Role, content: S) -> Self {
        Turn {
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn system<S: Into<String>>(content: S) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create the result turn answering the tool call `tool_call_id`
    pub fn tool<S, N, I>(content: S, name: N, tool_call_id: I) -> Self
    where
        S: Into<String>,
        N: Into<String>,
        I: Into<String>,
    {
        Turn {
            role: Role::Tool,
            content: content.into(),
            name: Some(name.into()),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }

    /// Attach tool calls to the turn. Only assistant turns may carry them, which
    /// the history checks on append.
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRequest>) -> Self {
        self.tool_calls = Some(tool_calls);
        self
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The tool calls of this turn, empty when it carries none
    pub fn tool_requests(&self) -> &[ToolCallRequest] {
        self.tool_calls.as_deref().unwrap_or(&[])
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_requests().is_empty()
    }
}
