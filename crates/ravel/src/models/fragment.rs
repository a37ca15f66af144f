use serde::{Deserialize, Serialize};

use super::role::Role;
use super::tool::ToolCallRequest;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// An incremental piece of a turn as streamed by a model backend.
///
/// A fragment with a role announces who is speaking; fragments without one continue
/// the turn that is currently open.
pub struct ResponseFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
}

impl ResponseFragment {
    /// A fragment opening a turn for `role`
    pub fn role(role: Role) -> Self {
        ResponseFragment {
            role: Some(role),
            ..Default::default()
        }
    }

    /// A continuation fragment carrying only text
    pub fn text<S: Into<String>>(content: S) -> Self {
        ResponseFragment {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn with_content<S: Into<String>>(mut self, content: S) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRequest>) -> Self {
        self.tool_calls = Some(tool_calls);
        self
    }
}
