use futures::stream::{BoxStream, StreamExt};
use tracing::{debug, warn};

use crate::assembler::StreamAssembler;
use crate::config::AgentSettings;
use crate::errors::{AgentError, AgentResult};
use crate::history::ConversationHistory;
use crate::models::fragment::ResponseFragment;
use crate::models::role::Role;
use crate::models::tool::ToolCallRequest;
use crate::models::turn::Turn;
use crate::providers::base::{GenerationConfig, Provider};
use crate::tools::{Capability, ToolRegistry};

/// Default bound on consecutive rounds that end in tool results
pub const MAX_CONSECUTIVE_TOOL_CALL_NUM: usize = 5;

/// Items streamed back to the caller of [`Agent::reply`]
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A fragment exactly as the backend produced it
    Fragment(ResponseFragment),
    /// The result of one tool call, already appended to the history
    ToolResult(Turn),
}

/// Agent drives a model through rounds of tool calls until it produces an answer
pub struct Agent {
    provider: Box<dyn Provider>,
    tools: ToolRegistry,
    max_consecutive_tool_calls: usize,
}

impl Agent {
    /// Create a new Agent with the specified provider
    pub fn new(provider: Box<dyn Provider>) -> Self {
        Self {
            provider,
            tools: ToolRegistry::new(),
            max_consecutive_tool_calls: MAX_CONSECUTIVE_TOOL_CALL_NUM,
        }
    }

    pub fn from_settings(provider: Box<dyn Provider>, settings: &AgentSettings) -> Self {
        Self::new(provider).with_max_consecutive_tool_calls(settings.max_consecutive_tool_calls)
    }

    pub fn with_max_consecutive_tool_calls(mut self, limit: usize) -> Self {
        self.max_consecutive_tool_calls = limit;
        self
    }

    /// Add a tool to the agent
    pub fn add_tool(&mut self, capability: Box<dyn Capability>) {
        self.tools.register(capability);
    }

    async fn dispatch_tool_call(
        &self,
        call: &ToolCallRequest,
        allowed: Option<&[String]>,
    ) -> AgentResult<Option<String>> {
        if let Some(names) = allowed {
            if !names.contains(&call.name) {
                return Err(AgentError::UnknownTool(format!(
                    "{} is not available in this conversation",
                    call.name
                )));
            }
        }
        self.tools.dispatch(&call.name, &call.arguments).await
    }

    /// Run one tool call, turning any failure into a result the model can read
    async fn tool_turn(&self, call: &ToolCallRequest, allowed: Option<&[String]>) -> Option<Turn> {
        match self.dispatch_tool_call(call, allowed).await {
            Ok(Some(output)) => Some(Turn::tool(output, &call.name, &call.id)),
            Ok(None) => None,
            Err(err) => {
                warn!(tool = %call.name, id = %call.id, error = %err, "tool call failed");
                Some(Turn::tool(format!("Error: {}", err), &call.name, &call.id))
            }
        }
    }

    /// Create a stream that yields every fragment as the backend produces it, plus a
    /// tool turn for each tool result.
    ///
    /// `history` is copied; the caller's turns are never modified.
    pub async fn reply(
        &self,
        input: Turn,
        history: &[Turn],
        allowed_tools: Option<&[String]>,
        config: &GenerationConfig,
    ) -> AgentResult<BoxStream<'_, AgentResult<AgentEvent>>> {
        if self.max_consecutive_tool_calls == 0 {
            return Err(AgentError::Internal(
                "max_consecutive_tool_calls must be at least 1".to_string(),
            ));
        }
        let mut history = ConversationHistory::from_turns(history)?;
        let allowed: Option<Vec<String>> = allowed_tools.map(|names| names.to_vec());
        let tools = self.tools.tools(allowed.as_deref());
        let config = config.clone();
        let limit = self.max_consecutive_tool_calls;

        Ok(Box::pin(async_stream::try_stream! {
            let mut assembler = StreamAssembler::new();
            let mut tool_rounds = 0;

            while tool_rounds < limit {
                debug!(round = tool_rounds, turns = history.len(), "calling model");
                let mut fragments = self
                    .provider
                    .stream(&input, history.turns(), &tools, &config)
                    .await?;

                while let Some(fragment) = fragments.next().await {
                    let fragment = fragment?;
                    yield AgentEvent::Fragment(fragment.clone());

                    if let Some(calls) = assembler.absorb(&fragment, &mut history)? {
                        // One at a time, in request order
                        for call in &calls {
                            if let Some(turn) = self.tool_turn(call, allowed.as_deref()).await {
                                history.push(turn.clone())?;
                                yield AgentEvent::ToolResult(turn);
                            }
                        }
                        tool_rounds += 1;
                    }
                }
                assembler.finish(&mut history)?;

                if history.last().map(|turn| turn.role) != Some(Role::Tool) {
                    break;
                }
            }

            if history.last().map(|turn| turn.role) == Some(Role::Tool) {
                warn!(limit, "stopped after reaching the consecutive tool call limit");
            }
            debug!(turns = ?history.turns(), "reply finished");
        }))
    }
}
