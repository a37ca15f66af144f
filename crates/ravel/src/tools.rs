use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;

/// Core trait that defines a capability an agent can invoke as a tool
#[async_trait]
pub trait Capability: Send + Sync {
    /// The definition offered to the model
    fn tool(&self) -> &Tool;

    /// Run the capability with already-parsed arguments.
    ///
    /// `Ok(None)` means there is nothing to report back to the model, which is what
    /// side-effecting tools return.
    async fn invoke(&self, arguments: Value) -> AgentResult<Option<String>>;
}

/// Deserialize tool arguments into a typed struct
pub fn parse_arguments<T: DeserializeOwned>(arguments: Value) -> AgentResult<T> {
    serde_json::from_value(arguments).map_err(|e| AgentError::InvalidArguments(e.to_string()))
}

/// Resolves tool names to registered capabilities and invokes them
#[derive(Default)]
pub struct ToolRegistry {
    capabilities: Vec<Box<dyn Capability>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability, replacing any previous one with the same name
    pub fn register(&mut self, capability: Box<dyn Capability>) {
        let name = capability.tool().name.clone();
        self.capabilities.retain(|c| c.tool().name != name);
        self.capabilities.push(capability);
    }

    pub fn resolve(&self, name: &str) -> AgentResult<&dyn Capability> {
        self.capabilities
            .iter()
            .find(|c| c.tool().name == name)
            .map(|c| &**c)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))
    }

    /// Tool definitions, limited to `allowed` when an allow-list is given
    pub fn tools(&self, allowed: Option<&[String]>) -> Vec<Tool> {
        self.capabilities
            .iter()
            .map(|c| c.tool())
            .filter(|tool| allowed.map_or(true, |names| names.contains(&tool.name)))
            .cloned()
            .collect()
    }

    /// Resolve `name`, parse its serialized arguments and invoke it
    pub async fn dispatch(&self, name: &str, arguments: &str) -> AgentResult<Option<String>> {
        let capability = self.resolve(name)?;
        let arguments: Value = if arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(arguments).map_err(|e| {
                AgentError::InvalidArguments(format!("arguments for '{}' are not JSON: {}", name, e))
            })?
        };
        debug!(tool = name, "dispatching tool call");
        capability.invoke(arguments).await
    }
}
