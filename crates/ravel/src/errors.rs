use serde::{Deserialize, Serialize};
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Failures raised while running task pipelines
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Pipeline '{pipeline}' failed at stage {index} ('{stage}'): {source}")]
    StageFailed {
        pipeline: String,
        stage: String,
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Task {index} of the batch failed: {source}")]
    TaskFailed {
        index: usize,
        #[source]
        source: Box<TaskError>,
    },

    #[error("Task worker did not complete: {0}")]
    Join(String),
}

pub type TaskResult<T> = Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failure_message_names_stage() {
        let err = TaskError::StageFailed {
            pipeline: "deploy".into(),
            stage: "launch".into(),
            index: 1,
            source: anyhow::anyhow!("port in use"),
        };
        let message = err.to_string();
        assert!(message.contains("deploy"));
        assert!(message.contains("launch"));
        assert!(message.contains("port in use"));
    }
}
