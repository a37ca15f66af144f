//! Pipelines of setup work and the executor that runs them.
//!
//! A [`Pipeline`] is a linear recipe: each stage receives the output of the stage
//! before it. [`run_parallel`] runs a batch of pipelines on independent blocking
//! workers and waits for every one of them to settle before reporting.
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::errors::{TaskError, TaskResult};

pub type StageFn = Arc<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>;

/// One named step of a pipeline
#[derive(Clone)]
pub struct Stage {
    name: String,
    run: StageFn,
}

impl Stage {
    pub fn new<N, F>(name: N, run: F) -> Self
    where
        N: Into<String>,
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(run),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish()
    }
}

/// An ordered sequence of stages run strictly one after another
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Append a stage
    pub fn stage<N, F>(mut self, name: N, run: F) -> Self
    where
        N: Into<String>,
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.stages.push(Stage::new(name, run));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Feed `input` through every stage. The first failing stage stops the pipeline.
    pub fn run(&self, input: Value) -> TaskResult<Value> {
        let mut value = input;
        for (index, stage) in self.stages.iter().enumerate() {
            debug!(pipeline = %self.name, stage = %stage.name, index, "running stage");
            value = (stage.run)(value).map_err(|source| TaskError::StageFailed {
                pipeline: self.name.clone(),
                stage: stage.name.clone(),
                index,
                source,
            })?;
        }
        Ok(value)
    }
}

/// Run one pipeline on a blocking worker, feeding `input` to its first stage
pub async fn run_pipeline(pipeline: Pipeline, input: Value) -> TaskResult<Value> {
    tokio::task::spawn_blocking(move || pipeline.run(input))
        .await
        .map_err(|e| TaskError::Join(e.to_string()))?
}

/// Run every pipeline concurrently on its own worker and wait for all of them.
///
/// Siblings of a failed pipeline are left to finish; the first failure to complete is
/// the one reported. On success the outputs are returned in task order.
pub async fn run_parallel(tasks: Vec<Pipeline>) -> TaskResult<Vec<Value>> {
    let total = tasks.len();
    info!(tasks = total, "starting parallel batch");

    let mut in_flight: FuturesUnordered<_> = tasks
        .into_iter()
        .enumerate()
        .map(|(index, pipeline)| {
            let handle = tokio::task::spawn_blocking(move || pipeline.run(Value::Null));
            async move { (index, handle.await) }
        })
        .collect();

    let mut outputs: Vec<Option<Value>> = vec![None; total];
    let mut first_failure: Option<TaskError> = None;

    while let Some((index, joined)) = in_flight.next().await {
        let result = joined
            .map_err(|e| TaskError::Join(e.to_string()))
            .and_then(|result| result);
        match result {
            Ok(value) => outputs[index] = Some(value),
            Err(err) => {
                error!(task = index, error = %err, "task failed");
                if first_failure.is_none() {
                    first_failure = Some(TaskError::TaskFailed {
                        index,
                        source: Box::new(err),
                    });
                }
            }
        }
    }

    if let Some(err) = first_failure {
        return Err(err);
    }
    info!(tasks = total, "parallel batch finished");
    Ok(outputs.into_iter().map(Option::unwrap_or_default).collect())
}

/// A batch launched without waiting for it
#[derive(Debug)]
pub struct BatchHandle {
    handle: JoinHandle<TaskResult<Vec<Value>>>,
}

impl BatchHandle {
    /// Wait for every pipeline of the batch to settle
    pub async fn wait(self) -> TaskResult<Vec<Value>> {
        self.handle
            .await
            .map_err(|e| TaskError::Join(e.to_string()))?
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Launch a parallel batch in the background. Dropping the handle detaches the batch.
pub fn spawn_parallel(tasks: Vec<Pipeline>) -> BatchHandle {
    BatchHandle {
        handle: tokio::spawn(run_parallel(tasks)),
    }
}
