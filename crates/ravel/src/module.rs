//! Composable processing units and the collection of their setup work.
//!
//! Modules form a tree through explicitly registered [`Submodules`]. Each module may
//! contribute one [`Pipeline`] per phase (train, deploy, eval); [`collect_tasks`] walks
//! the tree children-first and [`update`] runs what it collected.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use strum_macros::Display;
use tracing::{debug, info};

use crate::errors::TaskResult;
use crate::flow::{run_parallel, spawn_parallel, BatchHandle, Pipeline};

pub mod action;
pub mod deploy;
pub mod sequence;
pub mod server;
pub mod trainable;
pub mod url;

pub use action::ActionModule;
pub use deploy::{DeployJob, DeployTarget, Deployer, Hook};
pub use sequence::SequenceModule;
pub use server::ServerModule;
pub use trainable::{TrainJob, TrainMode, Trainer, TrainableModule};
pub use url::{HttpTransport, Transport, UrlModule};

/// A processing unit of the composition tree
pub trait Module: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Process one input
    fn forward(&self, input: Value) -> anyhow::Result<Value>;

    /// Child modules, in registration order
    fn submodules(&self) -> &[Arc<dyn Module>] {
        &[]
    }

    fn evalset(&self) -> Option<&EvalSet> {
        None
    }

    /// Give up the children so a dropped tree is torn down without recursion.
    /// Modules that keep their children in [`Submodules`] return [`Submodules::take`].
    fn detach_submodules(&mut self) -> Vec<Arc<dyn Module>> {
        Vec::new()
    }

    fn train_task(self: Arc<Self>) -> Option<Pipeline> {
        None
    }

    fn deploy_task(self: Arc<Self>) -> Option<Pipeline> {
        None
    }

    /// Runs `forward` over the attached evalset, when there is one
    fn eval_task(self: Arc<Self>) -> Option<Pipeline> {
        let evalset = self.evalset()?.clone();
        let name = format!("{}-eval", self.name());
        Some(evalset.pipeline(name, move |input| self.forward(input)))
    }
}

/// Explicit child membership of a module
#[derive(Clone, Default)]
pub struct Submodules {
    modules: Vec<Arc<dyn Module>>,
}

impl Submodules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `module` as a child and hand it back for the parent's own use
    pub fn register(&mut self, module: Arc<dyn Module>) -> Arc<dyn Module> {
        self.modules.push(Arc::clone(&module));
        module
    }

    pub fn as_slice(&self) -> &[Arc<dyn Module>] {
        &self.modules
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Remove and return every child
    pub fn take(&mut self) -> Vec<Arc<dyn Module>> {
        std::mem::take(&mut self.modules)
    }
}

// Children that are only owned here are emptied before they are released, so each
// drop is shallow and depth never reaches the call stack.
impl Drop for Submodules {
    fn drop(&mut self) {
        let mut pending = self.take();
        while let Some(mut module) = pending.pop() {
            if let Some(owned) = Arc::get_mut(&mut module) {
                pending.extend(owned.detach_submodules());
            }
        }
    }
}

impl fmt::Debug for Submodules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.modules.iter().map(|m| m.name()))
            .finish()
    }
}

type CollectFn = Arc<dyn Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync>;

/// Evaluation inputs attached to a module, with the collected result once evaluated
#[derive(Clone)]
pub struct EvalSet {
    inputs: Arc<Vec<Value>>,
    collect: CollectFn,
    result: Arc<Mutex<Option<Value>>>,
}

impl EvalSet {
    /// Outputs are collected into a JSON array unless [`EvalSet::with_collect`] says otherwise
    pub fn new(inputs: Vec<Value>) -> Self {
        Self {
            inputs: Arc::new(inputs),
            collect: Arc::new(|outputs| Ok(Value::Array(outputs))),
            result: Arc::new(Mutex::new(None)),
        }
    }

    /// Read the inputs from a file with a caller-supplied parser
    pub fn load<F>(path: &Path, parse: F) -> anyhow::Result<Self>
    where
        F: FnOnce(&str) -> anyhow::Result<Vec<Value>>,
    {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::new(parse(&text)?))
    }

    pub fn with_collect<F>(mut self, collect: F) -> Self
    where
        F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.collect = Arc::new(collect);
        self
    }

    pub fn inputs(&self) -> &[Value] {
        &self.inputs
    }

    /// The collected result of the last evaluation
    pub fn result(&self) -> anyhow::Result<Option<Value>> {
        self.result
            .lock()
            .map(|result| result.clone())
            .map_err(|_| anyhow::anyhow!("evaluation result lock poisoned"))
    }

    fn pipeline<F>(&self, name: String, forward: F) -> Pipeline
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let inputs = Arc::clone(&self.inputs);
        let collect = Arc::clone(&self.collect);
        let result = Arc::clone(&self.result);

        Pipeline::new(name)
            .stage("forward", move |_| {
                let outputs = inputs
                    .iter()
                    .map(|input| forward(input.clone()))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Ok(Value::Array(outputs))
            })
            .stage("collect", move |outputs| match outputs {
                Value::Array(outputs) => collect(outputs),
                other => collect(vec![other]),
            })
            .stage("store", move |value| {
                let mut slot = result
                    .lock()
                    .map_err(|_| anyhow::anyhow!("evaluation result lock poisoned"))?;
                *slot = Some(value.clone());
                Ok(value)
            })
    }
}

impl fmt::Debug for EvalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalSet")
            .field("inputs", &self.inputs.len())
            .finish()
    }
}

/// Setup work gathered from a module tree, children before parents
#[derive(Debug, Default)]
pub struct TaskGraph {
    pub train: Vec<Pipeline>,
    pub deploy: Vec<Pipeline>,
    pub eval: Vec<Pipeline>,
}

impl TaskGraph {
    fn absorb(&mut self, module: Arc<dyn Module>) {
        debug!(module = module.name(), "collecting tasks");
        self.train.extend(Arc::clone(&module).train_task());
        self.deploy.extend(Arc::clone(&module).deploy_task());
        self.eval.extend(module.eval_task());
    }
}

/// Gather the tasks of `root` and, when `recursive`, of all its descendants.
///
/// Every module is asked for its tasks only after all of its children (and theirs)
/// have been. The walk keeps its own stack, so tree depth is not bounded by the
/// thread's call stack.
pub fn collect_tasks(root: &Arc<dyn Module>, recursive: bool) -> TaskGraph {
    let mut graph = TaskGraph::default();
    let children = |module: &Arc<dyn Module>| module.submodules().to_vec().into_iter();

    let root_children = if recursive {
        children(root)
    } else {
        Vec::new().into_iter()
    };
    let mut stack = vec![(Arc::clone(root), root_children)];

    loop {
        let next = match stack.last_mut() {
            Some((_, pending)) => pending.next(),
            None => break,
        };
        match next {
            Some(child) => {
                let pending = children(&child);
                stack.push((child, pending));
            }
            None => {
                if let Some((module, _)) = stack.pop() {
                    graph.absorb(module);
                }
            }
        }
    }
    graph
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UpdateMode {
    /// Train, deploy, then evaluate
    #[default]
    Train,
    /// Deploy only
    Server,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOptions {
    #[serde(default)]
    pub mode: UpdateMode,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            mode: UpdateMode::default(),
            recursive: default_recursive(),
        }
    }
}

fn default_recursive() -> bool {
    true
}

/// What an update ran
#[derive(Debug, Default)]
pub struct UpdateReport {
    /// Outputs of the train pipelines, in collection order
    pub trained: Vec<Value>,
    /// Outputs of the eval pipelines, in collection order
    pub evaluated: Vec<Value>,
    /// The deploy batch, when it was launched and not already awaited
    pub deploy: Option<BatchHandle>,
}

/// Train, deploy and evaluate the tree under `root` according to `options`.
///
/// Training is one parallel batch that must finish before anything else starts.
/// Deployment is launched in the background; it is only awaited here when evaluation
/// follows, since evaluation talks to the deployed endpoints.
pub async fn update(root: &Arc<dyn Module>, options: &UpdateOptions) -> TaskResult<UpdateReport> {
    let graph = collect_tasks(root, options.recursive);
    info!(
        module = root.name(),
        mode = %options.mode,
        train = graph.train.len(),
        deploy = graph.deploy.len(),
        eval = graph.eval.len(),
        "updating module tree"
    );

    let mut report = UpdateReport::default();
    let train_mode = options.mode == UpdateMode::Train;

    if train_mode && !graph.train.is_empty() {
        report.trained = run_parallel(graph.train).await?;
    }

    let mut deploy = if graph.deploy.is_empty() {
        None
    } else {
        Some(spawn_parallel(graph.deploy))
    };

    if train_mode && !graph.eval.is_empty() {
        if let Some(batch) = deploy.take() {
            batch.wait().await?;
        }
        report.evaluated = run_parallel(graph.eval).await?;
    }

    report.deploy = deploy;
    Ok(report)
}

/// Deploy `root`, and its descendants when `recursive`, without training or evaluating
pub async fn update_server(root: &Arc<dyn Module>, recursive: bool) -> TaskResult<UpdateReport> {
    update(
        root,
        &UpdateOptions {
            mode: UpdateMode::Server,
            recursive,
        },
    )
    .await
}

/// Deploy the whole tree without training or evaluating it
pub async fn start(root: &Arc<dyn Module>) -> TaskResult<UpdateReport> {
    update_server(root, true).await
}

pub async fn restart(root: &Arc<dyn Module>) -> TaskResult<UpdateReport> {
    start(root).await
}
