use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::{EvalSet, Module, Submodules};
use crate::flow::{Pipeline, StageFn};

/// A module whose forward pass is an arbitrary callable
pub struct ActionModule {
    name: String,
    action: StageFn,
    uses: Submodules,
    evalset: Option<EvalSet>,
}

impl ActionModule {
    pub fn new<N, F>(name: N, action: F) -> Self
    where
        N: Into<String>,
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            action: Arc::new(action),
            uses: Submodules::new(),
            evalset: None,
        }
    }

    /// Run a whole pipeline as the forward pass
    pub fn from_pipeline(pipeline: Pipeline) -> Self {
        let name = pipeline.name().to_string();
        Self::new(name, move |input| Ok(pipeline.run(input)?))
    }

    /// Register a module the action calls, so its setup work is collected with this one
    pub fn uses(mut self, module: Arc<dyn Module>) -> Self {
        self.uses.register(module);
        self
    }

    pub fn with_evalset(mut self, evalset: EvalSet) -> Self {
        self.evalset = Some(evalset);
        self
    }
}

impl Module for ActionModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, input: Value) -> anyhow::Result<Value> {
        (self.action)(input)
    }

    fn submodules(&self) -> &[Arc<dyn Module>] {
        self.uses.as_slice()
    }

    fn detach_submodules(&mut self) -> Vec<Arc<dyn Module>> {
        self.uses.take()
    }

    fn evalset(&self) -> Option<&EvalSet> {
        self.evalset.as_ref()
    }
}

impl fmt::Debug for ActionModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionModule")
            .field("name", &self.name)
            .field("uses", &self.uses)
            .finish()
    }
}
