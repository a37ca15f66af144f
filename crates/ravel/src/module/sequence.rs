use serde_json::Value;
use std::sync::Arc;

use super::{EvalSet, Module, Submodules};
use crate::flow::Pipeline;

/// Children run one after another, each fed the previous child's output
#[derive(Debug)]
pub struct SequenceModule {
    name: String,
    children: Submodules,
    evalset: Option<EvalSet>,
}

impl SequenceModule {
    pub fn new<N: Into<String>>(name: N, modules: Vec<Arc<dyn Module>>) -> Self {
        let mut children = Submodules::new();
        for module in modules {
            children.register(module);
        }
        Self {
            name: name.into(),
            children,
            evalset: None,
        }
    }

    pub fn with_evalset(mut self, evalset: EvalSet) -> Self {
        self.evalset = Some(evalset);
        self
    }

    fn pipeline(&self) -> Pipeline {
        self.children
            .as_slice()
            .iter()
            .fold(Pipeline::new(self.name.clone()), |pipeline, child| {
                let name = child.name().to_string();
                let child = Arc::clone(child);
                pipeline.stage(name, move |input| child.forward(input))
            })
    }
}

impl Module for SequenceModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, input: Value) -> anyhow::Result<Value> {
        Ok(self.pipeline().run(input)?)
    }

    fn submodules(&self) -> &[Arc<dyn Module>] {
        self.children.as_slice()
    }

    fn detach_submodules(&mut self) -> Vec<Arc<dyn Module>> {
        self.children.take()
    }

    fn evalset(&self) -> Option<&EvalSet> {
        self.evalset.as_ref()
    }
}
