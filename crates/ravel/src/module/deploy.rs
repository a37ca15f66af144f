use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use super::Module;

/// Pre/post processing applied around a served module
pub type Hook = Arc<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>;

/// What a deployment serves
#[derive(Clone)]
pub enum DeployTarget {
    /// Model weights on disk
    Model(PathBuf),
    /// A module served through a relay
    Module(Arc<dyn Module>),
}

impl fmt::Debug for DeployTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployTarget::Model(path) => f.debug_tuple("Model").field(path).finish(),
            DeployTarget::Module(module) => f.debug_tuple("Module").field(&module.name()).finish(),
        }
    }
}

/// A request to expose a target as a reachable service
#[derive(Clone)]
pub struct DeployJob {
    pub target: DeployTarget,
    pub pre: Option<Hook>,
    pub post: Option<Hook>,
}

impl DeployJob {
    pub fn new(target: DeployTarget) -> Self {
        Self {
            target,
            pre: None,
            post: None,
        }
    }

    pub fn with_hooks(mut self, pre: Option<Hook>, post: Option<Hook>) -> Self {
        self.pre = pre;
        self.post = post;
        self
    }

    /// Answer one request the way a relay serving a module target does:
    /// `pre`, then the module, then `post`.
    pub fn serve(&self, input: Value) -> anyhow::Result<Value> {
        let DeployTarget::Module(module) = &self.target else {
            anyhow::bail!("only module targets can be served in-process");
        };
        let input = match &self.pre {
            Some(pre) => pre(input)?,
            None => input,
        };
        let output = module.forward(input)?;
        match &self.post {
            Some(post) => post(output),
            None => Ok(output),
        }
    }
}

impl fmt::Debug for DeployJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployJob")
            .field("target", &self.target)
            .field("pre", &self.pre.is_some())
            .field("post", &self.post.is_some())
            .finish()
    }
}

/// Launches deployments and reports where they can be reached
pub trait Deployer: Send + Sync {
    /// Start serving `job` and return its endpoint url
    fn launch(&self, job: DeployJob) -> anyhow::Result<String>;
}

impl<F> Deployer for F
where
    F: Fn(DeployJob) -> anyhow::Result<String> + Send + Sync,
{
    fn launch(&self, job: DeployJob) -> anyhow::Result<String> {
        self(job)
    }
}
