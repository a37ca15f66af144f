use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use strum_macros::{Display, EnumString};
use tracing::debug;

use super::deploy::{DeployJob, DeployTarget, Deployer, Hook};
use super::url::{Transport, UrlModule};
use super::{EvalSet, Module};
use crate::flow::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TrainMode {
    /// Train from scratch
    Train,
    /// Fine-tune the base model
    Finetune,
}

/// One training run. Results are written under `target_path`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainJob {
    pub base_model: String,
    pub target_path: PathBuf,
    pub trainset: Value,
}

/// Runs a training job and reports what it produced
pub trait Trainer: Send + Sync {
    fn train(&self, job: TrainJob) -> anyhow::Result<Value>;
}

impl<F> Trainer for F
where
    F: Fn(TrainJob) -> anyhow::Result<Value> + Send + Sync,
{
    fn train(&self, job: TrainJob) -> anyhow::Result<Value> {
        self(job)
    }
}

/// Training and deployment settings of a [`TrainableModule`]
#[derive(Clone, Default)]
pub struct TrainableOptions {
    pub trainset: Option<Value>,
    pub train_fn: Option<Arc<dyn Trainer>>,
    pub finetune_fn: Option<Arc<dyn Trainer>>,
    pub deploy_fn: Option<Arc<dyn Deployer>>,
    pub pre_func: Option<Hook>,
    pub post_func: Option<Hook>,
    pub mode: Option<TrainMode>,
}

impl fmt::Debug for TrainableOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainableOptions")
            .field("trainset", &self.trainset)
            .field("train_fn", &self.train_fn.is_some())
            .field("finetune_fn", &self.finetune_fn.is_some())
            .field("deploy_fn", &self.deploy_fn.is_some())
            .field("pre_func", &self.pre_func.is_some())
            .field("post_func", &self.post_func.is_some())
            .field("mode", &self.mode)
            .finish()
    }
}

/// A model that can be trained or fine-tuned, deployed, then queried over its endpoint
#[derive(Debug)]
pub struct TrainableModule {
    base_model: String,
    target_path: PathBuf,
    options: TrainableOptions,
    client: UrlModule,
}

impl TrainableModule {
    pub fn new<B, P>(base_model: B, target_path: P) -> Self
    where
        B: Into<String>,
        P: Into<PathBuf>,
    {
        let base_model = base_model.into();
        Self {
            client: UrlModule::new(base_model.clone()).remote_prompt(true),
            base_model,
            target_path: target_path.into(),
            options: TrainableOptions::default(),
        }
    }

    pub fn trainset(mut self, trainset: Value) -> Self {
        self.options.trainset = Some(trainset);
        self
    }

    pub fn train<T: Trainer + 'static>(mut self, trainer: T) -> Self {
        self.options.train_fn = Some(Arc::new(trainer));
        self
    }

    pub fn finetune<T: Trainer + 'static>(mut self, trainer: T) -> Self {
        self.options.finetune_fn = Some(Arc::new(trainer));
        self
    }

    pub fn deploy<D: Deployer + 'static>(mut self, deployer: D) -> Self {
        self.options.deploy_fn = Some(Arc::new(deployer));
        self
    }

    pub fn pre_func<F>(mut self, pre: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.options.pre_func = Some(Arc::new(pre));
        self
    }

    pub fn post_func<F>(mut self, post: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.options.post_func = Some(Arc::new(post));
        self
    }

    pub fn mode(mut self, mode: TrainMode) -> Self {
        self.options.mode = Some(mode);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.client = self.client.with_transport(transport);
        self
    }

    pub fn with_evalset(mut self, evalset: EvalSet) -> Self {
        self.client = self.client.with_evalset(evalset);
        self
    }

    pub fn options(&self) -> &TrainableOptions {
        &self.options
    }

    pub fn client(&self) -> &UrlModule {
        &self.client
    }
}

impl Module for TrainableModule {
    fn name(&self) -> &str {
        &self.base_model
    }

    fn forward(&self, input: Value) -> anyhow::Result<Value> {
        self.client.forward(input)
    }

    fn evalset(&self) -> Option<&EvalSet> {
        self.client.evalset()
    }

    fn train_task(self: Arc<Self>) -> Option<Pipeline> {
        let Some(mode) = self.options.mode else {
            debug!(module = %self.base_model, "no train mode set, nothing to train");
            return None;
        };
        let trainer = match mode {
            TrainMode::Train => self.options.train_fn.clone(),
            TrainMode::Finetune => self.options.finetune_fn.clone(),
        };
        let trainset = self.options.trainset.clone().unwrap_or_default();
        let base_model = self.base_model.clone();
        let target_path = self.target_path.join(mode.to_string());

        Some(
            Pipeline::new(format!("{}-{}", self.base_model, mode))
                .stage("trainset", move |_| Ok(trainset.clone()))
                .stage(mode.to_string(), move |trainset| {
                    let trainer = trainer.as_ref().ok_or_else(|| {
                        anyhow::anyhow!("no {} function configured for {}", mode, base_model)
                    })?;
                    trainer.train(TrainJob {
                        base_model: base_model.clone(),
                        target_path: target_path.clone(),
                        trainset,
                    })
                }),
        )
    }

    fn deploy_task(self: Arc<Self>) -> Option<Pipeline> {
        let deployer = self.options.deploy_fn.clone()?;
        let target_path = self.target_path.clone();
        let pre = self.options.pre_func.clone();
        let post = self.options.post_func.clone();

        Some(
            Pipeline::new(format!("{}-deploy", self.base_model))
                .stage("target", move |_| {
                    Ok(Value::String(target_path.to_string_lossy().into_owned()))
                })
                .stage("launch", move |path| {
                    let path = path
                        .as_str()
                        .ok_or_else(|| anyhow::anyhow!("model path must be a string"))?;
                    let job = DeployJob::new(DeployTarget::Model(PathBuf::from(path)))
                        .with_hooks(pre.clone(), post.clone());
                    Ok(Value::String(deployer.launch(job)?))
                })
                .stage("register", self.client.url_stage()),
        )
    }
}
