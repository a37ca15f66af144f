use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::deploy::{DeployJob, DeployTarget, Deployer, Hook};
use super::url::{Transport, UrlModule};
use super::{EvalSet, Module, Submodules};
use crate::flow::Pipeline;

/// Serves a module behind a relay and forwards inputs to it over the endpoint
pub struct ServerModule {
    client: UrlModule,
    served: Submodules,
    deployer: Arc<dyn Deployer>,
    pre: Option<Hook>,
    post: Option<Hook>,
}

impl ServerModule {
    pub fn new<N, D>(name: N, module: Arc<dyn Module>, deployer: D) -> Self
    where
        N: Into<String>,
        D: Deployer + 'static,
    {
        let mut served = Submodules::new();
        served.register(module);
        Self {
            client: UrlModule::new(name).remote_prompt(true),
            served,
            deployer: Arc::new(deployer),
            pre: None,
            post: None,
        }
    }

    /// Applied by the relay to every request before the module sees it
    pub fn pre<F>(mut self, pre: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.pre = Some(Arc::new(pre));
        self
    }

    /// Applied by the relay to every module output before it is returned
    pub fn post<F>(mut self, post: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.post = Some(Arc::new(post));
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

    /// The endpoint client, usable once deployment registered a url
    pub fn client(&self) -> &UrlModule {
        &self.client
    }
}

impl Module for ServerModule {
    fn name(&self) -> &str {
        self.client.name()
    }

    fn forward(&self, input: Value) -> anyhow::Result<Value> {
        self.client.forward(input)
    }

    fn submodules(&self) -> &[Arc<dyn Module>] {
        self.served.as_slice()
    }

    fn detach_submodules(&mut self) -> Vec<Arc<dyn Module>> {
        self.served.take()
    }

    fn evalset(&self) -> Option<&EvalSet> {
        self.client.evalset()
    }

    fn deploy_task(self: Arc<Self>) -> Option<Pipeline> {
        let module = Arc::clone(self.served.as_slice().first()?);
        let job = DeployJob::new(DeployTarget::Module(module))
            .with_hooks(self.pre.clone(), self.post.clone());
        let deployer = Arc::clone(&self.deployer);

        Some(
            Pipeline::new(format!("{}-deploy", self.name()))
                .stage("launch", move |_| Ok(Value::String(deployer.launch(job.clone())?)))
                .stage("register", self.client.url_stage()),
        )
    }
}

impl fmt::Debug for ServerModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerModule")
            .field("client", &self.client)
            .field("served", &self.served)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{collect_tasks, ActionModule};
    use serde_json::json;
    use std::sync::Mutex;

    // Answers every POST by serving the recorded job in-process
    struct LoopbackTransport {
        job: Arc<Mutex<Option<DeployJob>>>,
    }

    impl Transport for LoopbackTransport {
        fn post(&self, _url: &str, body: &Value) -> anyhow::Result<String> {
            let guard = self.job.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
            let job = guard.as_ref().ok_or_else(|| anyhow::anyhow!("not deployed"))?;
            let output = job.serve(body["input"].clone())?;
            Ok(output.as_str().unwrap_or_default().to_string())
        }
    }

    fn shout() -> Arc<dyn Module> {
        Arc::new(ActionModule::new("shout", |v: Value| {
            Ok(json!(v.as_str().unwrap_or_default().to_uppercase()))
        }))
    }

    #[test]
    fn test_deploy_task_launches_relay_and_registers_url() -> anyhow::Result<()> {
        let launched = Arc::new(Mutex::new(None));
        let record = Arc::clone(&launched);
        let server = Arc::new(
            ServerModule::new(
                "shout-server",
                shout(),
                move |job: DeployJob| -> anyhow::Result<String> {
                    *record.lock().map_err(|_| anyhow::anyhow!("poisoned"))? = Some(job);
                    Ok("http://relay:8000/generate".to_string())
                },
            )
            .post(|v: Value| Ok(json!(format!("{}!", v.as_str().unwrap_or_default()))))
            .with_transport(Arc::new(LoopbackTransport {
                job: Arc::clone(&launched),
            })),
        );

        assert!(server.forward(json!("hi")).is_err());

        let deploy = Arc::clone(&server).deploy_task().expect("deploy task");
        deploy.run(Value::Null)?;

        assert_eq!(server.client().url()?.as_deref(), Some("http://relay:8000/generate"));
        assert_eq!(server.forward(json!("hi"))?, json!("HI!"));
        Ok(())
    }

    #[test]
    fn test_served_module_is_a_submodule() {
        let root: Arc<dyn Module> = Arc::new(ServerModule::new(
            "srv",
            shout(),
            |_: DeployJob| -> anyhow::Result<String> { Ok("http://x/generate".to_string()) },
        ));

        let graph = collect_tasks(&root, true);

        assert_eq!(root.submodules()[0].name(), "shout");
        assert_eq!(graph.deploy.len(), 1);
    }

    #[test]
    fn test_launch_failure_fails_the_pipeline() -> anyhow::Result<()> {
        let server = Arc::new(ServerModule::new(
            "srv",
            shout(),
            |_: DeployJob| -> anyhow::Result<String> { anyhow::bail!("port in use") },
        ));

        let err = Arc::clone(&server)
            .deploy_task()
            .expect("deploy task")
            .run(Value::Null)
            .unwrap_err();

        assert!(err.to_string().contains("launch"));
        assert!(server.client().url()?.is_none());
        Ok(())
    }
}
