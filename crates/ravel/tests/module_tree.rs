use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ravel::module::{
    collect_tasks, start, update, ActionModule, DeployJob, DeployTarget, Deployer, EvalSet,
    Module, SequenceModule, ServerModule, TrainJob, TrainMode, TrainableModule, Transport,
    UpdateOptions,
};

/// In-memory stand-in for the machines services get deployed to
#[derive(Clone, Default)]
struct Cluster {
    services: Arc<Mutex<HashMap<String, DeployJob>>>,
    next_port: Arc<AtomicUsize>,
}

impl Cluster {
    fn deployer(&self) -> impl Deployer + 'static {
        let cluster = self.clone();
        move |job: DeployJob| -> anyhow::Result<String> {
            let port = 8000 + cluster.next_port.fetch_add(1, Ordering::SeqCst);
            let url = format!("http://127.0.0.1:{port}/generate");
            cluster
                .services
                .lock()
                .map_err(|_| anyhow::anyhow!("cluster lock poisoned"))?
                .insert(url.clone(), job);
            Ok(url)
        }
    }

    fn deployed(&self) -> usize {
        self.services.lock().map(|s| s.len()).unwrap_or_default()
    }
}

impl Transport for Cluster {
    fn post(&self, url: &str, body: &Value) -> anyhow::Result<String> {
        if url.ends_with("/prompt") {
            return Ok("set prompt done!".to_string());
        }
        let job = self
            .services
            .lock()
            .map_err(|_| anyhow::anyhow!("cluster lock poisoned"))?
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("nothing listens on {url}"))?;

        let input = body["input"].clone();
        let output = match &job.target {
            DeployTarget::Module(_) => job.serve(input)?,
            DeployTarget::Model(path) => {
                let input = match &job.pre {
                    Some(pre) => pre(input)?,
                    None => input,
                };
                let text = format!("{}: {}", path.display(), input.as_str().unwrap_or_default());
                match &job.post {
                    Some(post) => post(json!(text))?,
                    None => json!(text),
                }
            }
        };
        Ok(output.as_str().unwrap_or_default().to_string())
    }
}

struct App {
    root: Arc<dyn Module>,
    server: Arc<ServerModule>,
    model: Arc<TrainableModule>,
    trained: Arc<AtomicUsize>,
    evalset: EvalSet,
}

fn app(cluster: &Cluster) -> App {
    let transport: Arc<dyn Transport> = Arc::new(cluster.clone());
    let trained = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&trained);

    let upper: Arc<dyn Module> = Arc::new(ActionModule::new("upper", |v: Value| {
        Ok(json!(v.as_str().unwrap_or_default().to_uppercase()))
    }));
    let server = Arc::new(
        ServerModule::new("upper-server", upper, cluster.deployer())
            .with_transport(Arc::clone(&transport)),
    );
    let model = Arc::new(
        TrainableModule::new("llama", "/models/llama")
            .trainset(json!(["hello", "world"]))
            .finetune(move |job: TrainJob| -> anyhow::Result<Value> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!(job.target_path))
            })
            .mode(TrainMode::Finetune)
            .post_func(|v: Value| Ok(json!(format!("{}!", v.as_str().unwrap_or_default()))))
            .deploy(cluster.deployer())
            .with_transport(transport),
    );

    let evalset = EvalSet::new(vec![json!("hello")]);
    let children: Vec<Arc<dyn Module>> = vec![
        Arc::clone(&server) as Arc<dyn Module>,
        Arc::clone(&model) as Arc<dyn Module>,
    ];
    let root: Arc<dyn Module> =
        Arc::new(SequenceModule::new("app", children).with_evalset(evalset.clone()));

    App {
        root,
        server,
        model,
        trained,
        evalset,
    }
}

#[test]
fn test_tree_collects_children_first() {
    let cluster = Cluster::default();
    let app = app(&cluster);

    let graph = collect_tasks(&app.root, true);

    let deploy: Vec<_> = graph.deploy.iter().map(|p| p.name()).collect();
    assert_eq!(deploy, vec!["upper-server-deploy", "llama-deploy"]);
    let train: Vec<_> = graph.train.iter().map(|p| p.name()).collect();
    assert_eq!(train, vec!["llama-finetune"]);
    let eval: Vec<_> = graph.eval.iter().map(|p| p.name()).collect();
    assert_eq!(eval, vec!["app-eval"]);
}

#[tokio::test]
async fn test_update_trains_deploys_then_evaluates() -> anyhow::Result<()> {
    let cluster = Cluster::default();
    let app = app(&cluster);

    let report = update(&app.root, &UpdateOptions::default()).await?;

    assert_eq!(report.trained, vec![json!("/models/llama/finetune")]);
    assert!(report.deploy.is_none());
    assert_eq!(cluster.deployed(), 2);
    assert!(app.server.client().url()?.is_some());
    assert!(app.model.client().url()?.is_some());

    let expected = json!(["/models/llama: HELLO!"]);
    assert_eq!(report.evaluated, vec![expected.clone()]);
    assert_eq!(app.evalset.result()?, Some(expected));
    Ok(())
}

#[tokio::test]
async fn test_start_only_deploys() -> anyhow::Result<()> {
    let cluster = Cluster::default();
    let app = app(&cluster);

    let report = start(&app.root).await?;
    let urls = report.deploy.expect("deploy batch").wait().await?;

    assert_eq!(urls.len(), 2);
    assert_eq!(app.trained.load(Ordering::SeqCst), 0);
    assert!(report.evaluated.is_empty());
    assert_eq!(app.root.forward(json!("hi"))?, json!("/models/llama: HI!"));
    Ok(())
}

#[test]
fn test_forward_before_deploy_fails() {
    let cluster = Cluster::default();
    let app = app(&cluster);

    let err = app.root.forward(json!("hi")).unwrap_err();

    assert!(err.to_string().contains("upper-server"));
}
