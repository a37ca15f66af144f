use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;
use tracing::{debug, info};

use super::{EvalSet, Module};

const PROMPT_ACK: &str = "set prompt done!";
const DEFAULT_PROMPT: &str = "{input}";

/// Request timeout of the HTTP client a [`UrlModule`] builds for itself
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// Boundary to a deployed endpoint
pub trait Transport: Send + Sync {
    /// POST `body` as JSON to `url` and return the response text
    fn post(&self, url: &str, body: &Value) -> anyhow::Result<String>;
}

/// [`Transport`] over plain HTTP
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn post(&self, url: &str, body: &Value) -> anyhow::Result<String> {
        let text = self
            .client
            .post(url)
            .json(body)
            .send()?
            .error_for_status()?
            .text()?;
        Ok(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Prompt {
    template: String,
    response_split: Option<String>,
}

impl Default for Prompt {
    fn default() -> Self {
        Self {
            template: DEFAULT_PROMPT.to_string(),
            response_split: None,
        }
    }
}

#[derive(Debug, Default)]
struct Endpoint {
    url: Option<String>,
    prompt_url: Option<String>,
}

/// Client of a deployed endpoint.
///
/// Clones share the url slot, so a deploy stage holding a clone can publish the
/// endpoint to every other holder once the service is up.
#[derive(Clone)]
pub struct UrlModule {
    name: String,
    endpoint: Arc<RwLock<Endpoint>>,
    prompt: Arc<RwLock<Prompt>>,
    remote_prompt: bool,
    transport: Option<Arc<dyn Transport>>,
    http: Arc<OnceLock<HttpTransport>>,
    evalset: Option<EvalSet>,
}

impl UrlModule {
    /// A client with no url yet; `forward` fails until one is set
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            endpoint: Arc::new(RwLock::new(Endpoint::default())),
            prompt: Arc::new(RwLock::new(Prompt::default())),
            remote_prompt: false,
            transport: None,
            http: Arc::new(OnceLock::new()),
            evalset: None,
        }
    }

    pub fn with_url<U: Into<String>>(self, url: U) -> anyhow::Result<Self> {
        self.set_url(url)?;
        Ok(self)
    }

    /// When set, the remote side owns the prompt: inputs are sent unformatted and
    /// [`UrlModule::prompt`] pushes the template to the remote `/prompt` endpoint.
    pub fn remote_prompt(mut self, remote_prompt: bool) -> Self {
        self.remote_prompt = remote_prompt;
        self
    }

    /// Use `transport` instead of an [`HttpTransport`]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_evalset(mut self, evalset: EvalSet) -> Self {
        self.evalset = Some(evalset);
        self
    }

    pub fn url(&self) -> anyhow::Result<Option<String>> {
        self.endpoint
            .read()
            .map(|endpoint| endpoint.url.clone())
            .map_err(|_| anyhow::anyhow!("endpoint lock poisoned"))
    }

    pub fn set_url<U: Into<String>>(&self, url: U) -> anyhow::Result<()> {
        let url = url.into();
        let mut endpoint = self
            .endpoint
            .write()
            .map_err(|_| anyhow::anyhow!("endpoint lock poisoned"))?;
        info!(module = %self.name, url = %url, "endpoint registered");
        endpoint.prompt_url = Some(prompt_url_for(&url));
        endpoint.url = Some(url);
        Ok(())
    }

    /// Pipeline stage that registers the url produced by the stage before it and
    /// passes it on. A prompt configured before deployment is pushed at this point.
    pub fn url_stage(&self) -> impl Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static {
        let client = self.clone();
        move |url: Value| {
            let Some(text) = url.as_str() else {
                anyhow::bail!("{} expected an endpoint url, got {}", client.name, url);
            };
            client.set_url(text)?;
            let pending = client.current_prompt()?;
            if client.remote_prompt && pending != Prompt::default() {
                client.push_prompt(&pending)?;
            }
            Ok(url)
        }
    }

    /// Set the prompt template and the marker after which the answer starts.
    ///
    /// `{input}` in the template is replaced by the input; object inputs replace
    /// `{key}` for each of their keys.
    pub fn prompt<T: Into<String>>(
        &self,
        template: T,
        response_split: Option<String>,
    ) -> anyhow::Result<&Self> {
        let prompt = Prompt {
            template: template.into(),
            response_split,
        };
        if prompt != self.current_prompt()? {
            self.push_prompt(&prompt)?;
            let mut slot = self
                .prompt
                .write()
                .map_err(|_| anyhow::anyhow!("prompt lock poisoned"))?;
            *slot = prompt;
        }
        Ok(self)
    }

    // The HTTP client is built on first use and shared by clones
    fn transport(&self) -> anyhow::Result<&dyn Transport> {
        if let Some(transport) = &self.transport {
            return Ok(transport.as_ref());
        }
        let http = match self.http.get() {
            Some(http) => http,
            None => {
                let built = HttpTransport::new(DEFAULT_TIMEOUT)?;
                self.http.get_or_init(|| built)
            }
        };
        let http: &dyn Transport = http;
        Ok(http)
    }

    fn current_prompt(&self) -> anyhow::Result<Prompt> {
        self.prompt
            .read()
            .map(|p| p.clone())
            .map_err(|_| anyhow::anyhow!("prompt lock poisoned"))
    }

    fn push_prompt(&self, prompt: &Prompt) -> anyhow::Result<()> {
        if !self.remote_prompt {
            return Ok(());
        }
        let prompt_url = match self.endpoint.read() {
            Ok(endpoint) => endpoint.prompt_url.clone(),
            Err(_) => anyhow::bail!("endpoint lock poisoned"),
        };
        let Some(prompt_url) = prompt_url else {
            return Ok(());
        };
        debug!(module = %self.name, url = %prompt_url, "pushing prompt");
        let reply = self.transport()?.post(
            &prompt_url,
            &json!({"prompt": prompt.template, "response_split": prompt.response_split}),
        )?;
        if reply != PROMPT_ACK {
            anyhow::bail!("{} rejected the prompt: {}", prompt_url, reply);
        }
        Ok(())
    }
}

impl Module for UrlModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, input: Value) -> anyhow::Result<Value> {
        let url = self
            .url()?
            .ok_or_else(|| anyhow::anyhow!("{} has no url, deploy or start it first", self.name))?;

        if self.remote_prompt {
            let body = match input {
                Value::Object(_) => input,
                other => json!({ "input": other }),
            };
            return Ok(Value::String(self.transport()?.post(&url, &body)?));
        }

        let prompt = self.current_prompt()?;
        let text = self
            .transport()?
            .post(&url, &json!({ "input": render(&prompt.template, &input) }))?;
        let answer = match &prompt.response_split {
            Some(split) => text.rsplit(split.as_str()).next().unwrap_or_default().to_string(),
            None => text,
        };
        Ok(Value::String(answer))
    }

    fn evalset(&self) -> Option<&EvalSet> {
        self.evalset.as_ref()
    }
}

impl fmt::Debug for UrlModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlModule")
            .field("name", &self.name)
            .field("url", &self.url().ok().flatten())
            .field("remote_prompt", &self.remote_prompt)
            .finish()
    }
}

// The prompt endpoint sits next to the last `/generate` of the url
fn prompt_url_for(url: &str) -> String {
    match url.rfind("/generate") {
        Some(at) => format!("{}/prompt{}", &url[..at], &url[at + "/generate".len()..]),
        None => url.to_string(),
    }
}

fn render(template: &str, input: &Value) -> String {
    match input {
        Value::Object(fields) => fields.iter().fold(template.to_string(), |text, (key, value)| {
            text.replace(&format!("{{{}}}", key), &as_text(value))
        }),
        other => template.replace("{input}", &as_text(other)),
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
