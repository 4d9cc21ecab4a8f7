//! Long-lived named workers on the management endpoint.
//!
//! Unlike [`crate::SandboxLoader`], these calls return errors: any
//! non-success status, 404 included, comes back as
//! [`SandboxError::WorkerApi`] with the endpoint's status and body.

use reqwest::{Client, RequestBuilder};
use url::Url;
use serde_json::{json, Map, Value};

use crate::capability::generate_capability_source;
use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::types::{BindingMap, HostRequest, HostResponse, WorkerParams};
use crate::validate::Validator;
use crate::wrap::{wrap_module_blocking, WrapOptions};
use crate::Result;

/// Definition of a named worker
#[derive(Debug, Clone, Default)]
pub struct WorkerDefinition {
    pub id: String,
    pub script: String,
    pub module: Option<String>,
    pub capture_console: Option<bool>,
    pub env: Map<String, Value>,
    pub bindings: BindingMap,
}

impl WorkerDefinition {
    pub fn new(id: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            script: script.into(),
            ..Default::default()
        }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Client for the named-host management endpoint
#[derive(Debug, Clone)]
pub struct WorkersClient {
    client: Client,
    base_url: String,
    validator: Validator,
    compatibility_date: String,
    capture_console: bool,
}

impl WorkersClient {
    pub fn new(config: &SandboxConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: &SandboxConfig) -> Self {
        Self {
            client,
            base_url: config.workers_api_url.trim_end_matches('/').to_string(),
            validator: Validator::new(config.limits),
            compatibility_date: config.compatibility_date.clone(),
            capture_console: config.capture_console,
        }
    }

    /// `<base>/workers[/<id>]`, with the id as one encoded path segment
    fn url(&self, id: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            SandboxError::Config(format!("Invalid workers API URL '{}': {}", self.base_url, e))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                SandboxError::Config(format!("Workers API URL '{}' cannot hold a path", self.base_url))
            })?;
            segments.pop_if_empty().push("workers");
            if let Some(id) = id {
                if matches!(id, "" | "." | "..") {
                    return Err(SandboxError::Config(format!("Invalid worker id '{}'", id)));
                }
                segments.push(id);
            }
        }
        Ok(url)
    }

    /// Wrap the definition's code and register it under its id
    pub async fn create_worker(&self, definition: WorkerDefinition) -> Result<Value> {
        if definition.id.trim().is_empty() {
            return Err(SandboxError::Config("Worker id cannot be empty".to_string()));
        }

        let options = WrapOptions::default()
            .with_capture_console(definition.capture_console.unwrap_or(self.capture_console))
            .with_capability_source(generate_capability_source(&definition.bindings))
            .with_hidden_bindings(definition.bindings.keys().cloned());
        let wrapped = wrap_module_blocking(
            self.validator.clone(),
            definition.script,
            definition.module,
            options,
        )
        .await?;

        let mut params = WorkerParams::single_module(&self.compatibility_date, wrapped.into_source());
        params.env = definition.env;
        params.bindings = definition.bindings;

        let mut params_json = serde_json::to_value(&params)?;
        params_json["bindings"] = Value::Object(params.binding_descriptors());

        tracing::info!(worker_id = %definition.id, "Creating worker");
        let body = json!({ "id": definition.id, "params": params_json });
        self.send_json(self.client.post(self.url(None)?).json(&body)).await
    }

    pub async fn get_worker(&self, id: &str) -> Result<Value> {
        self.send_json(self.client.get(self.url(Some(id))?)).await
    }

    pub async fn delete_worker(&self, id: &str) -> Result<Value> {
        tracing::info!(worker_id = %id, "Deleting worker");
        self.send_json(self.client.delete(self.url(Some(id))?)).await
    }

    pub async fn list_workers(&self) -> Result<Value> {
        self.send_json(self.client.get(self.url(None)?)).await
    }

    /// Forward `request`'s headers and body to the named worker
    pub async fn execute_worker(&self, id: &str, request: HostRequest) -> Result<HostResponse> {
        let mut builder = self.client.post(self.url(Some(id))?);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = self.send(builder).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HostResponse::new(status, body))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response> {
        let response = builder.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status, body = %body, "Workers API request failed");
        Err(SandboxError::WorkerApi { status, body })
    }

    async fn send_json(&self, builder: RequestBuilder) -> Result<Value> {
        let response = self.send(builder).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}
