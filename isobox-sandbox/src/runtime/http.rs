//! Remote execution hosts and service bindings over HTTP

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::json;
use url::Url;

use super::{Fetcher, WorkerLoader, WorkerStub};
use crate::error::SandboxError;
use crate::execution::ExecutionId;
use crate::types::{Capability, HostRequest, HostResponse, WorkerParams};
use crate::Result;

fn parse_method(method: &str) -> Result<Method> {
    Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|_| SandboxError::Runtime(format!("Unsupported HTTP method: {}", method)))
}

async fn into_host_response(response: reqwest::Response) -> Result<HostResponse> {
    let status = response.status().as_u16();
    let headers: BTreeMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let body = response.text().await?;
    Ok(HostResponse {
        status,
        headers,
        body,
    })
}

/// Loader that allocates hosts on a remote loader service.
///
/// `POST {base}/loaders/{id}` allocates, `POST {base}/loaders/{id}/fetch`
/// invokes the default export.
#[derive(Debug, Clone)]
pub struct HttpWorkerLoader {
    client: Client,
    base_url: Url,
}

impl HttpWorkerLoader {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| SandboxError::Config(format!("Invalid loader URL '{}': {}", base_url, e)))?;
        Ok(Self { client, base_url })
    }

    fn loader_url(&self, id: &ExecutionId) -> String {
        format!("{}/loaders/{}", self.base_url.as_str().trim_end_matches('/'), id)
    }
}

#[async_trait]
impl WorkerLoader for HttpWorkerLoader {
    async fn get(&self, id: &ExecutionId, params: WorkerParams) -> Result<Box<dyn WorkerStub>> {
        let url = self.loader_url(id);
        let mut body = serde_json::to_value(&params)?;
        body["bindings"] = serde_json::Value::Object(params.binding_descriptors());

        tracing::debug!(execution_id = %id, url = %url, "Allocating remote execution host");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SandboxError::Loader(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(SandboxError::Loader(format!("status {}: {}", status, text)));
        }

        Ok(Box::new(HttpWorkerStub {
            entrypoint: HttpEntrypoint {
                client: self.client.clone(),
                url: format!("{}/fetch", url),
            },
        }))
    }

    fn name(&self) -> &str {
        "http"
    }
}

struct HttpWorkerStub {
    entrypoint: HttpEntrypoint,
}

impl WorkerStub for HttpWorkerStub {
    fn entrypoint(&self) -> &dyn Fetcher {
        &self.entrypoint
    }
}

struct HttpEntrypoint {
    client: Client,
    url: String,
}

#[async_trait]
impl Fetcher for HttpEntrypoint {
    async fn fetch(&self, request: HostRequest) -> Result<HostResponse> {
        let response = self.client.post(&self.url).json(&request).send().await?;
        into_host_response(response).await
    }
}

/// Capability backed by a plain HTTP service.
///
/// Request URLs are resolved against `base_url` by path, so generated
/// proxies can use any origin.
#[derive(Debug, Clone)]
pub struct HttpServiceBinding {
    client: Client,
    service: String,
    base_url: Url,
}

impl HttpServiceBinding {
    pub fn new(service: impl Into<String>, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SandboxError::Config(format!("Invalid service URL '{}': {}", base_url, e)))?;
        Ok(Self {
            client: Client::new(),
            service: service.into(),
            base_url,
        })
    }

    /// Descriptor remote hosts use to bind the same service
    pub fn descriptor(&self) -> serde_json::Value {
        json!({
            "type": "service",
            "service": self.service,
            "url": self.base_url.as_str(),
        })
    }

    /// Wrap as a capability carrying its descriptor
    pub fn into_capability(self) -> Capability {
        let descriptor = self.descriptor();
        Capability::new(self).with_descriptor(descriptor)
    }

    fn target(&self, url: &str) -> Result<Url> {
        let path_and_query = match Url::parse(url) {
            Ok(parsed) => {
                let mut path = parsed.path().to_string();
                if let Some(query) = parsed.query() {
                    path.push('?');
                    path.push_str(query);
                }
                path
            }
            Err(_) => url.to_string(),
        };
        self.base_url
            .join(path_and_query.trim_start_matches('/'))
            .map_err(|e| SandboxError::Runtime(format!("Invalid binding URL '{}': {}", url, e)))
    }
}

#[async_trait]
impl Fetcher for HttpServiceBinding {
    async fn fetch(&self, request: HostRequest) -> Result<HostResponse> {
        let target = self.target(&request.url)?;
        tracing::debug!(service = %self.service, url = %target, method = %request.method, "Binding fetch");

        let mut builder = self.client.request(parse_method(&request.method)?, target);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        into_host_response(response).await
    }
}
