//! Core types for sandbox execution

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::runtime::Fetcher;

/// Named capabilities handed to caller code
pub type BindingMap = BTreeMap<String, Capability>;

/// Opaque handle to an external service.
///
/// The pipeline never looks inside; it only forwards fetches to it.
#[derive(Clone)]
pub struct Capability {
    fetcher: Arc<dyn Fetcher>,
    descriptor: Value,
}

impl Capability {
    pub fn new(fetcher: impl Fetcher + 'static) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            descriptor: Value::Null,
        }
    }

    /// Attach a descriptor that remote hosts use to resolve this binding
    pub fn with_descriptor(mut self, descriptor: Value) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn fetcher(&self) -> Arc<dyn Fetcher> {
        Arc::clone(&self.fetcher)
    }

    pub fn descriptor(&self) -> &Value {
        &self.descriptor
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Capability(..)")
    }
}

/// Request to execute caller code
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// Script body; its last expression or explicit `return` is the result
    pub script: String,

    /// Optional CommonJS-style module whose `module.exports` are returned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,

    /// Plain values exposed to the host as `env`
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub env: Map<String, Value>,

    /// Capture console output (defaults to true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_console: Option<bool>,

    /// Capabilities; not serializable
    #[serde(skip)]
    pub bindings: BindingMap,
}

impl ExecutionRequest {
    /// Create a simple execution request
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            ..Default::default()
        }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Add an environment value
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_binding(mut self, name: impl Into<String>, capability: Capability) -> Self {
        self.bindings.insert(name.into(), capability);
        self
    }

    pub fn capture_console(mut self, enabled: bool) -> Self {
        self.capture_console = Some(enabled);
        self
    }

    pub fn captures_console(&self) -> bool {
        self.capture_console.unwrap_or(true)
    }
}

/// Parameters identifying one single-use execution host
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerParams {
    pub compatibility_date: String,

    /// File name of the entry module inside `modules`
    pub main_module: String,

    /// File name to source text
    pub modules: BTreeMap<String, String>,

    #[serde(skip)]
    pub bindings: BindingMap,

    #[serde(skip_serializing_if = "Map::is_empty")]
    pub env: Map<String, Value>,
}

impl WorkerParams {
    /// Single-module worker with `main.js` as entry point
    pub fn single_module(compatibility_date: impl Into<String>, source: String) -> Self {
        let mut modules = BTreeMap::new();
        modules.insert(MAIN_MODULE.to_string(), source);
        Self {
            compatibility_date: compatibility_date.into(),
            main_module: MAIN_MODULE.to_string(),
            modules,
            bindings: BindingMap::new(),
            env: Map::new(),
        }
    }

    pub fn main_source(&self) -> Option<&str> {
        self.modules.get(&self.main_module).map(String::as_str)
    }

    /// Binding descriptors, for transports that cannot carry live handles
    pub fn binding_descriptors(&self) -> Map<String, Value> {
        self.bindings
            .iter()
            .map(|(name, cap)| (name.clone(), cap.descriptor().clone()))
            .collect()
    }
}

/// Entry module file name
pub const MAIN_MODULE: &str = "main.js";

/// One captured console call: `[level, ...args]` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Value>", into = "Vec<Value>")]
pub struct ConsoleEntry {
    pub level: String,
    pub args: Vec<Value>,
}

impl TryFrom<Vec<Value>> for ConsoleEntry {
    type Error = String;

    fn try_from(mut values: Vec<Value>) -> Result<Self, Self::Error> {
        if values.is_empty() {
            return Err("console entry must start with a level".to_string());
        }
        let level = match values.remove(0) {
            Value::String(level) => level,
            other => return Err(format!("console level must be a string, got {}", other)),
        };
        Ok(Self {
            level,
            args: values,
        })
    }
}

impl From<ConsoleEntry> for Vec<Value> {
    fn from(entry: ConsoleEntry) -> Self {
        let mut values = Vec::with_capacity(entry.args.len() + 1);
        values.push(Value::String(entry.level));
        values.extend(entry.args);
        values
    }
}

/// Keep an explicit `null` as `Some(Value::Null)`; only a missing key is `None`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Result of code execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Value produced by the script
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// `module.exports` when module code was supplied. Usually an object,
    /// but a module may export any JSON value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<Value>,

    /// Captured console calls when capture was enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console: Option<Vec<ConsoleEntry>>,

    /// Failure message; authoritative when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Check if execution succeeded
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Request handed to a fetch-capable object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl HostRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Response from a fetch-capable object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl HostResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
