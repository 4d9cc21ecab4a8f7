//! Shared helpers for the sandbox integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use isobox_sandbox::{
    ExecutionId, Fetcher, HostRequest, HostResponse, Result, SandboxError, WorkerLoader,
    WorkerParams, WorkerStub,
};

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// One host allocation seen by a [`RecordingLoader`]
#[derive(Debug, Clone)]
pub struct Allocation {
    pub id: ExecutionId,
    pub params: WorkerParams,
    pub requests: Vec<HostRequest>,
}

impl Allocation {
    pub fn source(&self) -> &str {
        self.params.main_source().unwrap_or_default()
    }
}

/// What a [`RecordingLoader`] does when asked for a host
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(HostResponse),
    FailAllocation(String),
}

/// In-memory loader that records every allocation and answers with a
/// canned response
#[derive(Debug, Clone)]
pub struct RecordingLoader {
    allocations: Arc<Mutex<Vec<Allocation>>>,
    reply: Reply,
}

impl RecordingLoader {
    pub fn responding(status: u16, body: impl Into<String>) -> Self {
        Self {
            allocations: Arc::default(),
            reply: Reply::Respond(HostResponse::new(status, body)),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            allocations: Arc::default(),
            reply: Reply::FailAllocation(message.into()),
        }
    }

    pub fn allocations(&self) -> Vec<Allocation> {
        self.allocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerLoader for RecordingLoader {
    async fn get(&self, id: &ExecutionId, params: WorkerParams) -> Result<Box<dyn WorkerStub>> {
        let index = {
            let mut allocations = self.allocations.lock().unwrap();
            allocations.push(Allocation {
                id: *id,
                params,
                requests: Vec::new(),
            });
            allocations.len() - 1
        };

        match &self.reply {
            Reply::FailAllocation(message) => Err(SandboxError::Loader(message.clone())),
            Reply::Respond(response) => Ok(Box::new(RecordingStub {
                entrypoint: RecordingEntrypoint {
                    allocations: Arc::clone(&self.allocations),
                    index,
                    response: response.clone(),
                },
            })),
        }
    }

    fn name(&self) -> &str {
        "recording"
    }
}

struct RecordingStub {
    entrypoint: RecordingEntrypoint,
}

impl WorkerStub for RecordingStub {
    fn entrypoint(&self) -> &dyn Fetcher {
        &self.entrypoint
    }
}

struct RecordingEntrypoint {
    allocations: Arc<Mutex<Vec<Allocation>>>,
    index: usize,
    response: HostResponse,
}

#[async_trait]
impl Fetcher for RecordingEntrypoint {
    async fn fetch(&self, request: HostRequest) -> Result<HostResponse> {
        self.allocations.lock().unwrap()[self.index]
            .requests
            .push(request);
        Ok(self.response.clone())
    }
}

/// Capability that answers every call with the same RPC envelope
pub struct StaticCapability(pub serde_json::Value);

#[async_trait]
impl Fetcher for StaticCapability {
    async fn fetch(&self, _request: HostRequest) -> Result<HostResponse> {
        Ok(HostResponse::new(200, self.0.to_string()))
    }
}
