//! Execution host abstraction and implementations

mod http;
#[cfg(feature = "v8")]
pub mod v8;

use async_trait::async_trait;

use crate::execution::ExecutionId;
use crate::types::{HostRequest, HostResponse, WorkerParams};
use crate::Result;

pub use http::{HttpServiceBinding, HttpWorkerLoader};
#[cfg(feature = "v8")]
pub use v8::{V8SyntaxChecker, V8WorkerLoader};

/// Anything that can answer a fetch: worker entry points and capabilities
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: HostRequest) -> Result<HostResponse>;
}

/// A loaded, single-use worker
pub trait WorkerStub: Send + Sync {
    /// The worker's default export
    fn entrypoint(&self) -> &dyn Fetcher;
}

/// Allocates execution hosts
#[async_trait]
pub trait WorkerLoader: Send + Sync {
    /// Allocate a host for `id` running the modules in `params`.
    ///
    /// Callers never pass the same id twice.
    async fn get(&self, id: &ExecutionId, params: WorkerParams) -> Result<Box<dyn WorkerStub>>;

    /// Get loader name
    fn name(&self) -> &str;
}
