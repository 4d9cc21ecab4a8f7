//! Isobox Sandbox - run untrusted JavaScript on single-use execution hosts
//!
//! Caller code is validated, wrapped into a generated worker module and
//! handed to a [`WorkerLoader`] which allocates an isolated host for it.
//! Capabilities reach the code only through the bindings a request carries.
//!
//! ```no_run
//! use isobox_sandbox::{ExecutionRequest, HttpWorkerLoader, SandboxLoader};
//!
//! # async fn run() -> isobox_sandbox::Result<()> {
//! let sandbox = SandboxLoader::new(HttpWorkerLoader::new("http://127.0.0.1:8787")?);
//! let result = sandbox
//!     .execute_in_sandbox(ExecutionRequest::new("return 1 + 1"))
//!     .await;
//! assert_eq!(result.result, Some(serde_json::json!(2)));
//! # Ok(())
//! # }
//! ```

pub mod capability;
mod config;
pub mod detect;
mod error;
mod execution;
mod limits;
mod loader;
pub mod runtime;
pub mod sanitize;
mod types;
mod validate;
mod workers;
pub mod wrap;

pub use capability::{capability_mode, generate_capability_source, CapabilityMode};
pub use config::{SandboxConfig, DEFAULT_COMPATIBILITY_DATE, DEFAULT_WORKERS_API_URL};
pub use error::{CodeKind, Result, SandboxError};
pub use execution::{ExecutionId, ExecutionPhase, ExecutionTracker};
pub use limits::{CodeLimits, HostLimits, MAX_MODULE_SIZE, MAX_SCRIPT_SIZE};
pub use loader::{CodeOptions, SandboxLoader};
pub use runtime::{
    Fetcher, HttpServiceBinding, HttpWorkerLoader, WorkerLoader, WorkerStub,
};
#[cfg(feature = "v8")]
pub use runtime::{V8SyntaxChecker, V8WorkerLoader};
pub use types::{
    BindingMap, Capability, ConsoleEntry, ExecutionRequest, ExecutionResult, HostRequest,
    HostResponse, WorkerParams, MAIN_MODULE,
};
pub use validate::{validate_code, DeferredSyntaxCheck, SyntaxChecker, Validator};
pub use workers::{WorkerDefinition, WorkersClient};
pub use wrap::{
    wrap_module, wrap_module_blocking, wrap_simple, wrap_simple_blocking, WrapOptions,
    WrappedModule,
};
