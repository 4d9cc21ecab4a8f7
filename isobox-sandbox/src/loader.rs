//! Sandbox loader - main entry point
//!
//! Every execution gets a fresh id, a freshly generated module and its own
//! host. Nothing is shared between requests, so executions can run
//! concurrently without coordination.

use std::sync::Arc;

use crate::capability::generate_capability_source;
use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::execution::{ExecutionId, ExecutionPhase, ExecutionTracker};
use crate::runtime::WorkerLoader;
use crate::types::{ExecutionRequest, ExecutionResult, HostRequest, HostResponse, WorkerParams};
use crate::validate::{SyntaxChecker, Validator};
use crate::wrap::{wrap_module_blocking, wrap_simple_blocking, WrapOptions, WrappedModule};
use crate::Result;

/// Origin of the synthetic request used to invoke a host
const INVOKE_ORIGIN: &str = "https://sandbox.internal";

/// Options for the simple execution path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeOptions {
    pub capture_console: bool,
}

impl Default for CodeOptions {
    fn default() -> Self {
        Self {
            capture_console: true,
        }
    }
}

/// Runs caller code on single-use execution hosts
#[derive(Clone)]
pub struct SandboxLoader {
    loader: Arc<dyn WorkerLoader>,
    validator: Validator,
    compatibility_date: String,
    /// Used when a request does not choose
    capture_console: bool,
}

impl SandboxLoader {
    /// Create a sandbox loader with default configuration
    pub fn new(loader: impl WorkerLoader + 'static) -> Self {
        Self::with_config(loader, &SandboxConfig::default())
    }

    pub fn with_config(loader: impl WorkerLoader + 'static, config: &SandboxConfig) -> Self {
        Self::from_arc(Arc::new(loader), config)
    }

    pub fn from_arc(loader: Arc<dyn WorkerLoader>, config: &SandboxConfig) -> Self {
        Self {
            loader,
            validator: Validator::new(config.limits),
            compatibility_date: config.compatibility_date.clone(),
            capture_console: config.capture_console,
        }
    }

    /// Check syntax before wrapping instead of leaving it to the host
    pub fn with_syntax_checker(mut self, checker: impl SyntaxChecker + 'static) -> Self {
        self.validator = self.validator.with_checker(checker);
        self
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Get the loader name
    pub fn loader_name(&self) -> &str {
        self.loader.name()
    }

    /// Run `request` end to end.
    ///
    /// Never fails: every problem is reported in the result's `error` field.
    pub async fn execute_in_sandbox(&self, request: ExecutionRequest) -> ExecutionResult {
        let mut tracker = ExecutionTracker::new(ExecutionId::new());

        tracing::info!(
            execution_id = %tracker.id(),
            loader = self.loader.name(),
            code_len = request.script.len(),
            has_module = request.module.is_some(),
            bindings = request.bindings.len(),
            "Executing code"
        );

        let outcome = self.run_sandboxed(&mut tracker, request).await;
        finish(&mut tracker, outcome)
    }

    /// Run code through the simple wrapper: no module, no capabilities.
    pub async fn execute_code(&self, code: &str, options: CodeOptions) -> ExecutionResult {
        let mut tracker = ExecutionTracker::new(ExecutionId::new());

        tracing::info!(
            execution_id = %tracker.id(),
            loader = self.loader.name(),
            code_len = code.len(),
            "Executing code (simple)"
        );

        let outcome = self.run_simple(&mut tracker, code, options).await;
        finish(&mut tracker, outcome)
    }

    async fn run_simple(
        &self,
        tracker: &mut ExecutionTracker,
        code: &str,
        options: CodeOptions,
    ) -> Result<ExecutionResult> {
        let wrapped =
            wrap_simple_blocking(self.validator.clone(), code.to_string(), options.capture_console)
                .await?;
        tracker.advance(ExecutionPhase::Validated);
        tracker.advance(ExecutionPhase::Wrapped);

        let params = WorkerParams::single_module(&self.compatibility_date, wrapped.into_source());
        self.invoke(tracker, params).await
    }

    async fn run_sandboxed(
        &self,
        tracker: &mut ExecutionTracker,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let options = WrapOptions::default()
            .with_capture_console(request.capture_console.unwrap_or(self.capture_console))
            .with_capability_source(generate_capability_source(&request.bindings))
            .with_hidden_bindings(request.bindings.keys().cloned());

        // Validates script and module before generating anything
        let wrapped: WrappedModule = wrap_module_blocking(
            self.validator.clone(),
            request.script,
            request.module,
            options,
        )
        .await?;
        tracker.advance(ExecutionPhase::Validated);
        tracker.advance(ExecutionPhase::Wrapped);

        let mut params = WorkerParams::single_module(&self.compatibility_date, wrapped.into_source());
        params.bindings = request.bindings;
        params.env = request.env;

        self.invoke(tracker, params).await
    }

    async fn invoke(
        &self,
        tracker: &mut ExecutionTracker,
        params: WorkerParams,
    ) -> Result<ExecutionResult> {
        let id = tracker.id();
        let worker = self.loader.get(&id, params).await?;
        tracker.advance(ExecutionPhase::HostAllocated);

        let request = HostRequest::new("GET", format!("{}/execute/{}", INVOKE_ORIGIN, id));
        let response = worker.entrypoint().fetch(request).await?;
        tracker.advance(ExecutionPhase::Invoked);

        parse_host_response(response)
    }
}

fn finish(tracker: &mut ExecutionTracker, outcome: Result<ExecutionResult>) -> ExecutionResult {
    match outcome {
        Ok(result) => {
            tracker.advance(ExecutionPhase::Succeeded);
            tracing::info!(execution_id = %tracker.id(), "Execution succeeded");
            result
        }
        Err(err) => {
            tracker.advance(ExecutionPhase::Failed);
            tracing::warn!(
                execution_id = %tracker.id(),
                failed_after = ?tracker.reached(),
                validation = err.is_validation(),
                error = %err,
                "Execution failed"
            );
            let mut result = ExecutionResult::failure(err.envelope_message());
            if let SandboxError::HostInvocation { console, .. } = err {
                result.console = console;
            }
            result
        }
    }
}

/// Split a failure body into message and captured console.
///
/// The wrapped module reports failures as `{ error, console? }` JSON; any
/// other body is used verbatim.
fn host_failure(response: HostResponse) -> SandboxError {
    let status = response.status;
    match serde_json::from_str::<ExecutionResult>(&response.body) {
        Ok(ExecutionResult {
            error: Some(message),
            console,
            ..
        }) => SandboxError::HostInvocation {
            status,
            message,
            console,
        },
        _ => SandboxError::HostInvocation {
            status,
            message: response.body,
            console: None,
        },
    }
}

fn parse_host_response(response: HostResponse) -> Result<ExecutionResult> {
    if !response.ok() {
        return Err(host_failure(response));
    }

    let result: ExecutionResult = serde_json::from_str(&response.body)?;
    Ok(result)
}
