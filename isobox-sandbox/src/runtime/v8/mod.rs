//! In-process V8 execution host using deno_core
//!
//! Every invocation gets a brand-new isolate on its own thread. V8 isolates
//! are `!Send`, so the thread runs a current-thread tokio runtime and hands
//! the response back over a oneshot channel.

pub mod worker;

use std::sync::Arc;

use async_trait::async_trait;
use deno_core::{v8, JsRuntime, RuntimeOptions};
use tokio::sync::oneshot;

use super::{Fetcher, WorkerLoader, WorkerStub};
use crate::error::{CodeKind, SandboxError};
use crate::execution::ExecutionId;
use crate::limits::HostLimits;
use crate::types::{HostRequest, HostResponse, WorkerParams};
use crate::validate::SyntaxChecker;
use crate::Result;

/// Loader that runs workers in fresh in-process V8 isolates
#[derive(Debug, Clone, Default)]
pub struct V8WorkerLoader {
    limits: HostLimits,
}

impl V8WorkerLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loader with custom host limits
    pub fn with_limits(limits: HostLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &HostLimits {
        &self.limits
    }
}

#[async_trait]
impl WorkerLoader for V8WorkerLoader {
    async fn get(&self, id: &ExecutionId, params: WorkerParams) -> Result<Box<dyn WorkerStub>> {
        if params.main_source().is_none() {
            return Err(SandboxError::Loader(format!(
                "Main module '{}' is missing",
                params.main_module
            )));
        }

        tracing::debug!(
            execution_id = %id,
            modules = params.modules.len(),
            bindings = params.bindings.len(),
            "Allocating V8 execution host"
        );

        Ok(Box::new(V8WorkerStub {
            entrypoint: V8Entrypoint {
                params: Arc::new(params),
                limits: self.limits.clone(),
            },
        }))
    }

    fn name(&self) -> &str {
        "v8"
    }
}

struct V8WorkerStub {
    entrypoint: V8Entrypoint,
}

impl WorkerStub for V8WorkerStub {
    fn entrypoint(&self) -> &dyn Fetcher {
        &self.entrypoint
    }
}

struct V8Entrypoint {
    params: Arc<WorkerParams>,
    limits: HostLimits,
}

#[async_trait]
impl Fetcher for V8Entrypoint {
    async fn fetch(&self, request: HostRequest) -> Result<HostResponse> {
        let params = Arc::clone(&self.params);
        let limits = self.limits.clone();

        let (tx, rx) = oneshot::channel();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    if tx.send(Err(SandboxError::Runtime(e.to_string()))).is_err() {
                        tracing::warn!("V8 host result receiver dropped");
                    }
                    return;
                }
            };
            let result = rt.block_on(worker::run_worker(&params, request, &limits));
            if tx.send(result).is_err() {
                tracing::warn!("V8 host result receiver dropped before result was sent");
            }
        });

        rx.await
            .map_err(|_| SandboxError::Runtime("V8 host thread panicked".to_string()))?
    }
}

/// Compiles caller code without running it.
///
/// Scripts compile as async function bodies, modules as
/// `(module, exports)` function bodies, matching how they are wrapped.
#[derive(Debug, Clone, Copy, Default)]
pub struct V8SyntaxChecker;

impl V8SyntaxChecker {
    pub fn new() -> Self {
        Self
    }
}

fn compile_probe(code: &str, kind: CodeKind) -> Result<String> {
    let code = serde_json::to_string(code)?;
    let constructor = match kind {
        CodeKind::Script => "new (Object.getPrototypeOf(async function () {}).constructor)",
        CodeKind::Module => "new Function",
    };
    let params = match kind {
        CodeKind::Script => "",
        CodeKind::Module => "'module', 'exports', ",
    };

    Ok(format!(
        r#"(() => {{
    try {{
        {constructor}({params}{code});
        return JSON.stringify(null);
    }} catch (error) {{
        return JSON.stringify(String(error && error.message || error));
    }}
}})()"#
    ))
}

fn check_in_isolate(probe: String) -> Result<Option<String>> {
    let mut runtime = JsRuntime::new(RuntimeOptions::default());
    let global = runtime
        .execute_script("[isobox:syntax-check]", probe)
        .map_err(|e| SandboxError::Runtime(e.to_string()))?;
    let scope = &mut runtime.handle_scope();
    let local = v8::Local::new(scope, global);
    let raw = local.to_rust_string_lossy(scope);
    Ok(serde_json::from_str(&raw)?)
}

impl SyntaxChecker for V8SyntaxChecker {
    fn check(&self, code: &str, kind: CodeKind) -> Result<()> {
        let probe = compile_probe(code, kind)?;

        // Throwaway isolate on its own thread; the caller may be inside a
        // runtime that already owns one.
        let outcome = std::thread::spawn(move || check_in_isolate(probe))
            .join()
            .map_err(|_| SandboxError::Runtime("Syntax check thread panicked".to_string()))??;

        match outcome {
            None => Ok(()),
            Some(message) => {
                tracing::debug!(kind = %kind, error = %message, "Syntax check failed");
                Err(SandboxError::SyntaxInvalid { kind, message })
            }
        }
    }

    fn name(&self) -> &str {
        "v8"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_checker_accepts_valid_code() {
        let checker = V8SyntaxChecker::new();
        assert!(checker.check("const x = await Promise.resolve(1); return x", CodeKind::Script).is_ok());
        assert!(checker.check("module.exports = { a: 1 };", CodeKind::Module).is_ok());
    }

    #[test]
    fn test_syntax_checker_rejects_invalid_code() {
        let checker = V8SyntaxChecker::new();
        let err = checker.check("const = 5", CodeKind::Script).unwrap_err();
        assert!(matches!(err, SandboxError::SyntaxInvalid { kind: CodeKind::Script, .. }));
        assert!(err.is_validation());

        let err = checker.check("module.exports = {", CodeKind::Module).unwrap_err();
        assert!(matches!(err, SandboxError::SyntaxInvalid { kind: CodeKind::Module, .. }));
    }

    #[test]
    fn test_syntax_checker_does_not_run_code() {
        let checker = V8SyntaxChecker::new();
        assert!(checker.check("throw new Error('ran')", CodeKind::Script).is_ok());
    }

    #[tokio::test]
    async fn test_loader_rejects_missing_main_module() {
        let loader = V8WorkerLoader::new();
        let mut params = WorkerParams::single_module("2025-06-01", String::new());
        params.main_module = "other.js".to_string();

        let err = loader.get(&ExecutionId::new(), params).await.err().unwrap();
        assert!(matches!(err, SandboxError::Loader(_)));
    }
}
