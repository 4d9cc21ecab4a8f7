//! Worker environment for the in-process V8 host
//!
//! Provides the `Request`/`Response` globals a worker module expects and
//! routes binding fetches through a host op to the Rust [`Fetcher`] behind
//! each capability.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deno_core::{
    op2, v8, Extension, JsRuntime, ModuleSpecifier, OpState, PollEventLoopOptions, RuntimeOptions,
    StaticModuleLoader,
};
use deno_error::JsErrorBox;

use crate::error::SandboxError;
use crate::limits::HostLimits;
use crate::runtime::Fetcher;
use crate::types::{HostRequest, HostResponse, WorkerParams};
use crate::Result;

/// Specifier prefix for modules of the loaded worker
const MODULE_ROOT: &str = "file:///isobox/";

/// Capabilities reachable from this isolate, by binding name
struct BindingTable(BTreeMap<String, Arc<dyn Fetcher>>);

/// Forward a binding fetch to the capability's Rust fetcher
#[op2(async)]
#[string]
async fn op_isobox_binding_fetch(
    state: Rc<RefCell<OpState>>,
    #[string] binding: String,
    #[serde] request: HostRequest,
) -> std::result::Result<String, JsErrorBox> {
    let fetcher = {
        let state = state.borrow();
        state.borrow::<BindingTable>().0.get(&binding).cloned()
    }
    .ok_or_else(|| JsErrorBox::type_error(format!("Unknown binding: {}", binding)))?;

    tracing::debug!(binding = %binding, url = %request.url, method = %request.method, "Binding fetch");

    let response = fetcher
        .fetch(request)
        .await
        .map_err(|e| JsErrorBox::generic(format!("Binding {} failed: {}", binding, e)))?;

    serde_json::to_string(&response)
        .map_err(|e| JsErrorBox::type_error(format!("Failed to encode response: {}", e)))
}

fn create_worker_extension() -> Extension {
    let ops = vec![op_isobox_binding_fetch()];

    Extension {
        name: "isobox_worker",
        ops: std::borrow::Cow::Owned(ops),
        ..Default::default()
    }
}

/// Minimal worker globals
const WORKER_RUNTIME_JS: &str = r#"
if (typeof globalThis.console !== 'object' || globalThis.console === null) {
    const noop = () => {};
    globalThis.console = { log: noop, error: noop, warn: noop, info: noop, debug: noop };
}

globalThis.__isoboxStringHeaders = function(headers) {
    const out = {};
    for (const [key, value] of Object.entries(headers || {})) {
        out[key] = String(value);
    }
    return out;
};

globalThis.Request = class Request {
    constructor(url, options = {}) {
        this.url = String(url);
        this.method = (options.method || 'GET').toUpperCase();
        this.headers = options.headers || {};
        this.body = options.body == null ? null : options.body;
    }

    async text() {
        return this.body == null ? '' : String(this.body);
    }

    async json() {
        return JSON.parse(await this.text());
    }
};

globalThis.Response = class Response {
    constructor(body, options = {}) {
        this.body = body == null ? '' : body;
        this.status = options.status || 200;
        this.ok = this.status >= 200 && this.status < 300;
        this.headers = options.headers || {};
    }

    async text() {
        return String(this.body);
    }

    async json() {
        return JSON.parse(String(this.body));
    }

    static json(data, options = {}) {
        return new Response(JSON.stringify(data), {
            ...options,
            headers: { 'Content-Type': 'application/json', ...options.headers },
        });
    }
};

globalThis.fetch = async function() {
    throw new TypeError('Network access is not available; use a binding');
};
"#;

/// Install env and bindings, then remove `Deno` from the global scope.
fn bootstrap_source(params: &WorkerParams) -> Result<String> {
    let env = serde_json::to_string(&params.env)?;
    let names: Vec<&String> = params.bindings.keys().collect();
    let names = serde_json::to_string(&names)?;

    Ok(format!(
        r#"
((ops, env, bindings) => {{
    const bindingObject = (name) => Object.freeze({{
        async fetch(input, init = {{}}) {{
            const request = input instanceof Request ? input : new Request(input, init);
            const raw = await ops.op_isobox_binding_fetch(name, {{
                method: request.method,
                url: request.url,
                headers: __isoboxStringHeaders(request.headers),
                body: request.body == null ? null : String(request.body),
            }});
            const data = JSON.parse(raw);
            return new Response(data.body, {{ status: data.status, headers: data.headers }});
        }},
    }}));
    for (const name of bindings) {{
        env[name] = bindingObject(name);
    }}
    Object.defineProperty(globalThis, '__isoboxEnv', {{ value: env, configurable: true }});
    delete globalThis.Deno;
}})(Deno.core.ops, {env}, {names});
"#
    ))
}

/// Entry module: import the worker, call its default export once.
fn entry_source(main: &ModuleSpecifier, request: &HostRequest) -> Result<String> {
    let init = serde_json::json!({
        "method": request.method,
        "headers": request.headers,
        "body": request.body,
    });

    Ok(format!(
        r#"import worker from {main};
const env = globalThis.__isoboxEnv;
delete globalThis.__isoboxEnv;
const request = new Request({url}, {init});
const response = await worker.fetch(request, env, {{}});
globalThis.__isoboxResponse = {{
    status: response.status,
    headers: __isoboxStringHeaders(response.headers),
    body: await response.text(),
}};
"#,
        main = serde_json::to_string(main.as_str())?,
        url = serde_json::to_string(&request.url)?,
        init = init,
    ))
}

fn specifier(name: &str) -> Result<ModuleSpecifier> {
    ModuleSpecifier::parse(&format!("{}{}", MODULE_ROOT, name))
        .map_err(|e| SandboxError::Loader(format!("Invalid module name '{}': {}", name, e)))
}

fn js_error(err: impl std::fmt::Display) -> SandboxError {
    SandboxError::Runtime(err.to_string())
}

/// State for the near-heap-limit callback
struct HeapLimitState {
    handle: v8::IsolateHandle,
    triggered: AtomicBool,
}

/// Terminate execution near the heap limit and grant 1MB so the termination
/// can propagate.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points to a HeapLimitState that is dropped only after
    // the runtime that owns this callback.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

/// Create a fresh runtime holding the worker's modules and bindings.
fn create_worker_runtime(params: &WorkerParams, entry: String, limits: &HostLimits) -> Result<JsRuntime> {
    let main = specifier(&params.main_module)?;
    let mut modules: Vec<(ModuleSpecifier, String)> = Vec::with_capacity(params.modules.len() + 1);
    for (name, source) in &params.modules {
        modules.push((specifier(name)?, source.clone()));
    }
    if !params.modules.contains_key(&params.main_module) {
        return Err(SandboxError::Loader(format!(
            "Main module '{}' is missing",
            main
        )));
    }
    modules.push((specifier("__isobox_entry.js")?, entry));

    let create_params = limits
        .max_heap_bytes
        .map(|max_bytes| v8::CreateParams::default().heap_limits(0, max_bytes));

    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![create_worker_extension()],
        module_loader: Some(Rc::new(StaticModuleLoader::new(modules))),
        create_params,
        ..Default::default()
    });

    let bindings = params
        .bindings
        .iter()
        .map(|(name, capability)| (name.clone(), capability.fetcher()))
        .collect();
    runtime.op_state().borrow_mut().put(BindingTable(bindings));

    runtime
        .execute_script("[isobox:worker-init]", WORKER_RUNTIME_JS)
        .map_err(js_error)?;
    runtime
        .execute_script("[isobox:bootstrap]", bootstrap_source(params)?)
        .map_err(js_error)?;

    Ok(runtime)
}

/// Run one request against a worker in a brand-new isolate.
///
/// Must be called on a dedicated thread with its own current-thread tokio
/// runtime: isolates are `!Send`.
pub async fn run_worker(
    params: &WorkerParams,
    request: HostRequest,
    limits: &HostLimits,
) -> Result<HostResponse> {
    let entry_specifier = specifier("__isobox_entry.js")?;
    let entry = entry_source(&specifier(&params.main_module)?, &request)?;

    // Declared first so it is dropped after the runtime that points at it
    let heap_state: Box<HeapLimitState>;
    let mut runtime = create_worker_runtime(params, entry, limits)?;

    heap_state = Box::new(HeapLimitState {
        handle: runtime.v8_isolate().thread_safe_handle(),
        triggered: AtomicBool::new(false),
    });
    if limits.max_heap_bytes.is_some() {
        runtime.v8_isolate().add_near_heap_limit_callback(
            near_heap_limit_callback,
            &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
        );
    }

    // CPU-bound loops never yield to the event loop, so the wall-clock
    // budget is enforced from a watchdog thread.
    let timed_out = Arc::new(AtomicBool::new(false));
    let (cancel_tx, cancel_rx) = std::sync::mpsc::channel::<()>();
    let watchdog = limits.max_duration.map(|max_duration| {
        let handle = runtime.v8_isolate().thread_safe_handle();
        let timed_out = Arc::clone(&timed_out);
        std::thread::spawn(move || {
            if let Err(std::sync::mpsc::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(max_duration) {
                timed_out.store(true, Ordering::SeqCst);
                handle.terminate_execution();
            }
        })
    });

    let run = async {
        let module_id = runtime
            .load_main_es_module(&entry_specifier)
            .await
            .map_err(js_error)?;
        let evaluation = runtime.mod_evaluate(module_id);
        runtime
            .run_event_loop(PollEventLoopOptions::default())
            .await
            .map_err(js_error)?;
        evaluation.await.map_err(js_error)
    };

    let outcome = match limits.max_duration {
        // Async work that never settles leaves the event loop pending
        Some(max_duration) => tokio::time::timeout(max_duration, run)
            .await
            .unwrap_or_else(|_| Err(timeout_error(max_duration))),
        None => run.await,
    };

    let _ = cancel_tx.send(());
    if let Some(watchdog) = watchdog {
        let _ = watchdog.join();
    }

    if heap_state.triggered.load(Ordering::SeqCst) {
        return Err(SandboxError::Runtime("Heap limit exceeded".to_string()));
    }
    if timed_out.load(Ordering::SeqCst) {
        return Err(timeout_error(limits.max_duration.unwrap_or_default()));
    }
    outcome?;

    let global = runtime
        .execute_script(
            "[isobox:response]",
            "JSON.stringify(globalThis.__isoboxResponse ?? null)",
        )
        .map_err(js_error)?;
    let raw = {
        let scope = &mut runtime.handle_scope();
        let local = v8::Local::new(scope, global);
        local.to_rust_string_lossy(scope)
    };

    match serde_json::from_str::<Option<HostResponse>>(&raw)? {
        Some(response) => Ok(response),
        None => Err(SandboxError::Runtime(
            "Worker did not produce a response".to_string(),
        )),
    }
}

fn timeout_error(max_duration: Duration) -> SandboxError {
    SandboxError::Runtime(format!("Execution timed out after {:?}", max_duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Capability;
    use async_trait::async_trait;

    fn params(source: &str) -> WorkerParams {
        WorkerParams::single_module("2025-06-01", source.to_string())
    }

    fn get() -> HostRequest {
        HostRequest::new("GET", "https://sandbox.internal/execute/test")
    }

    #[tokio::test]
    async fn test_worker_returns_response() {
        let mut worker = params(
            r#"export default {
                async fetch(request, env) {
                    return Response.json({ method: request.method, greeting: env.GREETING });
                },
            };"#,
        );
        worker.env.insert("GREETING".to_string(), "hi".into());

        let response = run_worker(&worker, get(), &HostLimits::default()).await.unwrap();
        assert_eq!(response.status, 200);
        let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body, serde_json::json!({"method": "GET", "greeting": "hi"}));
    }

    #[tokio::test]
    async fn test_host_globals_are_removed() {
        let worker = params(
            r#"export default {
                async fetch() { return new Response(`${typeof Deno}:${typeof globalThis.__isoboxEnv}`); },
            };"#,
        );
        let response = run_worker(&worker, get(), &HostLimits::default()).await.unwrap();
        assert_eq!(response.body, "undefined:undefined");
    }

    struct Echo;

    #[async_trait]
    impl Fetcher for Echo {
        async fn fetch(&self, request: HostRequest) -> Result<HostResponse> {
            Ok(HostResponse::new(201, format!("{} {}", request.method, request.url)))
        }
    }

    #[tokio::test]
    async fn test_binding_fetch_reaches_rust() {
        let mut worker = params(
            r#"export default {
                async fetch(request, env) {
                    const res = await env.ECHO.fetch('https://echo.internal/x', { method: 'POST' });
                    return new Response(`${res.status}:${await res.text()}`);
                },
            };"#,
        );
        worker.bindings.insert("ECHO".to_string(), Capability::new(Echo));

        let response = run_worker(&worker, get(), &HostLimits::default()).await.unwrap();
        assert_eq!(response.body, "201:POST https://echo.internal/x");
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let worker = params(
            r#"export default {
                async fetch() { while (true) {} },
            };"#,
        );
        let limits = HostLimits {
            max_duration: Some(Duration::from_millis(200)),
            max_heap_bytes: None,
        };

        let err = run_worker(&worker, get(), &limits).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
