//! End-to-end runs of wrapped modules in the in-process V8 host

#![cfg(feature = "v8")]

mod common;

use common::{setup_test_logging, StaticCapability};
use isobox_sandbox::{
    Capability, CodeOptions, ExecutionRequest, SandboxLoader, V8SyntaxChecker, V8WorkerLoader,
};
use serde_json::json;

fn sandbox() -> SandboxLoader {
    setup_test_logging();
    SandboxLoader::new(V8WorkerLoader::new())
}

#[tokio::test]
async fn test_literal_round_trip() {
    let result = sandbox()
        .execute_in_sandbox(ExecutionRequest::new("1 + 1"))
        .await;

    assert_eq!(result.error, None);
    assert_eq!(result.result, Some(json!(2)));
    assert_eq!(result.console, Some(vec![]));
}

#[tokio::test]
async fn test_async_script_and_env() {
    let result = sandbox()
        .execute_in_sandbox(
            ExecutionRequest::new("const region = await Promise.resolve(env.REGION);\nreturn region.toUpperCase();")
                .with_env("REGION", "eu"),
        )
        .await;

    assert_eq!(result.result, Some(json!("EU")));
}

#[tokio::test]
async fn test_thrown_error_becomes_failure_envelope() {
    let result = sandbox()
        .execute_in_sandbox(ExecutionRequest::new(
            "console.warn('about to fail');\nthrow new Error('boom');\nreturn 1",
        ))
        .await;

    assert_eq!(result.error.as_deref(), Some("Worker execution failed: boom"));
    let console = result.console.unwrap();
    assert_eq!(console[0].level, "warn");
    assert_eq!(console[0].args, vec![json!("about to fail")]);
}

#[tokio::test]
async fn test_console_capture() {
    let result = sandbox()
        .execute_in_sandbox(ExecutionRequest::new(
            "console.log('a', 1); console.error({ b: true }); return 'done'",
        ))
        .await;

    assert_eq!(result.result, Some(json!("done")));
    let console = serde_json::to_value(result.console.unwrap()).unwrap();
    assert_eq!(console, json!([["log", "a", 1], ["error", {"b": true}]]));
}

#[tokio::test]
async fn test_console_capture_disabled() {
    let result = sandbox()
        .execute_in_sandbox(ExecutionRequest::new("console.log('hidden'); return 1").capture_console(false))
        .await;

    assert_eq!(result.result, Some(json!(1)));
    assert!(result.console.is_none());
}

#[tokio::test]
async fn test_module_exports() {
    let result = sandbox()
        .execute_in_sandbox(
            ExecutionRequest::new("return 21 * 2").with_module(
                "module.exports = { name: `m`, version: 2 };\nexports.extra = 'ignored';",
            ),
        )
        .await;

    assert_eq!(result.error, None);
    assert_eq!(result.result, Some(json!(42)));
    assert_eq!(result.exports, Some(json!({"name": "m", "version": 2})));
}

#[tokio::test]
async fn test_array_exports() {
    let result = sandbox()
        .execute_in_sandbox(ExecutionRequest::new("return 1").with_module("module.exports = [1, 2];"))
        .await;

    assert_eq!(result.error, None);
    assert_eq!(result.result, Some(json!(1)));
    assert_eq!(result.exports, Some(json!([1, 2])));
}

#[tokio::test]
async fn test_prototypes_are_frozen() {
    let result = sandbox()
        .execute_in_sandbox(ExecutionRequest::new("Array.prototype.evil = 1; return [].evil"))
        .await;

    assert!(result.error.unwrap().starts_with("Worker execution failed:"));
}

#[tokio::test]
async fn test_per_service_capability() {
    let request = ExecutionRequest::new("return await ai.generate('prompt')").with_binding(
        "AI_SERVICE",
        Capability::new(StaticCapability(json!({"success": true, "data": "generated"}))),
    );

    let result = sandbox().execute_in_sandbox(request).await;

    assert_eq!(result.error, None);
    assert_eq!(result.result, Some(json!("generated")));
}

#[tokio::test]
async fn test_binding_objects_are_not_in_caller_env() {
    let request = ExecutionRequest::new(
        "return [typeof env.AI_SERVICE, env.REGION, typeof globalThis.__isoboxEnv, await ai.generate('p')]",
    )
    .with_env("REGION", "eu")
    .with_binding(
        "AI_SERVICE",
        Capability::new(StaticCapability(json!({"success": true, "data": "ok"}))),
    );

    let result = sandbox().execute_in_sandbox(request).await;

    assert_eq!(result.error, None);
    assert_eq!(result.result, Some(json!(["undefined", "eu", "undefined", "ok"])));
}

#[tokio::test]
async fn test_gateway_capability_namespace() {
    let request = ExecutionRequest::new("return [await $.db.query('select 1'), typeof api.anything]")
        .with_binding(
            "RPC",
            Capability::new(StaticCapability(json!({"success": true, "data": [1]}))),
        );

    let result = sandbox().execute_in_sandbox(request).await;

    assert_eq!(result.result, Some(json!([[1], "function"])));
}

#[tokio::test]
async fn test_capability_failure_is_thrown() {
    let request = ExecutionRequest::new("return await db.query('x')").with_binding(
        "RPC",
        Capability::new(StaticCapability(json!({"success": false, "error": "denied"}))),
    );

    let result = sandbox().execute_in_sandbox(request).await;

    assert_eq!(result.error.as_deref(), Some("Worker execution failed: denied"));
}

#[tokio::test]
async fn test_capabilities_are_null_without_bindings() {
    let result = sandbox()
        .execute_in_sandbox(ExecutionRequest::new("return ai === null && typeof $ === 'undefined'"))
        .await;

    assert_eq!(result.result, Some(json!(true)));
}

#[tokio::test]
async fn test_simple_path() {
    let result = sandbox()
        .execute_code("console.info('hi'); return 40 + 2", CodeOptions::default())
        .await;

    assert_eq!(result.result, Some(json!(42)));
    assert_eq!(result.console.unwrap()[0].level, "info");
}

#[tokio::test]
async fn test_syntax_checker_rejects_before_running() {
    let sandbox = sandbox().with_syntax_checker(V8SyntaxChecker::new());

    let result = sandbox
        .execute_in_sandbox(ExecutionRequest::new("const = 1"))
        .await;

    assert!(result.error.unwrap().starts_with("Validation error:"));
}

#[tokio::test]
async fn test_thrown_statement_reports_its_message() {
    let result = sandbox()
        .execute_in_sandbox(ExecutionRequest::new("throw new Error('x')").capture_console(false))
        .await;

    assert_eq!(result.error.as_deref(), Some("Worker execution failed: x"));
    assert!(result.console.is_none());
}
