//! Remote loader and service binding against a mock loader service

mod common;

use common::setup_test_logging;
use isobox_sandbox::{
    ExecutionRequest, Fetcher, HostRequest, HttpServiceBinding, HttpWorkerLoader, SandboxLoader,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_remote_execution_round_trip() {
    setup_test_logging();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/loaders/[0-9a-f-]{36}$"))
        .and(body_partial_json(json!({
            "compatibilityDate": "2025-06-01",
            "mainModule": "main.js",
            "env": {"REGION": "eu"},
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/loaders/[0-9a-f-]{36}/fetch$"))
        .and(body_partial_json(json!({"method": "GET"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "eu",
            "console": [["info", "region", "eu"]],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sandbox = SandboxLoader::new(HttpWorkerLoader::new(&server.uri()).unwrap());
    assert_eq!(sandbox.loader_name(), "http");

    let result = sandbox
        .execute_in_sandbox(ExecutionRequest::new("return env.REGION").with_env("REGION", "eu"))
        .await;

    assert_eq!(result.error, None);
    assert_eq!(result.result, Some(json!("eu")));
    assert_eq!(result.console.unwrap()[0].level, "info");
}

#[tokio::test]
async fn test_remote_allocation_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/loaders/[^/]+$"))
        .respond_with(ResponseTemplate::new(429).set_body_string("too many hosts"))
        .mount(&server)
        .await;

    let sandbox = SandboxLoader::new(HttpWorkerLoader::new(&server.uri()).unwrap());
    let result = sandbox.execute_in_sandbox(ExecutionRequest::new("1")).await;

    let error = result.error.unwrap();
    assert!(error.starts_with("Execution error:"));
    assert!(error.contains("429"));
    assert!(error.contains("too many hosts"));
}

#[tokio::test]
async fn test_remote_worker_error_is_forwarded() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/loaders/[^/]+$"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/loaders/[^/]+/fetch$"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "boom"})))
        .mount(&server)
        .await;

    let sandbox = SandboxLoader::new(HttpWorkerLoader::new(&server.uri()).unwrap());
    let result = sandbox
        .execute_in_sandbox(ExecutionRequest::new("throw new Error('boom')"))
        .await;

    assert_eq!(result.error.as_deref(), Some("Worker execution failed: boom"));
}

#[tokio::test]
async fn test_service_binding_forwards_rpc_calls() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/svc/rpc/generate"))
        .and(query_param("trace", "1"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({"args": ["hello"]})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": "world"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let binding = HttpServiceBinding::new("ai", &format!("{}/svc/", server.uri())).unwrap();
    let request = HostRequest::new("POST", "https://service.internal/rpc/generate?trace=1")
        .with_header("content-type", "application/json")
        .with_body(json!({"args": ["hello"]}).to_string());

    let response = binding.fetch(request).await.unwrap();
    assert!(response.ok());
    let payload: serde_json::Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(payload["data"], "world");

    let capability = binding.into_capability();
    assert_eq!(capability.descriptor()["service"], "ai");
}
