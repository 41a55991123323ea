//! End-to-end tests for the HTTP front, driven through the router without
//! binding a socket. Execution tests run the direct jail against /bin/sh.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use donfra_runner_core::{Language, LanguageRegistry, Limiter, Runner, RunnerConfig};
use donfra_runner_server::RunnerServer;

const SHELL_LANGUAGE_ID: i32 = 90;

fn shell_registry() -> LanguageRegistry {
    LanguageRegistry::new(vec![Language {
        id: SHELL_LANGUAGE_ID,
        name: "Shell".to_string(),
        interpreter: "/bin/sh".to_string(),
        extension: ".sh".to_string(),
    }])
}

fn router_with(registry: LanguageRegistry) -> (Router, Arc<Runner>) {
    let cfg = RunnerConfig::default();
    let limiter = Arc::new(Limiter::new(cfg.max_concurrent));
    let runner = Arc::new(Runner::new(cfg, registry, limiter, None).unwrap());
    let server = RunnerServer::new(Arc::clone(&runner));
    (server.build_router(), runner)
}

fn execute_request(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/execute")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 2 * 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_languages_and_slots() {
    let (router, _) = router_with(LanguageRegistry::builtin());

    let response = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["languages"], json!([63, 71]));
    assert_eq!(body["version"], "2.0.0");
    assert_eq!(body["slots"]["max"], 4);
    assert_eq!(body["slots"]["in_use"], 0);
    assert_eq!(body["slots"]["queued"], 0);
}

#[tokio::test]
async fn execute_rejects_non_post_methods() {
    let (router, _) = router_with(shell_registry());
    let response = router
        .oneshot(Request::builder().uri("/execute").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn execute_rejects_malformed_json() {
    let (router, _) = router_with(shell_registry());
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/execute")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid request body");
}

#[tokio::test]
async fn execute_rejects_oversized_bodies() {
    let (router, _) = router_with(shell_registry());
    let oversized = json!({
        "source_code": "x".repeat(2 * 1024 * 1024),
        "language_id": SHELL_LANGUAGE_ID,
    });
    let response = router.oneshot(execute_request(&oversized)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn execute_rejects_empty_source() {
    let (router, _) = router_with(shell_registry());
    let response = router
        .oneshot(execute_request(&json!({
            "source_code": "",
            "language_id": SHELL_LANGUAGE_ID,
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "source_code is required");
}

#[tokio::test]
async fn execute_rejects_missing_language() {
    let (router, _) = router_with(shell_registry());
    let response = router
        .oneshot(execute_request(&json!({ "source_code": "echo hi" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "language_id is required");
}

#[tokio::test]
async fn execute_rejects_unknown_language_without_consuming_a_slot() {
    let (router, runner) = router_with(shell_registry());
    let response = router
        .oneshot(execute_request(&json!({
            "source_code": "print('hi')",
            "language_id": 999,
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"],
        "unsupported language_id: 999"
    );
    assert_eq!(runner.limiter().in_use(), 0);
    assert_eq!(runner.limiter().queued(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn execute_runs_a_program_and_returns_its_output() {
    let (router, runner) = router_with(shell_registry());
    let response = router
        .oneshot(execute_request(&json!({
            "source_code": "echo hi",
            "language_id": SHELL_LANGUAGE_ID,
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["token"], "ws-exec");
    assert_eq!(body["status"]["id"], 3);
    assert_eq!(body["status"]["description"], "Accepted");
    assert_eq!(body["stdout"], "hi\n");
    assert!(body["execution_time_ms"].as_i64().unwrap() >= 0);
    assert_eq!(runner.limiter().in_use(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn execute_reports_runtime_errors_in_the_payload() {
    let (router, _) = router_with(shell_registry());
    let response = router
        .oneshot(execute_request(&json!({
            "source_code": "echo broken >&2\nexit 7",
            "language_id": SHELL_LANGUAGE_ID,
        })))
        .await
        .unwrap();
    // Execution outcomes are HTTP 200; the failure lives in the status.
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"]["id"], 11);
    assert_eq!(body["stderr"], "broken\n");
    assert_eq!(body["message"], "Process exited with code 7");
}

#[cfg(unix)]
#[tokio::test]
async fn execute_enforces_the_requested_timeout() {
    let (router, _) = router_with(shell_registry());
    let response = router
        .oneshot(execute_request(&json!({
            "source_code": "sleep 30",
            "language_id": SHELL_LANGUAGE_ID,
            "timeout_ms": 300,
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"]["id"], 5);
    assert_eq!(body["status"]["description"], "Time Limit Exceeded");
    assert!(body["execution_time_ms"].as_i64().unwrap() < 10_000);
}
