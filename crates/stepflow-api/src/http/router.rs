//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, request tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/validate", post(handlers::workflow::validate_workflow))
        // Registry
        .route(
            "/workflows",
            post(handlers::workflow::create_workflow).get(handlers::workflow::list_workflows),
        )
        .route(
            "/workflows/{name}",
            get(handlers::workflow::get_workflow).delete(handlers::workflow::delete_workflow),
        )
        .route("/workflows/{name}/run", post(handlers::workflow::run_workflow))
        // Executions
        .route("/executions", get(handlers::execution::list_executions))
        .route(
            "/executions/{id}/cancel",
            post(handlers::execution::cancel_execution),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::time::Duration;
    use stepflow_types::config::EngineConfig;

    const GREETING: &str = r#"
metadata:
  name: greeting
  description: Builds a greeting from a name
  version: 1.0.0
inputs:
  name:
    type: string
    required: true
workflow:
  steps:
    - id: start
      type: start
    - id: end
      type: end
      depends_on: [start]
outputs:
  who:
    source: "${name}"
"#;

    const SLOW: &str = r#"
metadata:
  name: slow
  description: Spins until the sandbox gives up
  version: 1.0.0
inputs: {}
workflow:
  steps:
    - id: start
      type: start
    - id: spin
      type: code
      depends_on: [start]
      config:
        code: "function main() { while (true) {} }"
        timeout: 30000
    - id: end
      type: end
      depends_on: [spin]
outputs: {}
"#;

    async fn serve() -> (String, AppState) {
        let mut config = EngineConfig::default();
        config.llm.api_key_env = "STEPFLOW_TEST_NO_SUCH_KEY".to_string();
        config.sandbox.loop_iteration_limit = 5_000_000;
        let state = AppState::from_config(config).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{addr}/api/v1"), state)
    }

    #[tokio::test]
    async fn test_register_run_and_inspect() {
        let (base, _state) = serve().await;
        let client = reqwest::Client::new();

        let resp = client.post(format!("{base}/workflows")).body(GREETING).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["data"]["name"], "greeting");
        assert_eq!(body["_links"]["self"], "/api/v1/workflows/greeting");

        let list: Value = client.get(format!("{base}/workflows")).send().await.unwrap().json().await.unwrap();
        assert_eq!(list["data"][0]["name"], "greeting");
        assert_eq!(list["data"][0]["inputs"], json!(["name"]));

        let resp = client
            .post(format!("{base}/workflows/greeting/run"))
            .json(&json!({"inputs": {"name": "ada"}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let run: Value = resp.json().await.unwrap();
        assert_eq!(run["data"]["status"], "completed");
        assert_eq!(run["data"]["outputs"]["who"], "ada");

        let executions: Value = client
            .get(format!("{base}/executions?limit=5"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(executions["data"]["history"].as_array().unwrap().len(), 1);
        assert_eq!(executions["data"]["running"], json!([]));

        let detail: Value = client.get(format!("{base}/workflows/greeting")).send().await.unwrap().json().await.unwrap();
        assert_eq!(detail["data"]["metadata"]["version"], "1.0.0");
    }

    #[tokio::test]
    async fn test_validate_reports_without_registering() {
        let (base, state) = serve().await;
        let client = reqwest::Client::new();

        let broken = GREETING.replace("depends_on: [start]", "depends_on: [ghost]");
        let body: Value = client
            .post(format!("{base}/validate"))
            .body(broken)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["data"]["valid"], false);
        assert!(state.engine.list_workflows().is_empty());
    }

    #[tokio::test]
    async fn test_error_envelopes() {
        let (base, _state) = serve().await;
        let client = reqwest::Client::new();

        let resp = client.get(format!("{base}/workflows/missing")).send().await.unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert!(body["data"].is_null());
        assert_eq!(body["errors"][0]["code"], "WORKFLOW_NOT_FOUND");

        let resp = client.post(format!("{base}/workflows")).body("metadata: [unclosed").send().await.unwrap();
        assert_eq!(resp.status(), 400);

        let cyclic = GREETING.replace("    - id: start\n      type: start\n", "    - id: start\n      type: start\n      depends_on: [end]\n");
        let resp = client.post(format!("{base}/workflows")).body(cyclic).send().await.unwrap();
        assert_eq!(resp.status(), 422);
        let body: Value = resp.json().await.unwrap();
        let codes: Vec<&str> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["code"].as_str())
            .collect();
        assert!(codes.iter().any(|c| *c == "CIRCULAR_DEPENDENCY"), "got: {codes:?}");

        client.post(format!("{base}/workflows")).body(GREETING).send().await.unwrap();
        let resp = client
            .post(format!("{base}/workflows/greeting/run"))
            .json(&json!({"inputs": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["errors"][0]["code"], "INVALID_INPUT");

        let resp = client.post(format!("{base}/executions/exec_nope/cancel")).send().await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_delete_workflow() {
        let (base, state) = serve().await;
        let client = reqwest::Client::new();
        client.post(format!("{base}/workflows")).body(GREETING).send().await.unwrap();

        let resp = client.delete(format!("{base}/workflows/greeting")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        assert!(state.engine.list_workflows().is_empty());

        let resp = client.delete(format!("{base}/workflows/greeting")).send().await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_cancel_running_execution() {
        let (base, state) = serve().await;
        let client = reqwest::Client::new();
        client.post(format!("{base}/workflows")).body(SLOW).send().await.unwrap();

        let run_client = client.clone();
        let run_url = format!("{base}/workflows/slow/run");
        let run = tokio::spawn(async move { run_client.post(run_url).send().await.unwrap().json::<Value>().await.unwrap() });

        let mut running = Vec::new();
        for _ in 0..100 {
            running = state.engine.running_executions();
            if !running.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(running.len(), 1);

        let resp = client
            .post(format!("{base}/executions/{}/cancel", running[0]))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body = run.await.unwrap();
        assert_eq!(body["data"]["status"], "cancelled");
    }
}
