// tests/api_tests.rs

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use common::{
    app_state, chat_body, secret, store_with_keys, Reply, ScriptedUpstream, TestConfigBuilder,
    ADMIN_TOKEN,
};
use gemini_balance::config::AppConfig;
use gemini_balance::create_router;
use gemini_balance::storage::{InMemoryStore, KeyFilter, KeyStore, Storage};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;

struct TestApp {
    router: Router,
    store: Arc<InMemoryStore>,
    upstream: Arc<ScriptedUpstream>,
}

impl TestApp {
    fn new(config: AppConfig, store: Arc<InMemoryStore>, upstream: ScriptedUpstream) -> Self {
        let upstream = Arc::new(upstream);
        let state = app_state(config, store.clone(), upstream.clone());
        Self {
            router: create_router(state),
            store,
            upstream,
        }
    }

    fn with_keys(n: u64) -> Self {
        Self::new(
            TestConfigBuilder::new().build(),
            store_with_keys(n),
            ScriptedUpstream::always_ok(),
        )
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, headers, body)
    }
}

fn chat_request(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

fn admin_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn test_health_ok_with_keys() {
    let app = TestApp::with_keys(1);
    let (status, headers, body) = app
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["available_keys"], 1);
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn test_health_unavailable_without_keys() {
    let app = TestApp::with_keys(0);
    let (status, _, body) = app
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}

#[tokio::test]
async fn test_status_reports_strategy_and_counts() {
    let app = TestApp::with_keys(2);
    let (status, _, body) = app
        .send(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["strategy"], "adaptive");
    assert_eq!(body["statistics"]["total_keys"], 2);
    assert_eq!(body["statistics"]["healthy_keys"], 0);
}

#[tokio::test]
async fn test_models_are_listed() {
    let app = TestApp::with_keys(1);
    let (status, _, body) = app
        .send(Request::builder().uri("/v1/models").body(Body::empty()).unwrap())
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["object"], "list");
    assert!(body["data"]
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m["id"] == "gemini-2.5-flash"));
}

#[tokio::test]
async fn test_chat_completion_is_proxied() {
    let app = TestApp::with_keys(2);
    let (status, headers, body) = app.send(chat_request(chat_body())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["served_by"], secret(1));
    assert!(!headers.contains_key("x-failover-count"));
    assert_eq!(app.upstream.call_count(), 1);

    let key = app.store.get_key(1).await.unwrap().unwrap();
    assert_eq!(key.metrics.total_requests, 1);
}

#[tokio::test]
async fn test_chat_completion_reports_failover() {
    let app = TestApp::new(
        TestConfigBuilder::new().build(),
        store_with_keys(2),
        ScriptedUpstream::always_ok().script(secret(1), [Reply::Status(401)]),
    );
    let (status, headers, body) = app.send(chat_request(chat_body())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["served_by"], secret(2));
    assert_eq!(headers.get("x-failover-count").unwrap(), "1");
}

#[tokio::test]
async fn test_chat_completion_all_keys_failing() {
    let app = TestApp::new(
        TestConfigBuilder::new().with_max_retries(0).build(),
        store_with_keys(2),
        ScriptedUpstream::new(Reply::Status(503)),
    );
    let (status, _, body) = app.send(chat_request(chat_body())).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "http_503");
}

#[tokio::test]
async fn test_chat_completion_without_keys() {
    let app = TestApp::with_keys(0);
    let (status, _, body) = app.send(chat_request(chat_body())).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"]["message"].as_str().unwrap().contains("No available API keys"));
}

#[tokio::test]
async fn test_chat_completion_validation() {
    let app = TestApp::with_keys(1);
    let invalid = [
        "not json".to_string(),
        json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]}).to_string(),
        json!({"model": "gemini-2.5-pro", "messages": []}).to_string(),
    ];

    for body in invalid {
        let (status, _, response) = app.send(chat_request(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"]["type"], "invalid_request_error");
    }
    assert_eq!(app.upstream.call_count(), 0);
}

#[tokio::test]
async fn test_admin_requires_token() {
    let app = TestApp::with_keys(1);

    let (status, _, _) = app
        .send(Request::builder().uri("/admin/keys").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = app
        .send(
            Request::builder()
                .uri("/admin/keys")
                .header(header::AUTHORIZATION, "Bearer wrong-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_disabled_without_configured_token() {
    let app = TestApp::new(
        TestConfigBuilder::new().without_admin_token().build(),
        store_with_keys(1),
        ScriptedUpstream::always_ok(),
    );
    let (status, _, _) = app.send(admin_request("GET", "/admin/keys", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_key_lifecycle() {
    let app = TestApp::with_keys(0);

    let (status, _, created) = app
        .send(admin_request("POST", "/admin/keys", Some(json!({"key": "AIzaSyAdminKey000001"}))))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["preview"], "AIza...0001");
    assert!(created.get("secret").is_none());
    let id = created["id"].as_u64().unwrap();

    let (status, _, _) = app
        .send(admin_request("POST", "/admin/keys", Some(json!({"key": "AIzaSyAdminKey000001"}))))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, listed) = app.send(admin_request("GET", "/admin/keys", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, _, toggled) = app
        .send(admin_request(
            "PUT",
            &format!("/admin/keys/{id}/enabled"),
            Some(json!({"enabled": false})),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["enabled"], false);
    assert!(!app.store.get_key(id).await.unwrap().unwrap().enabled);

    let (status, _, _) = app
        .send(admin_request("DELETE", &format!("/admin/keys/{id}"), None))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = app
        .send(admin_request("DELETE", &format!("/admin/keys/{id}"), None))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_rejects_blank_key() {
    let app = TestApp::with_keys(0);
    let (status, _, _) = app
        .send(admin_request("POST", "/admin/keys", Some(json!({"key": "   "}))))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_rejects_malformed_keys() {
    let app = TestApp::with_keys(0);
    for key in ["x", "sk-not-a-gemini-key-000000", "AIzaSyTooShort"] {
        let (status, _, body) = app
            .send(admin_request("POST", "/admin/keys", Some(json!({"key": key}))))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{key} should be rejected");
        assert!(body.get("error").is_some());
    }
    assert!(app
        .store
        .list_keys(KeyFilter::All)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_admin_stats_include_usage_and_performance() {
    let app = TestApp::with_keys(2);
    app.store.set_key_enabled(2, false).await.unwrap();

    let (status, _, _) = app.send(chat_request(chat_body())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, stats) = app.send(admin_request("GET", "/admin/stats", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_keys"], 2);
    assert_eq!(stats["enabled_keys"], 1);
    assert_eq!(stats["healthy_keys"], 1);
    assert_eq!(stats["usage"]["total_requests"], 1);
    assert_eq!(stats["usage"]["successful_requests"], 1);
    assert_eq!(stats["performance"]["avg_success_rate"], 0.5);
    assert!(stats["performance"]["avg_response_time_ms"].is_number());
}

#[tokio::test]
async fn test_status_does_not_count_disabled_keys_as_unhealthy() {
    let app = TestApp::with_keys(3);
    app.store.set_key_enabled(3, false).await.unwrap();

    let (status, _, body) = app
        .send(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["statistics"]["total_keys"], 3);
    assert_eq!(body["statistics"]["enabled_keys"], 2);
    assert_eq!(body["statistics"]["disabled_keys"], 1);
    assert_eq!(body["statistics"]["unhealthy_keys"], 2);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let app = TestApp::new(
        TestConfigBuilder::new().with_max_body_bytes(1024).build(),
        store_with_keys(1),
        ScriptedUpstream::always_ok(),
    );

    let padding = "a".repeat(4096);
    let body = json!({
        "model": "gemini-2.5-flash",
        "messages": [{"role": "user", "content": padding}],
    });
    let (status, _, _) = app.send(chat_request(body.to_string())).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.upstream.call_count(), 0);

    let (status, _, _) = app.send(chat_request(chat_body())).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_strategy_update() {
    let app = TestApp::with_keys(1);

    let (status, _, current) = app
        .send(admin_request("GET", "/admin/config/strategy", None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(current["strategy"], "adaptive");

    let (status, _, updated) = app
        .send(admin_request(
            "PUT",
            "/admin/config/strategy",
            Some(json!({"strategy": "least_used"})),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["strategy"], "least_used");

    let (status, _, _) = app
        .send(admin_request(
            "PUT",
            "/admin/config/strategy",
            Some(json!({"strategy": "random"})),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, _, stats) = app.send(admin_request("GET", "/admin/stats", None)).await;
    assert_eq!(stats["strategy"], "least_used");
    assert_eq!(stats["total_keys"], 1);
}

#[tokio::test]
async fn test_storage_trait_object_is_shared_with_router() {
    let store = store_with_keys(1);
    let app = TestApp::new(
        TestConfigBuilder::new().build(),
        store.clone(),
        ScriptedUpstream::always_ok(),
    );
    let shared: Arc<dyn Storage> = store;
    shared.set_key_enabled(1, false).await.unwrap();

    let (status, _, _) = app
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
