//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each admin endpoint against an
//! in-memory backend and a manual clock.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use kapital_cache::cache::{CacheService, ManualClock, MemoryBackend, Store};
use kapital_cache::config::{BreakerConfig, ReconnectConfig};
use kapital_cache::{create_router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

// == Helper Functions ==

struct TestApp {
    router: Router,
    backend: Arc<MemoryBackend>,
    clock: ManualClock,
}

fn create_test_app() -> TestApp {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 4, 2, 12, 0, 0).unwrap());
    let backend = Arc::new(MemoryBackend::new(Arc::new(clock.clone())));
    let store = Store::new(
        backend.clone(),
        BreakerConfig::default(),
        ReconnectConfig {
            base_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(3600),
        },
        Arc::new(clock.clone()),
    );
    let service = Arc::new(CacheService::new(Arc::new(store), 50));

    TestApp {
        router: create_router(AppState::new(service)),
        backend,
        clock,
    }
}

impl TestApp {
    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        (status, body_to_json(response.into_body()).await)
    }

    async fn put_key(&self, key: &str, value: Value) {
        let (status, _) = self
            .send("PUT", "/v1/cache/keys", Some(json!({"key": key, "value": value})))
            .await;
        assert_eq!(status, StatusCode::OK);
    }
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap()
}

// == Key Endpoint Tests ==

#[tokio::test]
async fn test_set_endpoint_success() {
    let app = create_test_app();

    let (status, json) = app
        .send(
            "PUT",
            "/v1/cache/keys",
            Some(json!({"key": "test_key", "value": {"price": 187.5}})),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["message"].as_str().unwrap().contains("test_key"));
}

#[tokio::test]
async fn test_set_endpoint_with_strategy() {
    let app = create_test_app();

    let (status, _) = app
        .send(
            "PUT",
            "/v1/cache/keys",
            Some(json!({"key": "ticker:AAPL:info", "value": {"name": "Apple"}, "strategy": "LONG"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = app.send("GET", "/v1/cache/keys/ticker:AAPL:info", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"], json!({"name": "Apple"}));
    assert_eq!(json["ttl"], 3600);

    app.clock.advance(Duration::from_secs(3601));
    let (status, _) = app.send("GET", "/v1/cache/keys/ticker:AAPL:info", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_set_endpoint_empty_key() {
    let app = create_test_app();

    let (status, json) = app
        .send("PUT", "/v1/cache/keys", Some(json!({"key": "", "value": 1})))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn test_set_endpoint_rejects_oversized_ttl() {
    let app = create_test_app();

    let (status, json) = app
        .send(
            "PUT",
            "/v1/cache/keys",
            Some(json!({"key": "k", "value": 1, "ttl": 100_000_000_000_000_000u64})),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("TTL"));
    assert!(app.backend.is_empty());
}

#[tokio::test]
async fn test_get_endpoint_not_found() {
    let app = create_test_app();

    let (status, json) = app.send("GET", "/v1/cache/keys/nonexistent", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("nonexistent"));
}

#[tokio::test]
async fn test_delete_endpoint() {
    let app = create_test_app();
    app.put_key("to_delete", json!("value")).await;

    let (status, json) = app.send("DELETE", "/v1/cache/keys/to_delete", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["message"].as_str().unwrap().contains("deleted"));

    let (status, _) = app.send("DELETE", "/v1/cache/keys/to_delete", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_keys_with_pattern_and_limit() {
    let app = create_test_app();
    for key in ["ticker:AAPL:info", "ticker:AAPL:news", "ticker:MSFT:info"] {
        app.put_key(key, json!(1)).await;
    }

    let (status, json) = app.send("GET", "/v1/cache/keys?pattern=ticker:AAPL:*", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 2);
    assert_eq!(json["pattern"], "ticker:AAPL:*");
    assert_eq!(json["keys"][0]["key"], "ticker:AAPL:info");
    assert_eq!(json["keys"][0]["size"], 1);

    let (_, json) = app.send("GET", "/v1/cache/keys?limit=1", None).await;
    assert_eq!(json["count"], 1);
}

// == Invalidation Tests ==

#[tokio::test]
async fn test_invalidate_pattern() {
    let app = create_test_app();
    for key in ["ticker:AAPL:info", "ticker:AAPL:news", "ticker:AAPL:history", "ticker:MSFT:info"] {
        app.put_key(key, json!({"v": 1})).await;
    }

    let (status, json) = app
        .send(
            "POST",
            "/v1/cache/invalidate",
            Some(json!({"pattern": "ticker:AAPL:*", "reason": "earnings restated"})),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["keys_affected"], 3);

    let (status, _) = app.send("GET", "/v1/cache/keys/ticker:MSFT:info", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_clear_endpoint() {
    let app = create_test_app();
    app.put_key("a", json!(1)).await;
    app.put_key("b", json!(2)).await;

    let (status, json) = app.send("POST", "/v1/cache/clear", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Cache cleared successfully");
    assert!(app.backend.is_empty());
}

// == Stats Endpoint Tests ==

#[tokio::test]
async fn test_stats_endpoint() {
    let app = create_test_app();
    app.put_key("k", json!(1)).await;

    let (status, json) = app.send("GET", "/v1/cache/stats", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["application_stats"]["hits"], 0);
    assert_eq!(json["application_stats"]["hit_rate"], 0.0);
    assert_eq!(json["store_stats"]["status"], "connected");
    assert_eq!(json["store_stats"]["keys"]["db0"], 1);
}

#[tokio::test]
async fn test_stats_reset_endpoint() {
    let app = create_test_app();

    let (status, json) = app.send("POST", "/v1/cache/stats/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Cache statistics reset");
}

#[tokio::test]
async fn test_strategy_endpoint() {
    let app = create_test_app();

    let (status, json) = app.send("GET", "/v1/cache/strategy", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["strategies"]["NO_CACHE"]["ttl_seconds"], 0);
    assert_eq!(json["strategies"]["QUARTERLY"]["ttl_seconds"], 7_776_000);
    assert_eq!(json["data_types"]["search_results"], "SHORT");
    assert_eq!(json["examples"]["ticker_info"]["endpoint"], "/v1/ticker/AAPL/info");
}

#[tokio::test]
async fn test_ping_endpoint() {
    let app = create_test_app();

    let (status, json) = app.send("GET", "/v1/cache/ping", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "connected");
    assert!(json["latency_ms"].is_number());
}

#[tokio::test]
async fn test_maintenance_endpoint() {
    let app = create_test_app();

    let (status, json) = app.send("POST", "/v1/cache/maintenance", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "scheduled");
}

// == Health Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app();

    let (status, json) = app.send("GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["components"]["cache"]["status"], "connected");
    assert_eq!(json["components"]["cache"]["breaker"]["state"], "closed");
    assert!(json["timestamp"].is_string());
}

// == Unavailable Backend Tests ==

#[tokio::test]
async fn test_admin_reports_unavailable_backend() {
    let app = create_test_app();
    app.backend.set_online(false);

    for (method, uri, body) in [
        ("GET", "/v1/cache/stats", None),
        ("POST", "/v1/cache/clear", None),
        ("POST", "/v1/cache/invalidate", Some(json!({"pattern": "*"}))),
        ("GET", "/v1/cache/keys", None),
        ("GET", "/v1/cache/keys/k", None),
        ("POST", "/v1/cache/maintenance", None),
    ] {
        let (status, json) = app.send(method, uri, body).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{} {}", method, uri);
        assert!(json["error"].is_string());
    }

    let (status, json) = app.send("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");

    let (_, json) = app.send("GET", "/v1/cache/ping", None).await;
    assert_eq!(json["status"], "disconnected");
}

#[tokio::test]
async fn test_invalid_json_rejected() {
    let app = create_test_app();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/cache/invalidate")
                .header("content-type", "application/json")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}
