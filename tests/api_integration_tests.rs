//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each endpoint, with an in-memory
//! backend and the in-process event bus.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use dm_cache::{
    api::create_router, AppState, CacheOptions, DmCache, MemoryBackend, MemoryChannel,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const SHORT_ID: &str = "abcdef01";

// == Helper Functions ==

struct TestApp {
    app: Router,
    backend: Arc<MemoryBackend>,
}

async fn create_test_app() -> TestApp {
    let backend = Arc::new(MemoryBackend::new(SHORT_ID));
    backend.insert_entry("blog", "p1", json!({"id": "p1", "title": "Hello"}));
    backend.insert_entry("blog", "p2", json!({"id": "p2", "title": "Again"}));
    backend.insert_list("blog", json!({"count": 2}));

    let bus = Arc::new(MemoryChannel::new());
    let cache = DmCache::new(CacheOptions::default(), backend.clone(), Some(bus.clone()))
        .await
        .unwrap();
    let state = AppState::new(cache, SHORT_ID).with_bus(bus);

    TestApp {
        app: create_router(state),
        backend,
    }
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

async fn post_event(app: &Router, body: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/events")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn wait_for_entries(app: &Router, expected: u64) {
    for _ in 0..100 {
        let (_, stats) = get(app, "/stats").await;
        if stats["itemsInEntryCache"] == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("entry cache never reached {expected} items");
}

// == Entry Endpoint Tests ==

#[tokio::test]
async fn test_entry_endpoint_reads_through_once() {
    let test = create_test_app().await;

    let (status, first) = get(&test.app, "/entries/blog/p1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["title"], "Hello");

    let (_, second) = get(&test.app, "/entries/blog/p1").await;
    assert_eq!(first, second);
    assert_eq!(test.backend.entry_calls(), 1);
}

#[tokio::test]
async fn test_entry_endpoint_forwards_fields_and_levels() {
    let test = create_test_app().await;

    let (status, _) = get(&test.app, "/entries/blog/p1?fields=title,body&levels=2").await;
    assert_eq!(status, StatusCode::OK);

    let options = test.backend.last_entry_options().unwrap();
    assert_eq!(
        options.fields,
        Some(vec!["title".to_string(), "body".to_string()])
    );
    assert_eq!(options.levels, 2);
}

#[tokio::test]
async fn test_entry_endpoint_not_found() {
    let test = create_test_app().await;

    let (status, json) = get(&test.app, "/entries/blog/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json.get("error").is_some());
}

#[tokio::test]
async fn test_entry_endpoint_backend_failure() {
    let test = create_test_app().await;
    test.backend.set_failing(true);

    let (status, json) = get(&test.app, "/entries/blog/p1").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(json["error"].as_str().unwrap().contains("get_entry"));
}

// == List Endpoint Tests ==

#[tokio::test]
async fn test_list_endpoint_caches_per_filter() {
    let test = create_test_app().await;

    get(&test.app, "/entries/blog").await;
    get(&test.app, "/entries/blog").await;
    get(&test.app, "/entries/blog?_limit=1").await;

    assert_eq!(test.backend.list_calls(), 2);
}

// == Event Endpoint Tests ==

#[tokio::test]
async fn test_event_evicts_cached_entry() {
    let test = create_test_app().await;
    get(&test.app, "/entries/blog/p1").await;
    get(&test.app, "/entries/blog/p2").await;

    let (status, json) = post_event(
        &test.app,
        r#"{"modelTitle":"blog","entryID":"p1","type":"entryUpdated"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["routingKey"], "abcdef01.blog.p1.entryUpdated");
    assert_eq!(json["delivered"], 1);

    wait_for_entries(&test.app, 1).await;
    get(&test.app, "/entries/blog/p1").await;
    assert_eq!(test.backend.entry_calls(), 3);
}

#[tokio::test]
async fn test_event_for_unwatched_entry_is_not_delivered() {
    let test = create_test_app().await;

    let (status, json) = post_event(&test.app, r#"{"modelTitle":"blog","entryID":"p1"}"#).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["delivered"], 0);
}

#[tokio::test]
async fn test_invalid_event_request() {
    let test = create_test_app().await;

    let (status, _) = post_event(&test.app, r#"{"modelTitle":"","entryID":"p1"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_event(&test.app, r#"{"modelTitle":"#).await;
    assert!(status.is_client_error());
}

// == Model Endpoint Tests ==

#[tokio::test]
async fn test_clear_model_endpoint() {
    let test = create_test_app().await;
    get(&test.app, "/entries/blog/p1").await;
    get(&test.app, "/entries/blog").await;

    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/models/blog")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["removed"], 2);

    let (_, stats) = get(&test.app, "/stats").await;
    assert_eq!(stats["itemsInEntryCache"], 0);
    assert_eq!(stats["itemsInModelCache"], 0);
}

// == Stats and Health Tests ==

#[tokio::test]
async fn test_stats_endpoint() {
    let test = create_test_app().await;
    get(&test.app, "/entries/blog/p1").await;
    get(&test.app, "/entries/blog/p1").await;

    let (status, json) = get(&test.app, "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["maxCacheSize"], 1000);
    assert_eq!(json["timeToLive"], 300);
    assert_eq!(json["itemsInEntryCache"], 1);
    assert_eq!(json["hits"], 1);
    assert_eq!(json["misses"], 1);
    assert_eq!(json["liveInvalidation"], true);
}

#[tokio::test]
async fn test_health_endpoint() {
    let test = create_test_app().await;

    let (status, json) = get(&test.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert!(json.get("timestamp").is_some());
    assert_eq!(json["live_invalidation"], true);
}
