//! End-to-end tests of the limiter HTTP API.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::json;
use tower::ServiceExt;

use ratekeeper::http::{router, AppState};
use ratekeeper::limiter::LimiterConfig;
use ratekeeper::registry::LimiterRegistry;

fn app(acquire_timeout: Duration) -> (Arc<LimiterRegistry>, Router) {
    let registry = Arc::new(LimiterRegistry::new());
    let state = AppState::new(registry.clone(), acquire_timeout);
    (registry, router(state))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, Vec<u8>) {
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

fn limit_body(name: &str, interval: i64, count: i64) -> serde_json::Value {
    json!({
        "name": name,
        "intervalMillis": interval,
        "count": count,
        "precision": 0.1,
    })
}

#[tokio::test]
async fn create_returns_created() {
    let (registry, app) = app(Duration::from_millis(50));

    let (status, _) = send(&app, "POST", "/limit", Some(limit_body("foo", 1, 1))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(registry.handle("foo").is_ok());
}

#[tokio::test]
async fn create_existing_returns_conflict() {
    let (registry, app) = app(Duration::from_millis(50));
    let original = registry
        .create(LimiterConfig::new("foo", 1000, 1, 0.1).unwrap())
        .unwrap();

    let (status, _) = send(&app, "POST", "/limit", Some(limit_body("foo", 1, 1))).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        registry.handle("foo").unwrap().instance_id(),
        original.instance_id()
    );
}

#[tokio::test]
async fn create_with_zero_count_is_rejected() {
    let (registry, app) = app(Duration::from_millis(50));

    let (status, _) = send(&app, "POST", "/limit", Some(limit_body("foo", 100, 0))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn create_with_missing_fields_is_bad_request() {
    let (_registry, app) = app(Duration::from_millis(50));

    let (status, _) = send(&app, "POST", "/limit", Some(json!({ "name": "foo" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_returns_config_json() {
    let (_registry, app) = app(Duration::from_millis(50));
    send(&app, "POST", "/limit", Some(limit_body("foo", 1000, 4))).await;

    let (status, body) = send(&app, "GET", "/limit/foo", None).await;

    assert_eq!(status, StatusCode::OK);
    let config: LimiterConfig = serde_json::from_slice(&body).unwrap();
    assert_eq!(config, LimiterConfig::new("foo", 1000, 4, 0.1).unwrap());
}

#[tokio::test]
async fn update_returns_accepted_and_applies() {
    let (_registry, app) = app(Duration::from_millis(50));
    send(&app, "POST", "/limit", Some(limit_body("foo", 1, 1))).await;

    let (status, _) = send(&app, "PUT", "/limit", Some(limit_body("foo", 2, 2))).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (_, body) = send(&app, "GET", "/limit/foo", None).await;
    let config: LimiterConfig = serde_json::from_slice(&body).unwrap();
    assert_eq!(config.interval_millis, 2);
    assert_eq!(config.count, 2);
}

#[tokio::test]
async fn update_unknown_returns_not_found() {
    let (_registry, app) = app(Duration::from_millis(50));

    let (status, _) = send(&app, "PUT", "/limit", Some(limit_body("ghost", 10, 1))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_with_malformed_body_is_bad_request() {
    let (_registry, app) = app(Duration::from_millis(50));
    send(&app, "POST", "/limit", Some(limit_body("foo", 1, 1))).await;

    let (status, _) = send(&app, "PUT", "/limit", Some(json!("not a config"))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_returns_ok_then_not_found() {
    let (registry, app) = app(Duration::from_millis(50));
    send(&app, "POST", "/limit", Some(limit_body("foo", 1, 1))).await;
    let handle = registry.handle("foo").unwrap();

    let (status, _) = send(&app, "DELETE", "/limit/foo", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "GET", "/limit/foo", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "DELETE", "/limit/foo", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    handle.closed().await;
}

#[tokio::test]
async fn acquire_grants_token() {
    let (_registry, app) = app(Duration::from_millis(500));
    send(&app, "POST", "/limit", Some(limit_body("fast", 10, 1))).await;

    let (status, _) = send(&app, "GET", "/limit/fast/acquire", None).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn acquire_exhausted_returns_too_many_requests() {
    let (_registry, app) = app(Duration::from_millis(20));
    send(&app, "POST", "/limit", Some(limit_body("slow", 60_000, 1))).await;

    let (status, _) = send(&app, "GET", "/limit/slow/acquire", None).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn acquire_unknown_returns_not_found() {
    let (_registry, app) = app(Duration::from_millis(20));

    let (status, _) = send(&app, "GET", "/limit/ghost/acquire", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn acquire_during_delete_does_not_hang() {
    let (_registry, app) = app(Duration::from_secs(30));
    send(&app, "POST", "/limit", Some(limit_body("slow", 60_000, 1))).await;

    let waiter = {
        let app = app.clone();
        tokio::spawn(async move { send(&app, "GET", "/limit/slow/acquire", None).await.0 })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    send(&app, "DELETE", "/limit/slow", None).await;

    let status = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("acquire hung after delete")
        .unwrap();
    assert!(
        status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::NOT_FOUND,
        "unexpected status: {}",
        status
    );
}

#[tokio::test]
async fn concurrent_creates_of_same_name_admit_one() {
    let (registry, app) = app(Duration::from_millis(50));

    let requests = (0..8).map(|_| {
        let app = app.clone();
        async move { send(&app, "POST", "/limit", Some(limit_body("race", 1000, 1))).await.0 }
    });
    let statuses = futures::future::join_all(requests).await;

    let created = statuses.iter().filter(|s| **s == StatusCode::CREATED).count();
    let conflicts = statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count();
    assert_eq!(created, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(registry.len(), 1);
}
