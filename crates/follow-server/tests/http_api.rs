//! Router-level checks: routes, JSON shapes, and code-in-body errors.

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use follow_core::{
    CountResponse, EdgeListResponse, FollowStatusResponse, IsFollowingResponse, ResponseCode,
    StatusResponse,
};
use follow_server::services::RelationshipService;
use follow_server::storage::{CacheStore, Database, MemoryCache, TieredRepository};
use follow_server::{build_router, AppState};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn app() -> Router {
    let db = Arc::new(Database::in_memory().await.unwrap());
    let backend = Arc::new(MemoryCache::new());
    let cache = Arc::new(CacheStore::new(backend, Duration::from_secs(3600)));
    let repo = Arc::new(TieredRepository::new(db, cache));
    let service = Arc::new(RelationshipService::new(repo, Duration::from_secs(5)));
    build_router(AppState {
        service,
        cache_backend: "memory",
    })
}

async fn call<T: DeserializeOwned>(app: &Router, method: Method, uri: &str, body: Option<&str>) -> T {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => request
            .header("content-type", "application/json")
            .body(Body::from(json.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn follow(app: &Router, a: &str, b: &str) -> StatusResponse {
    let body = format!(r#"{{"follower_id":"{}","following_id":"{}"}}"#, a, b);
    call(app, Method::POST, "/api/v1/follow", Some(&body)).await
}

#[tokio::test]
async fn test_health() {
    let app = app().await;
    let body: serde_json::Value = call(&app, Method::GET, "/health", None).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cache_backend"], "memory");
}

#[tokio::test]
async fn test_follow_flow_over_http() {
    let app = app().await;

    let resp = follow(&app, "alice", "bob").await;
    assert!(resp.code.is_success());

    let resp: IsFollowingResponse = call(
        &app,
        Method::GET,
        "/api/v1/is-following?follower_id=alice&following_id=bob",
        None,
    )
    .await;
    assert!(resp.is_following);

    let resp: CountResponse =
        call(&app, Method::GET, "/api/v1/users/bob/followers/count", None).await;
    assert_eq!(resp.count, 1);

    let resp: EdgeListResponse = call(
        &app,
        Method::GET,
        "/api/v1/users/alice/following?page=1&page_size=5",
        None,
    )
    .await;
    assert_eq!(resp.edges.len(), 1);
    assert_eq!(resp.edges[0].following_id, "bob");
    assert!(!resp.has_more);

    let resp: FollowStatusResponse = call(
        &app,
        Method::GET,
        "/api/v1/follow-status?follower_id=bob&following_id=alice",
        None,
    )
    .await;
    assert!(!resp.is_following && !resp.is_mutual);

    let body = r#"{"follower_id":"alice","following_id":"bob"}"#;
    let resp: StatusResponse = call(&app, Method::POST, "/api/v1/unfollow", Some(body)).await;
    assert_eq!(resp.code, ResponseCode::Success);

    let resp: CountResponse =
        call(&app, Method::GET, "/api/v1/users/alice/following/count", None).await;
    assert_eq!(resp.count, 0);
}

#[tokio::test]
async fn test_mutual_route() {
    let app = app().await;
    for (a, b) in [("a", "x"), ("a", "y"), ("b", "y"), ("b", "z")] {
        follow(&app, a, b).await;
    }

    let resp: EdgeListResponse = call(&app, Method::GET, "/api/v1/users/a/mutual/b", None).await;
    assert_eq!(resp.code, ResponseCode::Success);
    assert_eq!(resp.total, 1);
    assert_eq!(resp.edges[0].following_id, "y");
}

#[tokio::test]
async fn test_errors_are_reported_in_body() {
    let app = app().await;

    let resp = follow(&app, "carol", "carol").await;
    assert_eq!(resp.code, ResponseCode::SelfFollow);

    follow(&app, "carol", "dave").await;
    let resp = follow(&app, "carol", "dave").await;
    assert_eq!(resp.code, ResponseCode::AlreadyFollowing);

    let resp: StatusResponse =
        call(&app, Method::POST, "/api/v1/follow", Some("{not json")).await;
    assert_eq!(resp.code, ResponseCode::InvalidArgument);

    let resp: StatusResponse = call(&app, Method::POST, "/api/v1/follow", Some("{}")).await;
    assert_eq!(resp.code, ResponseCode::InvalidArgument);

    let resp: EdgeListResponse = call(
        &app,
        Method::GET,
        "/api/v1/users/carol/following?page=abc",
        None,
    )
    .await;
    assert_eq!(resp.code, ResponseCode::InvalidArgument);
    assert!(resp.edges.is_empty());
}
