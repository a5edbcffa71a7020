use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use turnstile::command::CommandRegistry;
use turnstile::server::{management_router, ManagementServer};
use turnstile::{Engine, DEFAULT_STAGE_ORDER};

async fn get_json(router: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post_json(router: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn router_for(engine: &Engine) -> axum::Router {
    management_router(engine.clone(), &CommandRegistry::with_defaults())
}

#[tokio::test]
async fn index_lists_builtin_commands() {
    let (status, body) = get_json(router_for(&Engine::new()), "/").await;

    assert_eq!(status, StatusCode::OK);
    let commands: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["command"].as_str().unwrap())
        .collect();
    assert!(commands.contains(&"version"));
    assert!(commands.contains(&"rules"));
}

#[tokio::test]
async fn health_reports_status_and_builder() {
    let (status, body) = get_json(router_for(&Engine::new()), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn resources_reflect_traffic() {
    let engine = Engine::new();
    engine.try_enter("checkout").unwrap().complete();
    engine.try_enter("checkout").unwrap().complete();

    let (status, body) = get_json(router_for(&engine), "/resources").await;

    assert_eq!(status, StatusCode::OK);
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["resource"], "checkout");
    assert_eq!(entries[0]["total"], 2);
    assert_eq!(entries[0]["pass"], 2);
}

#[tokio::test]
async fn node_detail_includes_stages_and_origins() {
    let engine = Engine::new();
    engine.try_enter_with_origin("checkout", Some("gateway")).unwrap().complete();

    let (status, body) = get_json(router_for(&engine), "/node?resource=checkout").await;

    assert_eq!(status, StatusCode::OK);
    let stages: Vec<&str> = body["data"]["stages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|stage| stage.as_str().unwrap())
        .collect();
    assert_eq!(stages, DEFAULT_STAGE_ORDER);
    assert_eq!(body["data"]["origins"][0]["origin"], "gateway");
}

#[tokio::test]
async fn node_detail_for_unknown_resource_is_404() {
    let (status, body) = get_json(router_for(&Engine::new()), "/node?resource=ghost").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn rules_posted_over_http_are_enforced() {
    let engine = Engine::new();

    let (status, body) = post_json(
        router_for(&engine),
        "/rules",
        serde_json::json!({
            "flow": [{ "resource": "checkout", "max_per_sec": 0 }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let rejected = engine.try_enter("checkout").unwrap_err();
    assert!(rejected.is_blocked());

    let (status, body) = get_json(router_for(&engine), "/rules").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["flow"][0]["resource"], "checkout");
}

#[tokio::test]
async fn invalid_rules_are_rejected() {
    let (status, body) = post_json(
        router_for(&Engine::new()),
        "/rules",
        serde_json::json!({
            "flow": [{ "resource": "checkout" }]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn live_server_round_trip() {
    let engine = Engine::new();
    engine.try_enter("checkout").unwrap().complete();

    let server = ManagementServer::new(engine, "127.0.0.1:0".parse().unwrap());
    let handle = server.start().await.unwrap();

    let url = format!("http://{}/version", handle.addr());
    let body: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["data"]["name"], "turnstile");

    handle.stop().await.unwrap();
}
