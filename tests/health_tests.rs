mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use common::create_test_app;

#[tokio::test]
async fn liveness_requires_no_auth() {
    let app = create_test_app(None);
    let response = app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "Service is running");
}

#[tokio::test]
async fn health_is_hidden_when_admin_password_unset() {
    let app = create_test_app(None);
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_rejects_wrong_bearer() {
    let app = create_test_app(Some("topsecret"));
    let response = app
        .oneshot(
            Request::get("/health")
                .header(header::AUTHORIZATION, "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_reports_zero_counts_on_a_fresh_hub() {
    let app = create_test_app(Some("topsecret"));
    let response = app
        .oneshot(
            Request::get("/health")
                .header(header::AUTHORIZATION, "Bearer topsecret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["connections"], 0);
    assert_eq!(body["rooms"], 0);
    assert_eq!(body["typingKeys"], 0);
}

#[tokio::test]
async fn websocket_upgrade_without_token_is_rejected_before_upgrade() {
    let app = create_test_app(None);
    let response = app
        .oneshot(
            Request::get("/ws")
                .header(header::CONNECTION, "upgrade")
                .header(header::UPGRADE, "websocket")
                .header("sec-websocket-version", "13")
                .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
