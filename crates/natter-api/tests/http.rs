//! End-to-end checks of the REST surface, driven through the router with
//! `oneshot` against an in-memory database.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use natter_api::images::ImageHost;
use natter_api::routes::router;
use natter_api::state::{AppState, AppStateInner};
use natter_db::Database;
use natter_gateway::Dispatcher;
use natter_types::events::GatewayEvent;

const HOSTED_URL: &str = "https://images.test/hosted.png";

struct FixedHost;

#[async_trait]
impl ImageHost for FixedHost {
    async fn upload(&self, _data_uri: &str) -> anyhow::Result<String> {
        Ok(HOSTED_URL.to_string())
    }
}

fn test_state() -> AppState {
    Arc::new(AppStateInner {
        db: Arc::new(Database::open_in_memory().unwrap()),
        jwt_secret: "test-secret".into(),
        dispatcher: Dispatcher::new(),
        images: Arc::new(FixedHost),
        secure_cookies: false,
    })
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// Returns (user id, token).
async fn signup(app: &Router, name: &str) -> (String, String) {
    let (status, body) = call(
        app,
        Method::POST,
        "/api/auth/signup",
        None,
        Some(json!({
            "fullName": name,
            "email": format!("{}@example.com", name),
            "password": "correct horse",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "signup failed: {}", body);
    (
        body["_id"].as_str().unwrap().to_string(),
        body["token"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let app = router(test_state());

    let (status, _) = call(&app, Method::GET, "/api/messages/users", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, Method::GET, "/api/messages/users", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn duplicate_email_conflicts() {
    let app = router(test_state());
    signup(&app, "alice").await;

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/auth/signup",
        None,
        Some(json!({ "fullName": "Alice Again", "email": "ALICE@example.com", "password": "secret123" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn login_cookie_authenticates() {
    let app = router(test_state());
    signup(&app, "alice").await;

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "email": "alice@example.com", "password": "correct horse" }).to_string(),
        ))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let set_cookie = resp
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let cookie = set_cookie.split(';').next().unwrap().to_string();
    assert!(cookie.starts_with("jwt="));

    let req = Request::builder()
        .uri("/api/auth/check")
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "email": "alice@example.com", "password": "wrong password" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn message_errors_are_generic_500s() {
    let app = router(test_state());
    let (_, token) = signup(&app, "alice").await;

    let unknown = format!("/api/messages/send/{}", Uuid::new_v4());
    let (status, body) = call(&app, Method::POST, &unknown, Some(&token), Some(json!({ "text": "hi" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Internal server error" }));

    let (status, body) = call(&app, Method::GET, "/api/messages/not-a-uuid", Some(&token), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Internal server error" }));
}

#[tokio::test]
async fn conversation_flow() {
    let state = test_state();
    let app = router(state.clone());

    let (alice, alice_token) = signup(&app, "alice").await;
    let (bob, bob_token) = signup(&app, "bob").await;
    let (carol, _) = signup(&app, "carol").await;

    // Bob offline: stays sent
    let (status, first) = call(
        &app,
        Method::POST,
        &format!("/api/messages/send/{}", bob),
        Some(&alice_token),
        Some(json!({ "text": "hello bob" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["status"], "sent");

    // Bob online: delivered and pushed once
    let bob_uuid: Uuid = bob.parse().unwrap();
    let (_conn, mut bob_rx) = state.dispatcher.register(bob_uuid).await;
    let (_, second) = call(
        &app,
        Method::POST,
        &format!("/api/messages/send/{}", bob),
        Some(&alice_token),
        Some(json!({ "text": "are you there?" })),
    )
    .await;
    assert_eq!(second["status"], "delivered");
    match bob_rx.try_recv().unwrap() {
        GatewayEvent::NewMessage(msg) => assert_eq!(msg.id.to_string(), second["_id"].as_str().unwrap()),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(bob_rx.try_recv().is_err());

    // Image-only reply
    let (status, reply) = call(
        &app,
        Method::POST,
        &format!("/api/messages/send/{}", alice),
        Some(&bob_token),
        Some(json!({ "image": "data:image/png;base64,iVBORw0KGgo=" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(reply.get("text").is_none());
    assert_eq!(reply["image"], HOSTED_URL);

    // Conversation, newest first
    let (_, messages) = call(&app, Method::GET, &format!("/api/messages/{}", alice), Some(&bob_token), None).await;
    let ids: Vec<&str> = messages
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["_id"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        vec![
            reply["_id"].as_str().unwrap(),
            second["_id"].as_str().unwrap(),
            first["_id"].as_str().unwrap(),
        ]
    );

    // Bob sees alice's messages; idempotent
    for _ in 0..2 {
        let (status, body) = call(&app, Method::PATCH, &format!("/api/messages/seen/{}", alice), Some(&bob_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));
    }
    let (_, messages) = call(&app, Method::GET, &format!("/api/messages/{}", bob), Some(&alice_token), None).await;
    for msg in messages.as_array().unwrap() {
        let expected = if msg["senderId"] == alice.as_str() { "seen" } else { "sent" };
        assert_eq!(msg["status"], expected);
    }

    // Sidebar: bob (talked to) before carol (never)
    let (_, sidebar) = call(&app, Method::GET, "/api/messages/users", Some(&alice_token), None).await;
    let sidebar = sidebar.as_array().unwrap();
    assert_eq!(sidebar.len(), 2);
    assert_eq!(sidebar[0]["_id"], bob.as_str());
    assert!(sidebar[0]["lastMessage"].is_string());
    assert_eq!(sidebar[1]["_id"], carol.as_str());
    assert!(sidebar[1]["lastMessage"].is_null());
    assert!(sidebar[0].get("password").is_none());
}

#[tokio::test]
async fn profile_picture_goes_through_image_host() {
    let app = router(test_state());
    let (_, token) = signup(&app, "alice").await;

    let (status, body) = call(
        &app,
        Method::PUT,
        "/api/auth/update-profile",
        Some(&token),
        Some(json!({ "profilePic": "data:image/png;base64,iVBORw0KGgo=" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["profilePic"], HOSTED_URL);
}
