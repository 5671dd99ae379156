// Integration tests for the credential endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use fhirgate::api::{create_credentials_router, CredentialsAppState};
use fhirgate::credentials::CredentialStore;
use fhirgate::storage::{Database, SecretCipher};
use fhirgate::token::{Token, TokenStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn cipher() -> SecretCipher {
    SecretCipher::from_key_bytes(&[3u8; 32]).unwrap()
}

fn create_test_app(db: &Database) -> Router {
    create_credentials_router(CredentialsAppState {
        credentials: Arc::new(CredentialStore::new(db.clone(), cipher())),
    })
}

async fn call(app: &Router, method: &str, body: Option<&str>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri("/credentials");
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

const CREDENTIAL: &str = r#"{
    "client_id": "simrs-client",
    "client_secret": "s3cret",
    "token_url": "https://auth.example/oauth2/v1/accesstoken?grant_type=client_credentials"
}"#;

#[tokio::test]
async fn test_get_without_credential_is_null() {
    let db = Database::in_memory().unwrap();
    let app = create_test_app(&db);

    let (status, body) = call(&app, "GET", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn test_post_then_get() {
    let db = Database::in_memory().unwrap();
    let app = create_test_app(&db);

    let (status, body) = call(&app, "POST", Some(CREDENTIAL)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));

    let (_, body) = call(&app, "GET", None).await;
    assert_eq!(body["client_id"], "simrs-client");
    assert_eq!(body["client_secret"], "s3cret");
}

#[tokio::test]
async fn test_second_post_replaces_first() {
    let db = Database::in_memory().unwrap();
    let app = create_test_app(&db);

    call(&app, "POST", Some(CREDENTIAL)).await;
    call(
        &app,
        "POST",
        Some(r#"{"client_id":"other","client_secret":"x","token_url":"https://auth.example/t"}"#),
    )
    .await;

    let (_, body) = call(&app, "GET", None).await;
    assert_eq!(body["client_id"], "other");
}

#[tokio::test]
async fn test_invalid_bodies_rejected() {
    let db = Database::in_memory().unwrap();
    let app = create_test_app(&db);

    let (status, body) = call(&app, "POST", Some("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid credential body"));

    let (status, body) = call(
        &app,
        "POST",
        Some(r#"{"client_id":"a","client_secret":"","token_url":"https://auth.example/t"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing field 'client_secret'");

    // Nothing was stored
    let (_, body) = call(&app, "GET", None).await;
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn test_delete_clears_credential_and_token() {
    let db = Database::in_memory().unwrap();
    let app = create_test_app(&db);
    call(&app, "POST", Some(CREDENTIAL)).await;

    let tokens = TokenStore::new(db.clone(), cipher());
    tokens
        .upsert(&Token {
            access_token: "issued-for-old-credential".to_string(),
            expiry: Utc::now() + Duration::hours(1),
        })
        .await
        .unwrap();

    let (status, body) = call(&app, "DELETE", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "deleted"}));

    let (_, body) = call(&app, "GET", None).await;
    assert_eq!(body, Value::Null);
    assert!(tokens.get().await.unwrap().is_none());
}
