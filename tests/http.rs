//! HTTP surface, driven in-process through the router.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

use common::{setup, setup_ready};
use stateful_agent::server::router;

const BOUNDARY: &str = "test-boundary-7f3a";

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_files(files: &[(&str, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, bytes) in files {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n",
                name
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/upload_files")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let env = setup().await;
    let app = router(env.app.clone());
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_upload_list_chat_delete_flow() {
    let env = setup_ready().await;
    let app = router(env.app.clone());

    let (status, body) = send(
        &app,
        post_files(&[
            ("notes.txt", &b"The capital of France is Paris."[..]),
            ("image.png", &[0x89u8, b'P', b'N', b'G', 0, 1, 2][..]),
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["results"][0]["name"], "notes.txt");
    assert_eq!(body["results"][0]["success"], true);
    assert_eq!(body["results"][0]["chunks"], 1);
    assert_eq!(body["results"][1]["success"], false);
    assert_eq!(body["results"][1]["code"], "unsupported_format");

    let (status, body) = send(&app, get("/list_files")).await;
    assert_eq!(status, StatusCode::OK);
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["name"], "notes.txt");
    assert_eq!(files[0]["size"], 31);

    let (status, body) = send(
        &app,
        post_json(
            "/chat",
            json!({
                "message": "What is the capital of France?",
                "context": { "title": "Geography quiz" }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let response = body["response"].as_str().unwrap();
    assert!(response.contains("Paris"));

    let (status, body) = send(
        &app,
        post_json("/delete_file", json!({ "filename": "notes.txt" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = send(
        &app,
        post_json("/delete_file", json!({ "filename": "notes.txt" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let (_, body) = send(&app, get("/list_files")).await;
    assert!(body["files"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_without_files_is_bad_request() {
    let env = setup_ready().await;
    let app = router(env.app.clone());
    let (status, body) = send(&app, post_files(&[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn test_chat_before_init_is_not_ready() {
    let env = setup().await;
    let app = router(env.app.clone());
    let (status, body) = send(&app, post_json("/chat", json!({ "message": "hi" }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "not_ready");
}

#[tokio::test]
async fn test_env_update_then_reinitialize() {
    let env = setup().await;
    let app = router(env.app.clone());

    let (status, body) = send(&app, get("/get_env")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["openai_key"], false);

    let (status, body) = send(&app, post_json("/update_env", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "validation_error");

    let (status, body) = send(&app, post_json("/reinitialize_agent", json!({}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "authentication_error");

    let (status, body) = send(
        &app,
        post_json("/update_env", json!({ "openai_key": "sk-test" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, body) = send(&app, get("/get_env")).await;
    assert_eq!(body["openai_key"], true);
    assert!(!body.to_string().contains("sk-test"));

    let (status, body) = send(&app, post_json("/reinitialize_agent", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = send(&app, get("/agent_status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "ready");
    assert!(body["instance_id"].is_string());
    assert_eq!(body["tools"][0], "query_collection");
}

#[tokio::test]
async fn test_generate_endpoint() {
    let env = setup_ready().await;
    let app = router(env.app.clone());
    let (status, body) = send(
        &app,
        post_json(
            "/generate",
            json!({
                "context": { "title": "Contact form" },
                "inputType": "email",
                "inputId": "email",
                "inputName": "email",
                "placeholder": "you@example.com"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["response"].as_str().unwrap().contains("Type: email"));
}

#[tokio::test]
async fn test_reindex_endpoint() {
    let env = setup_ready().await;
    let app = router(env.app.clone());
    let (status, body) = send(&app, post_json("/reindex", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["reembedded"], 0);
}
