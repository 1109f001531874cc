use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use rstest::*;
use serde_json::{json, Value};
use tower::ServiceExt;

use depot_core::memory::{MemoryBlobStore, MemoryMetadataStore, MemoryStagingBackend};
use depot_core::{SessionManager, UploadConfig};
use depot_http::Depot;

fn router_with(config: UploadConfig) -> Router {
    let manager = SessionManager::new(
        Arc::new(MemoryMetadataStore::default()),
        Arc::new(MemoryStagingBackend::default()),
        Arc::new(MemoryBlobStore::new(4)),
        config,
    );
    Depot::new(manager).router().expect("router")
}

fn router() -> Router {
    router_with(UploadConfig::default())
}

async fn send(router: &Router, method: &str, uri: &str, body: Body) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .unwrap();
    router.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    hyper::body::to_bytes(response.into_body())
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn init(router: &Router, filename: &str, total_chunks: u32, chunk_size: u64) -> String {
    let body = json!({
        "filename": filename,
        "total_chunks": total_chunks,
        "chunk_size": chunk_size,
    });
    let response = send(router, "POST", "/uploads", Body::from(body.to_string())).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["session_id"]
        .as_str()
        .unwrap()
        .to_string()
}

async fn put_chunk(router: &Router, session: &str, index: u32, bytes: &'static [u8]) -> Response {
    send(
        router,
        "PUT",
        &format!("/uploads/{session}/chunks/{index}"),
        Body::from(bytes),
    )
    .await
}

fn error_code(body: &Value) -> &str {
    body["errors"][0]["code"].as_str().unwrap()
}

#[tokio::test]
async fn upload_then_download_round_trip() {
    let router = router();
    let session = init(&router, "a.txt", 3, 4).await;

    for (index, bytes) in [(0, &b"abcd"[..]), (2, &b"ij"[..]), (1, &b"efgh"[..])] {
        let response = put_chunk(&router, &session, index, bytes).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    let response = send(&router, "GET", &format!("/uploads/{session}"), Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let status = body_json(response).await;
    assert_eq!(status["status"], "in_progress");
    assert_eq!(status["received_chunks"], json!([0, 1, 2]));
    assert_eq!(status["missing_chunks"], json!([]));

    let response = send(
        &router,
        "POST",
        &format!("/uploads/{session}/finalize"),
        Body::empty(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let file_id = body_json(response).await["file_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = send(&router, "GET", &format!("/uploads/{session}"), Body::empty()).await;
    let status = body_json(response).await;
    assert_eq!(status["status"], "completed");
    assert_eq!(status["file_id"], file_id.as_str());

    let response = send(&router, "GET", "/files/a.txt", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
    assert_eq!(headers[header::CONTENT_LENGTH], "10");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"a.txt\""
    );
    assert_eq!(
        headers["x-content-sha256"],
        "72399361da6a7754fec986dca5b7cbaf1c810a28ded4abaf56b2106d06cb78b0"
    );
    assert_eq!(headers["depot-api-version"], "1");
    assert_eq!(body_bytes(response).await, b"abcdefghij");
}

#[tokio::test]
async fn status_reports_missing_chunks() {
    let router = router();
    let session = init(&router, "b.bin", 4, 2).await;
    put_chunk(&router, &session, 2, b"zz").await;

    let response = send(&router, "GET", &format!("/uploads/{session}"), Body::empty()).await;
    let status = body_json(response).await;
    assert_eq!(status["received_chunks"], json!([2]));
    assert_eq!(status["missing_chunks"], json!([0, 1, 3]));
    assert!(status.get("file_id").is_none());
}

#[tokio::test]
async fn incomplete_finalize_is_unprocessable() {
    let router = router();
    let session = init(&router, "b.bin", 2, 4).await;
    put_chunk(&router, &session, 0, b"abcd").await;

    let response = send(
        &router,
        "POST",
        &format!("/uploads/{session}/finalize"),
        Body::empty(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(&body_json(response).await), "INVALID_STATE");

    let response = send(&router, "GET", "/files/b.bin", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body_json(response).await), "NOT_FOUND");
}

#[tokio::test]
async fn abort_then_finalize_is_rejected() {
    let router = router();
    let session = init(&router, "c.bin", 2, 4).await;
    put_chunk(&router, &session, 0, b"abcd").await;
    put_chunk(&router, &session, 1, b"efgh").await;

    let response = send(&router, "DELETE", &format!("/uploads/{session}"), Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = send(&router, "DELETE", &format!("/uploads/{session}"), Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(
        &router,
        "POST",
        &format!("/uploads/{session}/finalize"),
        Body::empty(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = put_chunk(&router, &session, 0, b"abcd").await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[rstest]
#[case::empty_filename(json!({"filename": "", "total_chunks": 1, "chunk_size": 1}))]
#[case::zero_chunks(json!({"filename": "a", "total_chunks": 0, "chunk_size": 1}))]
#[case::zero_chunk_size(json!({"filename": "a", "total_chunks": 1, "chunk_size": 0}))]
#[case::missing_field(json!({"filename": "a", "total_chunks": 1}))]
#[case::negative(json!({"filename": "a", "total_chunks": -1, "chunk_size": 1}))]
#[tokio::test]
async fn bad_init_requests_are_rejected(#[case] body: Value) {
    let router = router();
    let response = send(&router, "POST", "/uploads", Body::from(body.to_string())).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body_json(response).await), "INVALID_ARGUMENT");
}

#[rstest]
#[case::not_a_uuid("/uploads/not-a-uuid", StatusCode::BAD_REQUEST)]
#[case::traversal("/uploads/..%2F..%2Fetc", StatusCode::BAD_REQUEST)]
#[case::unknown("/uploads/6f1c1f2e-8a4b-4c1e-9a57-0d7e2f3b9c11", StatusCode::NOT_FOUND)]
#[tokio::test]
async fn session_ids_are_validated(#[case] uri: &str, #[case] expected: StatusCode) {
    let router = router();
    let response = send(&router, "GET", uri, Body::empty()).await;
    assert_eq!(response.status(), expected);
}

#[tokio::test]
async fn chunk_index_is_validated() {
    let router = router();
    let session = init(&router, "d.bin", 2, 4).await;

    let response = put_chunk(&router, &session, 2, b"abcd").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &router,
        "PUT",
        &format!("/uploads/{session}/chunks/first"),
        Body::from(&b"abcd"[..]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = put_chunk(&router, &session, 0, b"abcde").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bodies_larger_than_max_chunk_size_are_refused() {
    let router = router_with(UploadConfig {
        max_chunk_size: 8,
        ..UploadConfig::default()
    });
    let session = init(&router, "e.bin", 1, 8).await;

    let response = put_chunk(&router, &session, 0, b"0123456789abcdef").await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let response = put_chunk(&router, &session, 0, b"01234567").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
