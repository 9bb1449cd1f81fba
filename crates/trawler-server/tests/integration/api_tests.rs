use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use trawler_core::AppError;
use trawler_core::job::Job;

use crate::common::{authed_post, setup_test_app};

async fn body_json(response: Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_returns_200_without_auth() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn openapi_document_lists_job_routes() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(Request::get("/api-docs/openapi.json").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["paths"]["/v1/jobs"].is_object());
    assert!(json["paths"]["/v1/jobs/batch"].is_object());
}

#[tokio::test]
async fn missing_token_returns_401() {
    let app = setup_test_app();

    let request = Request::post("/v1/jobs")
        .header("content-type", "application/json")
        .body(Body::from(json!({"source": "reddit"}).to_string()))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.queue.batch_sizes().is_empty());
}

#[tokio::test]
async fn wrong_token_returns_401() {
    let app = setup_test_app();

    let request = Request::post("/v1/jobs")
        .header("authorization", "Bearer wrong-key")
        .header("content-type", "application/json")
        .body(Body::from(json!({"source": "reddit"}).to_string()))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"], "unauthorized");
}

#[tokio::test]
async fn create_job_returns_202_with_ids() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(authed_post(
            "/v1/jobs",
            json!({"id": "abc", "source": "reddit", "params": {"subreddit": "rust"}, "delaySeconds": 5}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["jobId"], "abc");
    assert!(json["messageId"].is_string());

    let sent = app.queue.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].delay.as_secs(), 5);
    let job = Job::from_body(&sent[0].body).unwrap();
    assert_eq!(job.platform(), "reddit");
    assert_eq!(job.params["subreddit"], "rust");
}

#[tokio::test]
async fn create_job_without_source_returns_400() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(authed_post("/v1/jobs", json!({"params": {}})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "validation_error");
    assert!(app.queue.batch_sizes().is_empty());
}

#[tokio::test]
async fn malformed_json_returns_400() {
    let app = setup_test_app();

    let request = Request::post("/v1/jobs")
        .header("authorization", "Bearer test-secret-key")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_body_returns_413() {
    let app = setup_test_app();
    let padding = "x".repeat(2 * 1024 * 1024);

    let response = app
        .router
        .oneshot(authed_post(
            "/v1/jobs",
            json!({"source": "reddit", "params": {"padding": padding}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.queue.batch_sizes().is_empty());
}

#[tokio::test]
async fn unsafe_job_id_returns_400() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(authed_post("/v1/jobs", json!({"id": "../../x", "source": "reddit"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "validation_error");
    assert!(app.queue.batch_sizes().is_empty());
}

#[tokio::test]
async fn empty_batch_rejected_before_queue_call() {
    let app = setup_test_app();

    let response = app
        .router
        .clone()
        .oneshot(authed_post("/v1/jobs/batch", json!({"jobs": []})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .router
        .oneshot(authed_post("/v1/jobs/batch", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(app.queue.batch_sizes().is_empty());
}

#[tokio::test]
async fn batch_entry_without_source_rejects_batch() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(authed_post(
            "/v1/jobs/batch",
            json!({"jobs": [{"source": "reddit"}, {"params": {"q": 1}}]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["message"].as_str().unwrap().contains("[1]"));
    assert!(app.queue.batch_sizes().is_empty());
}

#[tokio::test]
async fn batch_is_chunked_into_provider_calls() {
    let app = setup_test_app();
    let jobs: Vec<Value> = (0..25).map(|i| json!({"source": "amazon", "params": {"i": i}})).collect();

    let response = app
        .router
        .oneshot(authed_post("/v1/jobs/batch", json!({ "jobs": jobs })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["accepted"].as_array().unwrap().len(), 25);
    assert_eq!(json["failed"].as_array().unwrap().len(), 0);
    assert_eq!(json["partial"], false);
    assert_eq!(app.queue.batch_sizes(), vec![10, 10, 5]);
}

#[tokio::test]
async fn partial_batch_failure_is_reported() {
    let app = setup_test_app();
    app.queue.fail_call(1, AppError::QueueError("throttled".into()));
    let jobs: Vec<Value> = (0..12).map(|_| json!({"source": "instagram"})).collect();

    let response = app
        .router
        .oneshot(authed_post("/v1/jobs/batch", json!({ "jobs": jobs })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["accepted"].as_array().unwrap().len(), 10);
    assert_eq!(json["failed"].as_array().unwrap().len(), 2);
    assert_eq!(json["partial"], true);
    assert!(json["failed"][0]["error"].as_str().unwrap().contains("throttled"));
}

#[tokio::test]
async fn total_queue_failure_returns_503() {
    let app = setup_test_app();
    app.queue.fail_call(0, AppError::QueueError("down".into()));

    let response = app
        .router
        .oneshot(authed_post("/v1/jobs/batch", json!({"jobs": [{"source": "reddit"}]})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["error"], "queue_error");
}
