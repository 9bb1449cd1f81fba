use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use trawler_core::QueueClient;
use trawler_core::testutil::MockQueue;
use trawler_server::routes;
use trawler_server::state::AppState;

pub const TEST_API_KEY: &str = "test-secret-key";

pub struct TestApp {
    pub router: Router,
    pub queue: MockQueue,
}

/// Router over an in-memory queue.
pub fn setup_test_app() -> TestApp {
    let queue = MockQueue::new();
    let state = Arc::new(AppState::new(QueueClient::new(queue.clone()), TEST_API_KEY));
    TestApp {
        router: routes::router(state),
        queue,
    }
}

pub fn authed_post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
