use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use trawler_core::AppError;
use trawler_core::job::NewJob;

use crate::auth::require_api_key;
use crate::dto::{
    BatchRequest, BatchResponse, EnqueuedJobResponse, HealthResponse, JobRequest,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/jobs", post(create_job))
        .route("/v1/jobs/batch", post(create_batch))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/jobs",
    request_body = JobRequest,
    responses(
        (status = 202, description = "Job enqueued", body = EnqueuedJobResponse),
        (status = 400, description = "Malformed job", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "Body larger than 1 MiB", body = crate::dto::ErrorResponse),
        (status = 503, description = "Queue unavailable", body = crate::dto::ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    body: Result<axum::Json<JobRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let axum::Json(body) = body?;
    let receipt = state.intake.enqueue(NewJob::from(body)).await?;

    Ok((StatusCode::ACCEPTED, axum::Json(EnqueuedJobResponse::from(receipt))))
}

#[utoipa::path(
    post,
    path = "/v1/jobs/batch",
    request_body = BatchRequest,
    responses(
        (status = 202, description = "Batch enqueued, possibly partially", body = BatchResponse),
        (status = 400, description = "Missing or empty 'jobs', or an entry lacks 'source'", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "Body larger than 1 MiB", body = crate::dto::ErrorResponse),
        (status = 503, description = "No job could be enqueued", body = crate::dto::ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    body: Result<axum::Json<BatchRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let axum::Json(body) = body?;
    let jobs = match body.jobs {
        Some(jobs) if !jobs.is_empty() => jobs,
        _ => {
            return Err(AppError::ValidationError("'jobs' must be a non-empty array".into()).into());
        }
    };

    let report = state
        .intake
        .enqueue_batch(jobs.into_iter().map(NewJob::from).collect())
        .await?;

    Ok((StatusCode::ACCEPTED, axum::Json(BatchResponse::from(report))))
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health() -> impl IntoResponse {
    axum::Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
