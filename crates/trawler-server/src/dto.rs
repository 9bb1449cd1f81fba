use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use trawler_core::job::NewJob;
use trawler_core::queue::{BatchEnqueueReport, EnqueuedJob, FailedJob};

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// A job submission. `id` and `createdAt` are assigned when absent.
#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub id: Option<String>,
    /// Platform tag selecting the extractor, e.g. `reddit`.
    pub source: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: Map<String, Value>,
    pub delay_seconds: Option<u32>,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<JobRequest> for NewJob {
    fn from(req: JobRequest) -> Self {
        NewJob {
            id: req.id,
            source: req.source,
            params: req.params,
            delay_seconds: req.delay_seconds,
            created_at: req.created_at,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct BatchRequest {
    /// Required and non-empty; validated by the handler so that a missing
    /// field yields the same error as an empty one.
    #[serde(default)]
    pub jobs: Option<Vec<JobRequest>>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnqueuedJobResponse {
    pub job_id: String,
    pub message_id: String,
}

impl From<EnqueuedJob> for EnqueuedJobResponse {
    fn from(job: EnqueuedJob) -> Self {
        Self {
            job_id: job.job_id,
            message_id: job.message_id,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailedJobResponse {
    pub job_id: String,
    pub error: String,
}

impl From<FailedJob> for FailedJobResponse {
    fn from(job: FailedJob) -> Self {
        Self {
            job_id: job.job_id,
            error: job.error,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub accepted: Vec<EnqueuedJobResponse>,
    pub failed: Vec<FailedJobResponse>,
    /// True when some, but not all, jobs were accepted.
    pub partial: bool,
}

impl From<BatchEnqueueReport> for BatchResponse {
    fn from(report: BatchEnqueueReport) -> Self {
        let partial = report.is_partial();
        Self {
            accepted: report.accepted.into_iter().map(Into::into).collect(),
            failed: report.failed.into_iter().map(Into::into).collect(),
            partial,
        }
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
