use async_trait::async_trait;
use trawler_core::error::AppError;
use trawler_core::job::NewJob;
use trawler_core::job_queue::QueueProvider;
use trawler_core::queue::{BatchEnqueueReport, EnqueuedJob, QueueClient};

/// The enqueue side of the pipeline, as seen by route handlers.
#[async_trait]
pub trait JobIntake: Send + Sync {
    async fn enqueue(&self, job: NewJob) -> Result<EnqueuedJob, AppError>;

    async fn enqueue_batch(&self, jobs: Vec<NewJob>) -> Result<BatchEnqueueReport, AppError>;
}

#[async_trait]
impl<Q: QueueProvider + 'static> JobIntake for QueueClient<Q> {
    async fn enqueue(&self, job: NewJob) -> Result<EnqueuedJob, AppError> {
        QueueClient::enqueue(self, job).await
    }

    async fn enqueue_batch(&self, jobs: Vec<NewJob>) -> Result<BatchEnqueueReport, AppError> {
        QueueClient::enqueue_batch(self, jobs).await
    }
}

/// Shared application state, available to handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub intake: Box<dyn JobIntake>,
    /// Bearer token required on `/v1` routes.
    pub api_key: String,
}

impl AppState {
    pub fn new<Q: QueueProvider + 'static>(queue: QueueClient<Q>, api_key: impl Into<String>) -> Self {
        Self {
            intake: Box::new(queue),
            api_key: api_key.into(),
        }
    }
}
