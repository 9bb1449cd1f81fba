pub mod config;
pub mod error;
pub mod job;
pub mod job_queue;
pub mod models;
pub mod processor;
pub mod proxy;
pub mod queue;
pub mod retry;
pub mod session;
pub mod store;
pub mod traits;
pub mod worker;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use config::{Environment, PipelineConfig};
pub use error::AppError;
pub use job::{Job, NewJob, WorkerConfig};
pub use job_queue::{QueueProvider, ReceivedMessage};
pub use models::{ErrorRecord, ScrapeResult};
pub use processor::{JobProcessor, ProcessOutcome, ProcessorConfig, TracingProcessorReporter};
pub use proxy::{Proxy, ProxyFilter, ProxyPool, ProxyPoolConfig, ProxyProvider};
pub use queue::{BatchEnqueueReport, QueueClient};
pub use retry::{FailureKind, RetryPolicy, classify, with_retry};
pub use session::{BrowserSession, ChallengeSolver, PageHandle, SessionLauncher, SessionOptions};
pub use store::ResultStore;
pub use traits::{BlobStore, Extractor, ExtractorRegistry};
pub use worker::{TracingWorkerReporter, WorkerService};
