use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::job::{Job, WorkerConfig};
use crate::job_queue::{QueueProvider, ReceivedMessage};
use crate::processor::{
    JobProcessor, ProcessOutcome, ProcessorEvent, ProcessorReporter, TracingProcessorReporter,
};
use crate::proxy::ProxyProvider;
use crate::session::SessionLauncher;
use crate::traits::BlobStore;

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    Polling,
    MessageReceived {
        message_id: &'a str,
        receive_count: u32,
    },
    MessageRejected {
        message_id: &'a str,
        error: &'a str,
    },
    JobCompleted {
        job_id: &'a str,
        result_key: &'a str,
    },
    JobFailed {
        job_id: &'a str,
        error: &'a str,
    },
    ShuttingDown {
        worker_id: &'a str,
        sessions_closed: usize,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            WorkerEvent::Polling => {
                tracing::debug!("Polling for messages");
            }
            WorkerEvent::MessageReceived {
                message_id,
                receive_count,
            } => {
                tracing::info!(%message_id, %receive_count, "Message received");
            }
            WorkerEvent::MessageRejected { message_id, error } => {
                tracing::warn!(%message_id, %error, "Undecodable message");
            }
            WorkerEvent::JobCompleted { job_id, result_key } => {
                tracing::info!(%job_id, %result_key, "Job completed");
            }
            WorkerEvent::JobFailed { job_id, error } => {
                tracing::warn!(%job_id, %error, "Job failed, left for redelivery");
            }
            WorkerEvent::ShuttingDown {
                worker_id,
                sessions_closed,
            } => {
                tracing::info!(%worker_id, %sessions_closed, "Worker shutting down");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

impl ProcessorReporter for TracingWorkerReporter {
    fn report(&self, event: ProcessorEvent<'_>) {
        ProcessorReporter::report(&TracingProcessorReporter, event);
    }
}

/// Consumes the durable queue, one job per processor invocation.
pub struct WorkerService<Q, L, P, B>
where
    Q: QueueProvider,
    L: SessionLauncher,
    P: ProxyProvider,
    B: BlobStore,
{
    queue: Q,
    processor: JobProcessor<L, P, B>,
    config: WorkerConfig,
}

impl<Q, L, P, B> WorkerService<Q, L, P, B>
where
    Q: QueueProvider,
    L: SessionLauncher,
    P: ProxyProvider,
    B: BlobStore,
{
    pub fn new(queue: Q, processor: JobProcessor<L, P, B>, config: WorkerConfig) -> Self {
        Self {
            queue,
            processor,
            config,
        }
    }

    /// Run the worker loop until cancellation.
    ///
    /// Cancellation is observed between jobs; a job in flight runs to completion.
    pub async fn run<WR>(&self, cancel_token: CancellationToken, reporter: &WR) -> Result<(), AppError>
    where
        WR: WorkerReporter + ProcessorReporter,
    {
        WorkerReporter::report(
            reporter,
            WorkerEvent::Started {
                worker_id: &self.config.worker_id,
            },
        );

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            WorkerReporter::report(reporter, WorkerEvent::Polling);

            match self.queue.receive().await {
                Ok(Some(message)) => {
                    // Failures are already recorded and nacked.
                    let _ = self.handle_message(&message, reporter).await;
                }
                Ok(None) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to receive message");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval * 2) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        let sessions_closed = match self.processor.launcher().close_all().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to close browser sessions");
                0
            }
        };
        WorkerReporter::report(
            reporter,
            WorkerEvent::ShuttingDown {
                worker_id: &self.config.worker_id,
                sessions_closed,
            },
        );
        WorkerReporter::report(
            reporter,
            WorkerEvent::Stopped {
                worker_id: &self.config.worker_id,
            },
        );

        Ok(())
    }

    /// Handles at most one message. `Ok(None)` when the queue is empty; the
    /// job's own error when it failed.
    pub async fn process_next<WR>(&self, reporter: &WR) -> Result<Option<ProcessOutcome>, AppError>
    where
        WR: WorkerReporter + ProcessorReporter,
    {
        let Some(message) = self.queue.receive().await? else {
            return Ok(None);
        };
        let outcome = self.handle_message(&message, reporter).await;
        if let Err(e) = self.processor.launcher().close_all().await {
            tracing::warn!(error = %e, "Failed to close browser sessions");
        }
        outcome.map(Some)
    }

    async fn handle_message<WR>(
        &self,
        message: &ReceivedMessage,
        reporter: &WR,
    ) -> Result<ProcessOutcome, AppError>
    where
        WR: WorkerReporter + ProcessorReporter,
    {
        WorkerReporter::report(
            reporter,
            WorkerEvent::MessageReceived {
                message_id: &message.message_id,
                receive_count: message.receive_count,
            },
        );

        let job = match Job::from_body(&message.body) {
            Ok(job) => job,
            Err(e) => {
                let error = e.to_string();
                WorkerReporter::report(
                    reporter,
                    WorkerEvent::MessageRejected {
                        message_id: &message.message_id,
                        error: &error,
                    },
                );
                self.nack(message).await;
                return Err(e);
            }
        };

        match self.processor.process(&job, reporter).await {
            Ok(outcome) => {
                WorkerReporter::report(
                    reporter,
                    WorkerEvent::JobCompleted {
                        job_id: &job.id,
                        result_key: &outcome.result_key,
                    },
                );
                if let Err(e) = self.queue.ack(&message.receipt_handle).await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to ack message");
                }
                Ok(outcome)
            }
            Err(e) => {
                let error = e.to_string();
                WorkerReporter::report(
                    reporter,
                    WorkerEvent::JobFailed {
                        job_id: &job.id,
                        error: &error,
                    },
                );
                self.nack(message).await;
                Err(e)
            }
        }
    }

    async fn nack(&self, message: &ReceivedMessage) {
        if let Err(e) = self
            .queue
            .nack(&message.receipt_handle, self.config.failure_backoff)
            .await
        {
            tracing::error!(message_id = %message.message_id, error = %e, "Failed to nack message");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::job::NewJob;
    use crate::processor::ProcessorConfig;
    use crate::proxy::{ProxyPool, ProxyPoolConfig};
    use crate::retry::RetryPolicy;
    use crate::store::ResultStore;
    use crate::testutil::*;
    use crate::traits::ExtractorRegistry;

    type TestWorker = WorkerService<MockQueue, MockLauncher, MockProxyProvider, MemoryBlobStore>;

    fn worker(queue: MockQueue, extractor: MockExtractor, launcher: MockLauncher, blobs: MemoryBlobStore) -> TestWorker {
        let processor = JobProcessor::new(
            launcher,
            ProxyPool::new(MockProxyProvider::new(test_proxies(2)), ProxyPoolConfig::default()),
            ResultStore::new(blobs),
            ExtractorRegistry::new().register("reddit", Arc::new(extractor)),
            ProcessorConfig {
                retry: RetryPolicy::default().with_max_retries(0),
                ..ProcessorConfig::default()
            },
        );
        let config = WorkerConfig::default()
            .with_worker_id("test-worker")
            .with_poll_interval(Duration::from_millis(10))
            .with_failure_backoff(Duration::from_secs(7));
        WorkerService::new(queue, processor, config)
    }

    fn body(source: &str) -> String {
        NewJob::new(source).into_job().to_body().unwrap()
    }

    #[tokio::test]
    async fn test_process_next_acks_success() {
        let queue = MockQueue::new();
        queue.push(&body("reddit"));
        let blobs = MemoryBlobStore::new();
        let w = worker(queue.clone(), MockExtractor::new(json!({})), MockLauncher::new(), blobs.clone());

        let outcome = w.process_next(&MockReporter::new()).await.unwrap().unwrap();

        assert!(outcome.result_key.starts_with("reddit/"));
        assert_eq!(queue.acked(), vec!["rh-1".to_string()]);
        assert!(queue.nacked().is_empty());
        assert_eq!(blobs.keys().len(), 1);
    }

    #[tokio::test]
    async fn test_process_next_nacks_failure() {
        let queue = MockQueue::new();
        queue.push(&body("reddit"));
        let extractor = MockExtractor::with_error(AppError::ExtractionError("no posts".into()));
        let w = worker(queue.clone(), extractor, MockLauncher::new(), MemoryBlobStore::new());

        let err = w.process_next(&MockReporter::new()).await.unwrap_err();

        assert!(matches!(err, AppError::ExtractionError(_)));
        assert!(queue.acked().is_empty());
        assert_eq!(queue.nacked(), vec![("rh-1".to_string(), Duration::from_secs(7))]);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_nacked() {
        let queue = MockQueue::new();
        queue.push("not json");
        let reporter = MockReporter::new();
        let w = worker(queue.clone(), MockExtractor::new(json!({})), MockLauncher::new(), MemoryBlobStore::new());

        assert!(w.process_next(&reporter).await.is_err());
        assert_eq!(queue.nacked().len(), 1);
        assert!(reporter.labels().contains(&"MessageRejected".to_string()));
    }

    #[tokio::test]
    async fn test_process_next_on_empty_queue() {
        let w = worker(MockQueue::new(), MockExtractor::new(json!({})), MockLauncher::new(), MemoryBlobStore::new());
        assert!(w.process_next(&MockReporter::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_drains_queue_then_stops_on_cancel() {
        let queue = MockQueue::new();
        queue.push(&body("reddit"));
        queue.push(&body("reddit"));
        let launcher = MockLauncher::new();
        let w = worker(queue.clone(), MockExtractor::new(json!({})), launcher.clone(), MemoryBlobStore::new());
        let reporter = MockReporter::new();
        let token = CancellationToken::new();

        let cancel = token.clone();
        let watcher = queue.clone();
        tokio::spawn(async move {
            while watcher.acked().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            cancel.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), w.run(token, &reporter))
            .await
            .expect("worker did not stop")
            .unwrap();

        assert_eq!(queue.acked().len(), 2);
        let labels = reporter.labels();
        assert_eq!(labels.first().map(String::as_str), Some("Started"));
        assert_eq!(labels.last().map(String::as_str), Some("Stopped"));
        assert!(labels.contains(&"ShuttingDown".to_string()));
        assert_eq!(launcher.close_all_calls(), 1);
    }
}
