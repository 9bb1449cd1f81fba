use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::job::{Job, NewJob};
use crate::job_queue::{MAX_BATCH_SIZE, OutboundMessage, QueueProvider};

/// A job accepted by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueuedJob {
    pub job_id: String,
    pub message_id: String,
}

/// A job the queue refused, alone or with the rest of its chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedJob {
    pub job_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEnqueueReport {
    pub accepted: Vec<EnqueuedJob>,
    pub failed: Vec<FailedJob>,
    /// Number of `send_batch` calls issued.
    pub provider_calls: usize,
}

impl BatchEnqueueReport {
    /// Some entries were accepted and some were not.
    pub fn is_partial(&self) -> bool {
        !self.accepted.is_empty() && !self.failed.is_empty()
    }
}

/// Validates jobs and submits them to the durable queue.
#[derive(Clone)]
pub struct QueueClient<Q: QueueProvider> {
    provider: Q,
}

impl<Q: QueueProvider> QueueClient<Q> {
    pub fn new(provider: Q) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Q {
        &self.provider
    }

    /// Submits one job, assigning an id and timestamp if absent.
    pub async fn enqueue(&self, job: NewJob) -> Result<EnqueuedJob, AppError> {
        job.validate()?;
        let job = job.into_job();
        let outcome = self.provider.send_batch(vec![outbound(&job)?]).await?;

        if let Some(sent) = outcome.successful.into_iter().next() {
            tracing::info!(job_id = %job.id, source = %job.platform(), message_id = %sent.message_id, "Job enqueued");
            return Ok(EnqueuedJob {
                job_id: job.id,
                message_id: sent.message_id,
            });
        }
        let reason = outcome
            .failed
            .into_iter()
            .next()
            .map(|f| f.error)
            .unwrap_or_else(|| "no result returned".into());
        Err(AppError::QueueError(format!(
            "Failed to enqueue job {}: {reason}",
            job.id
        )))
    }

    /// Submits jobs in chunks of at most [`MAX_BATCH_SIZE`].
    ///
    /// Every entry is validated before the first provider call. A report with
    /// some failed entries is returned as `Ok`; if nothing was accepted the
    /// whole batch fails with [`AppError::QueueError`].
    pub async fn enqueue_batch(&self, jobs: Vec<NewJob>) -> Result<BatchEnqueueReport, AppError> {
        if jobs.is_empty() {
            return Err(AppError::ValidationError(
                "'jobs' must be a non-empty array".into(),
            ));
        }
        let invalid: Vec<String> = jobs
            .iter()
            .enumerate()
            .filter_map(|(i, job)| job.validate().err().map(|e| format!("[{i}] {e}")))
            .collect();
        if !invalid.is_empty() {
            return Err(AppError::ValidationError(format!(
                "Invalid jobs: {}",
                invalid.join("; ")
            )));
        }

        let jobs: Vec<Job> = jobs.into_iter().map(NewJob::into_job).collect();
        let mut report = BatchEnqueueReport::default();

        for chunk in jobs.chunks(MAX_BATCH_SIZE) {
            let messages = chunk.iter().map(outbound).collect::<Result<Vec<_>, _>>()?;
            report.provider_calls += 1;

            match self.provider.send_batch(messages).await {
                Ok(outcome) => {
                    report
                        .accepted
                        .extend(outcome.successful.into_iter().map(|s| EnqueuedJob {
                            job_id: s.entry_id,
                            message_id: s.message_id,
                        }));
                    report
                        .failed
                        .extend(outcome.failed.into_iter().map(|f| FailedJob {
                            job_id: f.entry_id,
                            error: f.error,
                        }));
                }
                Err(e) => {
                    tracing::warn!(error = %e, size = chunk.len(), "Batch chunk rejected");
                    let error = e.to_string();
                    report.failed.extend(chunk.iter().map(|job| FailedJob {
                        job_id: job.id.clone(),
                        error: error.clone(),
                    }));
                }
            }
        }

        if report.accepted.is_empty() {
            let first = report
                .failed
                .first()
                .map(|f| f.error.as_str())
                .unwrap_or("unknown error");
            return Err(AppError::QueueError(format!(
                "All {} jobs failed to enqueue: {first}",
                report.failed.len()
            )));
        }

        tracing::info!(
            accepted = report.accepted.len(),
            failed = report.failed.len(),
            calls = report.provider_calls,
            "Batch enqueued"
        );
        Ok(report)
    }
}

fn outbound(job: &Job) -> Result<OutboundMessage, AppError> {
    Ok(OutboundMessage {
        entry_id: job.id.clone(),
        body: job.to_body()?,
        delay: Duration::from_secs(u64::from(job.delay_seconds)),
    })
}
