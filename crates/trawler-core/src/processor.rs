use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::job::{Job, UNKNOWN_PLATFORM, validate_job_id};
use crate::proxy::{Proxy, ProxyFilter, ProxyPool, ProxyProvider};
use crate::retry::{
    AttemptState, FailureKind, RetryObserver, RetryPolicy, TracingRetryObserver, classify,
    with_retry,
};
use crate::session::{
    BrowserSession, ChallengeGuardPage, ChallengeSolver, PageHandle, SessionLauncher,
    SessionOptions,
};
use crate::store::ResultStore;
use crate::traits::{BlobStore, Extractor, ExtractorRegistry};

/// Lifecycle events of one job invocation.
#[derive(Debug, Clone)]
pub enum ProcessorEvent<'a> {
    Received {
        job_id: &'a str,
        source: Option<&'a str>,
    },
    Validated {
        job_id: &'a str,
        platform: &'a str,
    },
    SessionAcquired {
        job_id: &'a str,
        session_id: &'a str,
        proxy: &'a str,
    },
    Attempting {
        job_id: &'a str,
        attempt: u32,
    },
    Rotating {
        job_id: &'a str,
        proxy: &'a str,
        reason: Option<FailureKind>,
        evicted: bool,
    },
    Succeeded {
        job_id: &'a str,
        result_key: &'a str,
        attempts: u32,
    },
    FailedFatal {
        job_id: &'a str,
        error: &'a AppError,
        kind: FailureKind,
        error_key: Option<&'a str>,
    },
    Released {
        job_id: &'a str,
    },
}

/// Receives processor lifecycle events (decoupled logging).
pub trait ProcessorReporter: Send + Sync {
    fn report(&self, event: ProcessorEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProcessorReporter;

impl ProcessorReporter for TracingProcessorReporter {
    fn report(&self, event: ProcessorEvent<'_>) {
        match event {
            ProcessorEvent::Received { job_id, source } => {
                tracing::info!(%job_id, source = source.unwrap_or("-"), "Job received");
            }
            ProcessorEvent::Validated { job_id, platform } => {
                tracing::debug!(%job_id, %platform, "Job validated");
            }
            ProcessorEvent::SessionAcquired {
                job_id,
                session_id,
                proxy,
            } => {
                tracing::info!(%job_id, %session_id, %proxy, "Browser session acquired");
            }
            ProcessorEvent::Attempting { job_id, attempt } => {
                tracing::debug!(%job_id, %attempt, "Running extractor");
            }
            ProcessorEvent::Rotating {
                job_id,
                proxy,
                reason,
                evicted,
            } => {
                tracing::warn!(%job_id, %proxy, ?reason, %evicted, "Rotating proxy and session");
            }
            ProcessorEvent::Succeeded {
                job_id,
                result_key,
                attempts,
            } => {
                tracing::info!(%job_id, %result_key, %attempts, "Job succeeded");
            }
            ProcessorEvent::FailedFatal {
                job_id,
                error,
                kind,
                error_key,
            } => {
                tracing::error!(%job_id, %kind, error = %error, ?error_key, "Job failed");
            }
            ProcessorEvent::Released { job_id } => {
                tracing::debug!(%job_id, "Session released");
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessorConfig {
    pub retry: RetryPolicy,
    /// Template for every launch; the proxy field is filled per session.
    pub session: SessionOptions,
    pub proxy_filter: ProxyFilter,
}

/// Terminal success of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub job_id: String,
    pub platform: String,
    pub result_key: String,
    pub attempts: u32,
}

struct SessionSlot<S> {
    session: Option<S>,
    proxy: Option<Proxy>,
    rotations: u32,
    attempts: u32,
}

impl<S> Default for SessionSlot<S> {
    fn default() -> Self {
        Self {
            session: None,
            proxy: None,
            rotations: 0,
            attempts: 0,
        }
    }
}

/// Drives one job end to end: validate, acquire a proxy and session, run the
/// extractor under the retry engine, persist the outcome, release the session.
pub struct JobProcessor<L, P, B>
where
    L: SessionLauncher,
    P: ProxyProvider,
    B: BlobStore,
{
    launcher: L,
    pool: ProxyPool<P>,
    store: ResultStore<B>,
    extractors: ExtractorRegistry,
    solver: Option<Arc<dyn ChallengeSolver>>,
    observer: Arc<dyn RetryObserver>,
    config: ProcessorConfig,
}

impl<L, P, B> JobProcessor<L, P, B>
where
    L: SessionLauncher,
    P: ProxyProvider,
    B: BlobStore,
{
    pub fn new(
        launcher: L,
        pool: ProxyPool<P>,
        store: ResultStore<B>,
        extractors: ExtractorRegistry,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            launcher,
            pool,
            store,
            extractors,
            solver: None,
            observer: Arc::new(TracingRetryObserver),
            config,
        }
    }

    pub fn with_solver(mut self, solver: Arc<dyn ChallengeSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn with_retry_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn pool(&self) -> &ProxyPool<P> {
        &self.pool
    }

    /// Processes one job. Exactly one artifact is written: a result on
    /// success, an error record otherwise. On failure the original error is
    /// returned so the queue layer can decide redelivery.
    pub async fn process<R>(&self, job: &Job, reporter: &R) -> Result<ProcessOutcome, AppError>
    where
        R: ProcessorReporter + ?Sized,
    {
        reporter.report(ProcessorEvent::Received {
            job_id: &job.id,
            source: job.source.as_deref(),
        });
        let platform = self.platform_of(job).to_string();

        let extractor = match self.validate(job) {
            Ok(extractor) => extractor,
            Err(e) => {
                self.record_failure(job, &platform, &e, reporter).await;
                return Err(e);
            }
        };
        reporter.report(ProcessorEvent::Validated {
            job_id: &job.id,
            platform: &platform,
        });

        let slot = Mutex::new(SessionSlot::<L::Session>::default());
        let result = with_retry(&self.config.retry, self.observer.as_ref(), |state| {
            let slot = &slot;
            let extractor = extractor.as_ref();
            async move { self.attempt(job, extractor, slot, state, reporter).await }
        })
        .await;

        let slot = slot.into_inner();
        let outcome = match result {
            Ok(payload) => match self.store.put_result(&job.id, &platform, payload).await {
                Ok(result_key) => {
                    reporter.report(ProcessorEvent::Succeeded {
                        job_id: &job.id,
                        result_key: &result_key,
                        attempts: slot.attempts,
                    });
                    Ok(ProcessOutcome {
                        job_id: job.id.clone(),
                        platform: platform.clone(),
                        result_key,
                        attempts: slot.attempts,
                    })
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to store result, not retrying");
                    self.record_failure(job, &platform, &e, reporter).await;
                    Err(e)
                }
            },
            Err(e) => {
                self.record_failure(job, &platform, &e, reporter).await;
                Err(e)
            }
        };

        if let Some(session) = slot.session {
            if let Err(e) = self.launcher.close(session).await {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to close browser session");
            }
        }
        reporter.report(ProcessorEvent::Released { job_id: &job.id });

        outcome
    }

    /// Artifact platform: the source when it is registered, `unknown` otherwise.
    fn platform_of<'j>(&self, job: &'j Job) -> &'j str {
        let platform = job.platform();
        if self.extractors.contains(platform) {
            platform
        } else {
            UNKNOWN_PLATFORM
        }
    }

    fn validate(&self, job: &Job) -> Result<Arc<dyn Extractor>, AppError> {
        validate_job_id(&job.id)?;
        let source = job
            .source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                AppError::ValidationError(format!("Job {} is missing 'source'", job.id))
            })?;

        self.extractors.get(source).ok_or_else(|| {
            AppError::ValidationError(format!(
                "Unknown source '{source}' (registered: {})",
                self.extractors.sources().join(", ")
            ))
        })
    }

    async fn attempt<R>(
        &self,
        job: &Job,
        extractor: &dyn Extractor,
        slot: &Mutex<SessionSlot<L::Session>>,
        state: AttemptState,
        reporter: &R,
    ) -> Result<Value, AppError>
    where
        R: ProcessorReporter + ?Sized,
    {
        let mut slot = slot.lock().await;
        slot.attempts += 1;

        if !state.is_first() {
            self.rotate_if_degraded(job, &mut slot, state.last_failure, reporter)
                .await;
        }

        if slot.session.is_none() {
            let proxy = self.pool.select(&self.config.proxy_filter).await?;
            let options = SessionOptions {
                proxy: Some(proxy.clone()),
                ..self.config.session.clone()
            };
            // Held before launching so a launch-time proxy fault still evicts it.
            slot.proxy = Some(proxy.clone());
            let session = self.launcher.launch(&options).await?;
            reporter.report(ProcessorEvent::SessionAcquired {
                job_id: &job.id,
                session_id: session.id(),
                proxy: &proxy.endpoint(),
            });
            slot.session = Some(session);
        }

        reporter.report(ProcessorEvent::Attempting {
            job_id: &job.id,
            attempt: state.attempt_index,
        });

        let session = slot
            .session
            .as_ref()
            .ok_or_else(|| AppError::BrowserError("No browser session".into()))?;
        let page = ChallengeGuardPage::new(session.new_page().await?, self.solver.clone());
        let result = extractor.scrape(&page, &job.params).await;
        if let Err(e) = page.close().await {
            tracing::debug!(job_id = %job.id, error = %e, "Failed to close page");
        }

        match result {
            Err(AppError::ChallengeWall {
                message,
                persistent: false,
            }) if slot.rotations > 0 => Err(AppError::ChallengeWall {
                message,
                persistent: true,
            }),
            other => other,
        }
    }

    /// Replaces the session (and evicts its proxy when the last failure blames
    /// it) if the previous attempt left it degraded. Runs before the extractor,
    /// never inside classification.
    async fn rotate_if_degraded<R>(
        &self,
        job: &Job,
        slot: &mut SessionSlot<L::Session>,
        last_failure: Option<FailureKind>,
        reporter: &R,
    ) where
        R: ProcessorReporter + ?Sized,
    {
        let needs_fresh = last_failure.is_some_and(|k| k.requires_fresh_session());
        let healthy = match &slot.session {
            Some(session) => session.is_healthy().await,
            None => true,
        };
        if !needs_fresh && healthy {
            return;
        }

        let proxy = slot.proxy.take();
        let session = slot.session.take();
        if proxy.is_none() && session.is_none() {
            return;
        }

        let mut evicted = false;
        if let Some(proxy) = &proxy {
            if last_failure.is_some_and(|k| k.requires_rotation()) {
                evicted = self.pool.mark_failed(&proxy.host).await;
            }
        }
        reporter.report(ProcessorEvent::Rotating {
            job_id: &job.id,
            proxy: &proxy.as_ref().map(Proxy::endpoint).unwrap_or_default(),
            reason: last_failure,
            evicted,
        });

        if let Some(session) = session {
            if let Err(e) = self.launcher.close(session).await {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to close degraded session");
            }
        }
        slot.rotations += 1;
    }

    async fn record_failure<R>(&self, job: &Job, platform: &str, error: &AppError, reporter: &R)
    where
        R: ProcessorReporter + ?Sized,
    {
        let error_key = match self.store.put_error(&job.id, platform, error).await {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to store error record");
                None
            }
        };
        reporter.report(ProcessorEvent::FailedFatal {
            job_id: &job.id,
            error,
            kind: classify(error),
            error_key: error_key.as_deref(),
        });
    }
}
