//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::job_queue::{
    FailedEntry, OutboundMessage, QueueProvider, ReceivedMessage, SendBatchOutcome, SentMessage,
};
use crate::processor::{ProcessorEvent, ProcessorReporter};
use crate::proxy::{Proxy, ProxyProvider};
use crate::session::{
    BrowserSession, CHALLENGE_PROBE, ChallengeInfo, ChallengeSolver, PageHandle, SessionLauncher,
    SessionOptions,
};
use crate::traits::{BlobStore, Extractor};
use crate::worker::{WorkerEvent, WorkerReporter};

/// Script a [`MockSolver`] runs to clear the challenge on a [`MockPage`].
pub const MOCK_CLEAR_SCRIPT: &str = "window.__trawlerChallengeCleared = true";

/// `n` proxies `10.0.0.1:8000` .. `10.0.0.n:8000`.
pub fn test_proxies(n: usize) -> Vec<Proxy> {
    (1..=n)
        .map(|i| Proxy::new(format!("10.0.0.{i}"), 8000))
        .collect()
}

// ---------------------------------------------------------------------------
// MockProxyProvider
// ---------------------------------------------------------------------------

/// Provider that returns a fixed batch, or fails with a network error.
#[derive(Clone)]
pub struct MockProxyProvider {
    batch: Arc<Mutex<Vec<Proxy>>>,
    failure: Arc<Mutex<Option<String>>>,
    calls: Arc<AtomicUsize>,
}

impl MockProxyProvider {
    pub fn new(batch: Vec<Proxy>) -> Self {
        Self {
            batch: Arc::new(Mutex::new(batch)),
            failure: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Provider whose every fetch fails with `AppError::NetworkError(message)`.
    pub fn failing(message: &str) -> Self {
        let provider = Self::new(Vec::new());
        provider.fail_with(message);
        provider
    }

    /// Makes every later fetch fail.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProxyProvider for MockProxyProvider {
    async fn fetch_batch(&self) -> Result<Vec<Proxy>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(AppError::NetworkError(message));
        }
        Ok(self.batch.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// MockPage
// ---------------------------------------------------------------------------

/// Page that records navigations and answers the challenge probe.
#[derive(Clone, Default)]
pub struct MockPage {
    visited: Arc<Mutex<Vec<String>>>,
    goto_results: Arc<Mutex<Vec<Result<(), AppError>>>>,
    challenge: Arc<Mutex<Option<Value>>>,
    scripts: Arc<Mutex<Vec<String>>>,
    html: Arc<Mutex<String>>,
    closed: Arc<AtomicUsize>,
}

impl MockPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results for successive `goto` calls; `Ok(())` once exhausted.
    pub fn with_goto_results(self, results: Vec<Result<(), AppError>>) -> Self {
        *self.goto_results.lock().unwrap() = results;
        self
    }

    /// Value returned by the challenge probe until cleared.
    pub fn with_challenge(self, challenge: Value) -> Self {
        *self.challenge.lock().unwrap() = Some(challenge);
        self
    }

    pub fn with_html(self, html: &str) -> Self {
        *self.html.lock().unwrap() = html.to_string();
        self
    }

    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().unwrap().clone()
    }

    /// Scripts evaluated, excluding the challenge probe.
    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageHandle for MockPage {
    async fn goto(&self, url: &str) -> Result<(), AppError> {
        self.visited.lock().unwrap().push(url.to_string());
        let mut results = self.goto_results.lock().unwrap();
        if results.is_empty() {
            Ok(())
        } else {
            results.remove(0)
        }
    }

    async fn content(&self) -> Result<String, AppError> {
        Ok(self.html.lock().unwrap().clone())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, AppError> {
        if script == CHALLENGE_PROBE {
            return Ok(self.challenge.lock().unwrap().clone().unwrap_or(Value::Null));
        }
        if script == MOCK_CLEAR_SCRIPT {
            *self.challenge.lock().unwrap() = None;
        }
        self.scripts.lock().unwrap().push(script.to_string());
        Ok(Value::Null)
    }

    async fn url(&self) -> Result<Option<String>, AppError> {
        Ok(self.visited.lock().unwrap().last().cloned())
    }

    async fn close(&self) -> Result<(), AppError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockSession / MockLauncher
// ---------------------------------------------------------------------------

pub struct MockSession {
    id: String,
    proxy: Option<Proxy>,
    page: MockPage,
    healthy: bool,
}

impl BrowserSession for MockSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    async fn new_page(&self) -> Result<Box<dyn PageHandle>, AppError> {
        Ok(Box::new(self.page.clone()))
    }

    async fn is_healthy(&self) -> bool {
        self.healthy
    }
}

/// Launcher that records launch options and closed session ids.
#[derive(Clone, Default)]
pub struct MockLauncher {
    launched: Arc<Mutex<Vec<SessionOptions>>>,
    closed: Arc<Mutex<Vec<String>>>,
    launch_errors: Arc<Mutex<Vec<AppError>>>,
    page: MockPage,
    unhealthy: Arc<AtomicBool>,
    close_all_calls: Arc<AtomicUsize>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every session hands out clones of `page` (shared state).
    pub fn with_page(mut self, page: MockPage) -> Self {
        self.page = page;
        self
    }

    /// Sessions report themselves unhealthy.
    pub fn with_unhealthy_sessions(self) -> Self {
        self.unhealthy.store(true, Ordering::SeqCst);
        self
    }

    /// Errors for successive launches before launches start succeeding.
    pub fn with_launch_errors(self, errors: Vec<AppError>) -> Self {
        *self.launch_errors.lock().unwrap() = errors;
        self
    }

    pub fn launched(&self) -> Vec<SessionOptions> {
        self.launched.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }

    pub fn close_all_calls(&self) -> usize {
        self.close_all_calls.load(Ordering::SeqCst)
    }
}

impl SessionLauncher for MockLauncher {
    type Session = MockSession;

    async fn launch(&self, options: &SessionOptions) -> Result<MockSession, AppError> {
        {
            let mut errors = self.launch_errors.lock().unwrap();
            if !errors.is_empty() {
                return Err(errors.remove(0));
            }
        }
        let mut launched = self.launched.lock().unwrap();
        launched.push(options.clone());
        Ok(MockSession {
            id: format!("session-{}", launched.len()),
            proxy: options.proxy.clone(),
            page: self.page.clone(),
            healthy: !self.unhealthy.load(Ordering::SeqCst),
        })
    }

    async fn close(&self, session: MockSession) -> Result<(), AppError> {
        self.closed.lock().unwrap().push(session.id);
        Ok(())
    }

    async fn close_all(&self) -> Result<usize, AppError> {
        self.close_all_calls.fetch_add(1, Ordering::SeqCst);
        let launched = self.launched.lock().unwrap().len();
        let closed = self.closed.lock().unwrap().len();
        Ok(launched.saturating_sub(closed))
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

type ErrorFactory = Arc<dyn Fn() -> AppError + Send + Sync>;

/// Extractor returning scripted payloads or errors.
#[derive(Clone)]
pub struct MockExtractor {
    responses: Arc<Mutex<Vec<Result<Value, AppError>>>>,
    default: Value,
    always_fail: Option<ErrorFactory>,
    navigate: bool,
    calls: Arc<AtomicUsize>,
}

impl MockExtractor {
    pub fn new(data: Value) -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            default: data,
            always_fail: None,
            navigate: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fails once with `error`, then returns `{"default": true}`.
    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    /// Successive responses; `{"default": true}` once exhausted.
    pub fn with_responses(responses: Vec<Result<Value, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::new(serde_json::json!({"default": true}))
        }
    }

    pub fn always_failing<F>(error: F) -> Self
    where
        F: Fn() -> AppError + Send + Sync + 'static,
    {
        Self {
            always_fail: Some(Arc::new(error)),
            ..Self::new(Value::Null)
        }
    }

    /// Navigates to `params.url` before answering.
    pub fn navigating(data: Value) -> Self {
        Self {
            navigate: true,
            ..Self::new(data)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn scrape(
        &self,
        page: &dyn PageHandle,
        params: &Map<String, Value>,
    ) -> Result<Value, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.navigate {
            if let Some(url) = params.get("url").and_then(Value::as_str) {
                page.goto(url).await?;
            }
        }
        if let Some(factory) = &self.always_fail {
            return Err(factory());
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(self.default.clone())
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockSolver
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockSolver {
    clears: bool,
    calls: Arc<AtomicUsize>,
}

impl MockSolver {
    /// Solver that clears a [`MockPage`] challenge.
    pub fn clearing() -> Self {
        Self {
            clears: true,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Solver that always declines.
    pub fn declining() -> Self {
        Self {
            clears: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChallengeSolver for MockSolver {
    fn provider(&self) -> &str {
        "mock"
    }

    async fn solve(
        &self,
        page: &dyn PageHandle,
        _challenge: &ChallengeInfo,
    ) -> Result<bool, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.clears {
            page.evaluate(MOCK_CLEAR_SCRIPT).await?;
        }
        Ok(self.clears)
    }
}

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

/// In-memory blob store keyed like the real one.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<Mutex<BTreeMap<String, (Vec<u8>, String)>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later write fail with `AppError::StorageError(message)`.
    pub fn fail_writes(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect()
    }

    pub fn get_json(&self, key: &str) -> Option<Value> {
        let objects = self.objects.lock().unwrap();
        let (body, _) = objects.get(key)?;
        serde_json::from_slice(body).ok()
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(_, ct)| ct.clone())
    }
}

impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), AppError> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(AppError::StorageError(message));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (body, content_type.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockQueue
// ---------------------------------------------------------------------------

/// In-memory queue recording sends, acks and nacks.
#[derive(Clone, Default)]
pub struct MockQueue {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    batch_sizes: Arc<Mutex<Vec<usize>>>,
    call_failures: Arc<Mutex<HashMap<usize, AppError>>>,
    reject_next: Arc<AtomicUsize>,
    inbox: Arc<Mutex<Vec<ReceivedMessage>>>,
    pushed: Arc<AtomicUsize>,
    acked: Arc<Mutex<Vec<String>>>,
    nacked: Arc<Mutex<Vec<(String, Duration)>>>,
}

impl MockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the `index`-th `send_batch` call (0-based) as a whole.
    pub fn fail_call(&self, index: usize, error: AppError) {
        self.call_failures.lock().unwrap().insert(index, error);
    }

    /// Rejects the first `n` entries of the next `send_batch` call.
    pub fn reject_entries(&self, n: usize) {
        self.reject_next.store(n, Ordering::SeqCst);
    }

    /// Adds a deliverable message; receipt handles are `rh-1`, `rh-2`, ...
    pub fn push(&self, body: &str) {
        let n = self.pushed.fetch_add(1, Ordering::SeqCst) + 1;
        self.inbox.lock().unwrap().push(ReceivedMessage {
            message_id: format!("msg-{n}"),
            receipt_handle: format!("rh-{n}"),
            body: body.to_string(),
            receive_count: 1,
        });
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn nacked(&self) -> Vec<(String, Duration)> {
        self.nacked.lock().unwrap().clone()
    }
}

impl QueueProvider for MockQueue {
    async fn send_batch(&self, messages: Vec<OutboundMessage>) -> Result<SendBatchOutcome, AppError> {
        let index = {
            let mut sizes = self.batch_sizes.lock().unwrap();
            sizes.push(messages.len());
            sizes.len() - 1
        };
        if let Some(error) = self.call_failures.lock().unwrap().remove(&index) {
            return Err(error);
        }

        let reject = self.reject_next.swap(0, Ordering::SeqCst);
        let mut outcome = SendBatchOutcome::default();
        for (i, message) in messages.into_iter().enumerate() {
            if i < reject {
                outcome.failed.push(FailedEntry {
                    entry_id: message.entry_id,
                    error: "rejected".into(),
                });
                continue;
            }
            let mut sent = self.sent.lock().unwrap();
            outcome.successful.push(SentMessage {
                entry_id: message.entry_id.clone(),
                message_id: format!("sent-{}", sent.len() + 1),
            });
            sent.push(message);
        }
        Ok(outcome)
    }

    async fn receive(&self) -> Result<Option<ReceivedMessage>, AppError> {
        let mut inbox = self.inbox.lock().unwrap();
        if inbox.is_empty() {
            Ok(None)
        } else {
            Ok(Some(inbox.remove(0)))
        }
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), AppError> {
        self.acked.lock().unwrap().push(receipt_handle.to_string());
        Ok(())
    }

    async fn nack(&self, receipt_handle: &str, delay: Duration) -> Result<(), AppError> {
        self.nacked
            .lock()
            .unwrap()
            .push((receipt_handle.to_string(), delay));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records worker and processor event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let label = match &event {
            WorkerEvent::Started { .. } => "Started",
            WorkerEvent::Polling => "Polling",
            WorkerEvent::MessageReceived { .. } => "MessageReceived",
            WorkerEvent::MessageRejected { .. } => "MessageRejected",
            WorkerEvent::JobCompleted { .. } => "JobCompleted",
            WorkerEvent::JobFailed { .. } => "JobFailed",
            WorkerEvent::ShuttingDown { .. } => "ShuttingDown",
            WorkerEvent::Stopped { .. } => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

impl ProcessorReporter for MockReporter {
    fn report(&self, event: ProcessorEvent<'_>) {
        let label = match &event {
            ProcessorEvent::Received { .. } => "Received",
            ProcessorEvent::Validated { .. } => "Validated",
            ProcessorEvent::SessionAcquired { .. } => "SessionAcquired",
            ProcessorEvent::Attempting { .. } => "Attempting",
            ProcessorEvent::Rotating { .. } => "Rotating",
            ProcessorEvent::Succeeded { .. } => "Succeeded",
            ProcessorEvent::FailedFatal { .. } => "FailedFatal",
            ProcessorEvent::Released { .. } => "Released",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}
