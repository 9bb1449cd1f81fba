use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::AppError;

/// Failure class assigned to an attempt error by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Malformed job or configuration. Never retried.
    Validation,
    /// Network timeout, reset or refused connection.
    Transient,
    /// 429/502/503/504 or an explicit throttling signal.
    RateLimited,
    /// 403/407 or a proxy-level connection failure.
    ProxyFault,
    /// The automation session or target closed unexpectedly.
    ProtocolFault,
    /// A bot challenge that has not yet survived a rotation.
    ChallengeWall,
    /// Result or error persistence failed.
    Storage,
    /// Anything else, including a challenge wall that persisted after rotation.
    Fatal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::Transient => "transient",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::ProxyFault => "proxy_fault",
            FailureKind::ProtocolFault => "protocol_fault",
            FailureKind::ChallengeWall => "challenge_wall",
            FailureKind::Storage => "storage",
            FailureKind::Fatal => "fatal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::Transient
                | FailureKind::RateLimited
                | FailureKind::ProxyFault
                | FailureKind::ProtocolFault
                | FailureKind::ChallengeWall
        )
    }

    /// The proxy used by the failed attempt must be evicted from the pool.
    pub fn requires_rotation(&self) -> bool {
        matches!(self, FailureKind::ProxyFault | FailureKind::ChallengeWall)
    }

    /// The next attempt must run in a freshly launched browser session.
    pub fn requires_fresh_session(&self) -> bool {
        matches!(
            self,
            FailureKind::ProxyFault | FailureKind::ProtocolFault | FailureKind::ChallengeWall
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const PROXY_MARKERS: &[&str] = &[
    "err_proxy",
    "err_tunnel_connection_failed",
    "err_no_supported_proxies",
    "proxy connection",
    "proxy authentication",
    "proxy error",
    "407",
];

const PROTOCOL_MARKERS: &[&str] = &[
    "target closed",
    "session closed",
    "browser closed",
    "browser has disconnected",
    "execution context was destroyed",
    "websocket closed",
];

const RATE_LIMIT_MARKERS: &[&str] = &["429", "too many requests", "rate limit"];

const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "econnreset",
    "econnrefused",
    "connection refused",
    "connection reset",
    "socket hang up",
    "net::err_",
];

const CHALLENGE_MARKERS: &[&str] = &["captcha", "challenge", "are you a robot", "unusual traffic"];

/// Classifies a free-form error message, as produced by extractors and the browser.
///
/// Proxy markers win over transient ones so that `net::ERR_PROXY_CONNECTION_FAILED`
/// rotates the proxy instead of retrying through it.
pub fn classify_message(message: &str) -> Option<FailureKind> {
    let lower = message.to_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if has(PROXY_MARKERS) || (lower.contains("proxy") && lower.contains("refused")) {
        Some(FailureKind::ProxyFault)
    } else if has(PROTOCOL_MARKERS) {
        Some(FailureKind::ProtocolFault)
    } else if has(RATE_LIMIT_MARKERS) {
        Some(FailureKind::RateLimited)
    } else if has(TRANSIENT_MARKERS) {
        Some(FailureKind::Transient)
    } else if has(CHALLENGE_MARKERS) {
        Some(FailureKind::ChallengeWall)
    } else {
        None
    }
}

/// Classifies an HTTP status from the target or the proxy.
pub fn classify_status(status: u16) -> FailureKind {
    match status {
        429 | 502 | 503 | 504 => FailureKind::RateLimited,
        403 | 407 => FailureKind::ProxyFault,
        408 | 500 => FailureKind::Transient,
        _ => FailureKind::Fatal,
    }
}

/// Assigns a [`FailureKind`] to an error. Pure: no pool or session side effects.
pub fn classify(error: &AppError) -> FailureKind {
    match error {
        AppError::ValidationError(_)
        | AppError::ConfigError(_)
        | AppError::SerializationError(_) => FailureKind::Validation,
        AppError::HttpError { status, .. } => classify_status(*status),
        AppError::RateLimitExceeded => FailureKind::RateLimited,
        AppError::Timeout(_) => FailureKind::Transient,
        AppError::NetworkError(msg) => classify_message(msg).unwrap_or(FailureKind::Transient),
        AppError::ProxyError(_) => FailureKind::ProxyFault,
        AppError::ProtocolError(_) => FailureKind::ProtocolFault,
        AppError::ChallengeWall { persistent, .. } => {
            if *persistent {
                FailureKind::Fatal
            } else {
                FailureKind::ChallengeWall
            }
        }
        AppError::PoolExhausted => FailureKind::Fatal,
        AppError::BrowserError(msg) => {
            classify_message(msg).unwrap_or(FailureKind::ProtocolFault)
        }
        AppError::ExtractionError(msg) | AppError::Generic(msg) => {
            classify_message(msg).unwrap_or(FailureKind::Fatal)
        }
        AppError::StorageError(_) => FailureKind::Storage,
        AppError::QueueError(_) | AppError::DatabaseError(_) => FailureKind::Transient,
    }
}

/// Bounded exponential backoff with optional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Pre-jitter delay after the failure of attempt `attempt` (0-based):
    /// `min(initial_delay * factor^attempt, max_delay)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay.as_millis() as f64;
        let cap = self.max_delay.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let ms = (initial * self.factor.powi(exponent)).min(cap);
        Duration::from_millis(ms as u64)
    }

    /// Delay actually slept, with the jitter multiplier applied when enabled.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }
        let multiplier: f64 = rand::rng().random_range(0.7..=1.3);
        Duration::from_millis((base.as_millis() as f64 * multiplier) as u64)
    }
}

/// What an attempt knows about the attempts before it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptState {
    pub attempt_index: u32,
    pub last_error: Option<String>,
    pub last_failure: Option<FailureKind>,
    /// Delay slept before this attempt. Zero for the first.
    pub next_delay: Duration,
}

impl AttemptState {
    pub fn is_first(&self) -> bool {
        self.attempt_index == 0
    }
}

/// Observability hook run before each backoff sleep. Must not alter control flow.
pub trait RetryObserver: Send + Sync {
    fn on_retry(&self, error: &AppError, kind: FailureKind, attempt: u32, delay: Duration) {
        let _ = (error, kind, attempt, delay);
    }
}

/// Observer that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRetryObserver;

impl RetryObserver for NoopRetryObserver {}

/// Observer that logs each retry through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRetryObserver;

impl RetryObserver for TracingRetryObserver {
    fn on_retry(&self, error: &AppError, kind: FailureKind, attempt: u32, delay: Duration) {
        tracing::warn!(
            %attempt,
            %kind,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Attempt failed, retrying"
        );
    }
}

/// Runs `attempt_fn` until it succeeds, a non-retryable failure occurs, or
/// `policy.max_retries` retries are spent.
///
/// The last error is returned unchanged so callers can classify it again.
pub async fn with_retry<T, F, Fut, O>(
    policy: &RetryPolicy,
    observer: &O,
    mut attempt_fn: F,
) -> Result<T, AppError>
where
    F: FnMut(AttemptState) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
    O: RetryObserver + ?Sized,
{
    let mut state = AttemptState::default();
    loop {
        let error = match attempt_fn(state.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let attempt = state.attempt_index;
        let kind = classify(&error);
        if !kind.is_retryable() || attempt >= policy.max_retries {
            return Err(error);
        }

        let delay = policy.delay_for(attempt);
        observer.on_retry(&error, kind, attempt, delay);
        tokio::time::sleep(delay).await;

        state = AttemptState {
            attempt_index: attempt + 1,
            last_error: Some(error.to_string()),
            last_failure: Some(kind),
            next_delay: delay,
        };
    }
}
