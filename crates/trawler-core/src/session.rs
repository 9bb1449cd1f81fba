//! Browser session seam: page handles, session launchers, and the
//! navigation and challenge helpers that work against any of them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::proxy::Proxy;

/// A single page (tab) inside a browser session.
///
/// Object-safe so extractors can be written once against `&dyn PageHandle`.
#[async_trait]
pub trait PageHandle: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), AppError>;

    /// Serialized DOM of the current document.
    async fn content(&self) -> Result<String, AppError>;

    /// Runs a script in the page and returns its JSON-serializable result.
    async fn evaluate(&self, script: &str) -> Result<Value, AppError>;

    async fn url(&self) -> Result<Option<String>, AppError>;

    /// Waits until `selector` matches an element, polling the DOM.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), AppError> {
        let selector_json = serde_json::to_string(selector)?;
        let script = format!("document.querySelector({selector_json}) !== null");
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.evaluate(&script).await?.as_bool() == Some(true) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::Timeout(timeout.as_secs()));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Emits human-looking input (mouse movement, small pauses). Best effort.
    async fn humanize(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError>;
}

/// Options for launching one isolated browser context.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub proxy: Option<Proxy>,
    pub headless: bool,
    /// Abort image, font and media requests.
    pub block_resources: bool,
    pub navigation_timeout: Duration,
    /// Overrides the randomly chosen user agent.
    pub user_agent: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            proxy: None,
            headless: true,
            block_resources: true,
            navigation_timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

impl SessionOptions {
    pub fn with_proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

/// One launched browser context, exclusively owned by one job.
pub trait BrowserSession: Send + Sync {
    fn id(&self) -> &str;

    /// Proxy this session egresses through, if any.
    fn proxy(&self) -> Option<&Proxy>;

    fn new_page(&self) -> impl Future<Output = Result<Box<dyn PageHandle>, AppError>> + Send;

    /// False once the underlying browser or connection is gone.
    fn is_healthy(&self) -> impl Future<Output = bool> + Send;
}

/// Launches and tears down browser sessions.
pub trait SessionLauncher: Send + Sync + Clone {
    type Session: BrowserSession;

    fn launch(
        &self,
        options: &SessionOptions,
    ) -> impl Future<Output = Result<Self::Session, AppError>> + Send;

    /// Closes the session and releases its anonymization front.
    fn close(&self, session: Self::Session) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Closes every session still alive. Returns how many were closed.
    fn close_all(&self) -> impl Future<Output = Result<usize, AppError>> + Send;
}

/// Page-level navigation retry with a fixed delay.
///
/// `max_retries` counts retries after the first attempt. Independent of the
/// job-level retry engine.
pub async fn navigate_with_retry(
    page: &dyn PageHandle,
    url: &str,
    max_retries: u32,
    retry_delay: Duration,
) -> Result<(), AppError> {
    let mut attempt = 0;
    loop {
        match page.goto(url).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < max_retries => {
                tracing::debug!(%url, %attempt, error = %e, "Navigation failed, retrying");
                attempt += 1;
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A bot challenge found on the current page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeInfo {
    /// `recaptcha`, `hcaptcha`, `turnstile`, `cloudflare`, `perimeterx`, `amazon` or `generic`.
    pub kind: String,
    /// Selector or text marker that matched.
    pub marker: String,
    #[serde(default)]
    pub site_key: Option<String>,
}

pub(crate) const CHALLENGE_PROBE: &str = r#"(() => {
  const probes = [
    ['recaptcha', 'iframe[src*="recaptcha"]'],
    ['recaptcha', '.g-recaptcha'],
    ['hcaptcha', 'iframe[src*="hcaptcha"]'],
    ['turnstile', '.cf-turnstile'],
    ['cloudflare', '#challenge-form'],
    ['cloudflare', '#cf-challenge-running'],
    ['perimeterx', '#px-captcha'],
    ['amazon', 'form[action*="validateCaptcha"]'],
  ];
  for (const [kind, sel] of probes) {
    const el = document.querySelector(sel);
    if (el) {
      const keyed = document.querySelector('[data-sitekey]');
      return { kind, marker: sel, site_key: keyed ? keyed.getAttribute('data-sitekey') : null };
    }
  }
  const title = (document.title || '').toLowerCase();
  if (title.includes('just a moment') || title.includes('attention required')) {
    return { kind: 'cloudflare', marker: 'title', site_key: null };
  }
  const text = (document.body && document.body.innerText || '').toLowerCase().slice(0, 5000);
  for (const phrase of ['unusual traffic', 'are you a robot', 'verify you are human']) {
    if (text.includes(phrase)) return { kind: 'generic', marker: phrase, site_key: null };
  }
  return null;
})()"#;

/// Probes the page for well-known CAPTCHA and interstitial markers.
pub async fn detect_challenge(page: &dyn PageHandle) -> Result<Option<ChallengeInfo>, AppError> {
    match page.evaluate(CHALLENGE_PROBE).await? {
        Value::Null => Ok(None),
        value => Ok(Some(serde_json::from_value(value)?)),
    }
}

/// Pluggable CAPTCHA solver. Its absence only lowers the success rate.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    fn provider(&self) -> &str;

    /// Attempts to clear the challenge. `Ok(false)` means the solver declined.
    async fn solve(&self, page: &dyn PageHandle, challenge: &ChallengeInfo)
    -> Result<bool, AppError>;
}

/// Fails with [`AppError::ChallengeWall`] if a challenge is present and the
/// solver (when configured) could not clear it.
pub async fn guard_challenge(
    page: &dyn PageHandle,
    solver: Option<&dyn ChallengeSolver>,
) -> Result<(), AppError> {
    let Some(challenge) = detect_challenge(page).await? else {
        return Ok(());
    };
    tracing::warn!(kind = %challenge.kind, marker = %challenge.marker, "Challenge detected");

    if let Some(solver) = solver {
        match solver.solve(page, &challenge).await {
            Ok(true) => {
                if detect_challenge(page).await?.is_none() {
                    tracing::info!(provider = %solver.provider(), "Challenge solved");
                    return Ok(());
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(provider = %solver.provider(), error = %e, "Challenge solver failed");
            }
        }
    }

    let url = page.url().await.ok().flatten().unwrap_or_default();
    Err(AppError::ChallengeWall {
        message: format!("{} challenge ({}) at {}", challenge.kind, challenge.marker, url),
        persistent: false,
    })
}

/// Page wrapper that humanizes and checks for challenge walls after every navigation.
pub struct ChallengeGuardPage {
    inner: Box<dyn PageHandle>,
    solver: Option<Arc<dyn ChallengeSolver>>,
}

impl ChallengeGuardPage {
    pub fn new(inner: Box<dyn PageHandle>, solver: Option<Arc<dyn ChallengeSolver>>) -> Self {
        Self { inner, solver }
    }
}

#[async_trait]
impl PageHandle for ChallengeGuardPage {
    async fn goto(&self, url: &str) -> Result<(), AppError> {
        self.inner.goto(url).await?;
        if let Err(e) = self.inner.humanize().await {
            tracing::debug!(error = %e, "Humanize step failed");
        }
        guard_challenge(self.inner.as_ref(), self.solver.as_deref()).await
    }

    async fn content(&self) -> Result<String, AppError> {
        self.inner.content().await
    }

    async fn evaluate(&self, script: &str) -> Result<Value, AppError> {
        self.inner.evaluate(script).await
    }

    async fn url(&self) -> Result<Option<String>, AppError> {
        self.inner.url().await
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), AppError> {
        self.inner.wait_for_selector(selector, timeout).await
    }

    async fn humanize(&self) -> Result<(), AppError> {
        self.inner.humanize().await
    }

    async fn close(&self) -> Result<(), AppError> {
        self.inner.close().await
    }
}
