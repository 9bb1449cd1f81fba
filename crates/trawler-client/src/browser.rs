use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use futures::StreamExt;
use tokio::task::JoinHandle;
use trawler_core::error::AppError;
use trawler_core::proxy::Proxy;
use trawler_core::session::{BrowserSession, PageHandle, SessionLauncher, SessionOptions};

use crate::anonymize::ProxyFront;
use crate::page::{ChromePage, cdp_error};
use crate::stealth::{BASE_ARGS, Fingerprint};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Launches one Chromium process per session, each with its own profile
/// directory and proxy front.
///
/// Clones share a registry of live sessions so that [`SessionLauncher::close_all`]
/// can tear down whatever a job left behind.
#[derive(Clone, Default)]
pub struct ChromeLauncher {
    executable: Option<PathBuf>,
    no_sandbox: bool,
    live: Arc<Mutex<HashMap<String, Arc<SessionInner>>>>,
}

impl ChromeLauncher {
    /// Uses `CHROME_BIN` or a well-known install location when present,
    /// otherwise leaves discovery to chromiumoxide.
    pub fn new() -> Self {
        Self {
            executable: find_chrome_binary(),
            ..Self::default()
        }
    }

    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    /// Needed when running as root inside containers.
    pub fn without_sandbox(mut self) -> Self {
        self.no_sandbox = true;
        self
    }

    pub fn live_sessions(&self) -> usize {
        self.live.lock().map(|l| l.len()).unwrap_or(0)
    }

    fn register(&self, inner: Arc<SessionInner>) {
        if let Ok(mut live) = self.live.lock() {
            live.insert(inner.id.clone(), inner);
        }
    }

    fn unregister(&self, id: &str) -> Option<Arc<SessionInner>> {
        self.live.lock().ok().and_then(|mut live| live.remove(id))
    }
}

/// Tries to locate the real Chrome/Chromium binary.
///
/// Snap's `/snap/bin/chromium` wrapper strips unknown flags, so the binary
/// inside the snap is preferred.
fn find_chrome_binary() -> Option<PathBuf> {
    let candidates: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    ];

    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

/// `--proxy-server` value for a session, starting a front for credentialed proxies.
async fn proxy_route(proxy: Option<&Proxy>) -> Result<(Option<String>, Option<ProxyFront>), AppError> {
    match proxy {
        None => Ok((None, None)),
        Some(p) if p.requires_auth() => {
            let front = ProxyFront::start(p).await?;
            Ok((Some(front.server_url()), Some(front)))
        }
        Some(p) => Ok((Some(p.server_url()), None)),
    }
}

struct SessionInner {
    id: String,
    proxy: Option<Proxy>,
    browser: tokio::sync::Mutex<Browser>,
    handler: JoinHandle<()>,
    front: Mutex<Option<ProxyFront>>,
    profile_dir: PathBuf,
    fingerprint: Fingerprint,
    block_resources: bool,
    navigation_timeout: Duration,
}

impl SessionInner {
    async fn shutdown(&self) {
        {
            let mut browser = self.browser.lock().await;
            if let Err(e) = browser.close().await {
                tracing::debug!(session = %self.id, error = %e, "Browser close failed");
            }
            let _ = browser.wait().await;
        }
        self.handler.abort();
        if let Ok(mut front) = self.front.lock() {
            front.take();
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.profile_dir).await {
            tracing::debug!(dir = %self.profile_dir.display(), error = %e, "Profile cleanup failed");
        }
        tracing::debug!(session = %self.id, "Browser session closed");
    }
}

/// One isolated Chromium process bound to a single proxy.
pub struct ChromeSession {
    inner: Arc<SessionInner>,
}

impl BrowserSession for ChromeSession {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn proxy(&self) -> Option<&Proxy> {
        self.inner.proxy.as_ref()
    }

    async fn new_page(&self) -> Result<Box<dyn PageHandle>, AppError> {
        let page = self
            .inner
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(|e| cdp_error("Failed to open page", e))?;

        let page = ChromePage::attach(
            page,
            &self.inner.fingerprint,
            self.inner.block_resources,
            self.inner.navigation_timeout,
        )
        .await?;
        Ok(Box::new(page))
    }

    async fn is_healthy(&self) -> bool {
        if self.inner.handler.is_finished() {
            return false;
        }
        let browser = self.inner.browser.lock().await;
        matches!(
            tokio::time::timeout(HEALTH_TIMEOUT, browser.version()).await,
            Ok(Ok(_))
        )
    }
}

impl SessionLauncher for ChromeLauncher {
    type Session = ChromeSession;

    async fn launch(&self, options: &SessionOptions) -> Result<ChromeSession, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let profile_dir = std::env::temp_dir().join(format!("trawler-{id}"));
        let (proxy_server, front) = proxy_route(options.proxy.as_ref()).await?;
        let fingerprint = Fingerprint::random(options.user_agent.as_deref());

        let mut builder = BrowserConfig::builder()
            .disable_default_args()
            .user_data_dir(&profile_dir)
            .window_size(1366, 768)
            .args(BASE_ARGS.iter().copied())
            .arg(format!("--user-agent={}", fingerprint.user_agent));
        builder = if options.headless {
            builder.headless_mode(HeadlessMode::New)
        } else {
            builder.with_head()
        };
        if self.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(bin) = &self.executable {
            builder = builder.chrome_executable(bin);
        }
        if let Some(server) = &proxy_server {
            builder = builder.arg(format!("--proxy-server={server}"));
        }
        let config = builder
            .build()
            .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let session_id = id.clone();
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(session = %session_id, error = %e, "CDP handler stopped");
                    break;
                }
            }
        });

        let inner = Arc::new(SessionInner {
            id: id.clone(),
            proxy: options.proxy.clone(),
            browser: tokio::sync::Mutex::new(browser),
            handler,
            front: Mutex::new(front),
            profile_dir,
            fingerprint,
            block_resources: options.block_resources,
            navigation_timeout: options.navigation_timeout,
        });
        self.register(inner.clone());

        tracing::info!(
            session = %id,
            proxy = %options.proxy.as_ref().map(Proxy::endpoint).unwrap_or_else(|| "direct".into()),
            "Browser session launched"
        );
        Ok(ChromeSession { inner })
    }

    async fn close(&self, session: ChromeSession) -> Result<(), AppError> {
        if let Some(inner) = self.unregister(&session.inner.id) {
            inner.shutdown().await;
        }
        Ok(())
    }

    async fn close_all(&self) -> Result<usize, AppError> {
        let sessions: Vec<_> = match self.live.lock() {
            Ok(mut live) => live.drain().map(|(_, s)| s).collect(),
            Err(_) => Vec::new(),
        };
        for session in &sessions {
            session.shutdown().await;
        }
        Ok(sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use trawler_core::proxy::ProxyCredentials;

    use super::*;

    #[tokio::test]
    async fn test_proxy_route() {
        let (server, front) = proxy_route(None).await.unwrap();
        assert!(server.is_none() && front.is_none());

        let plain = Proxy::new("10.0.0.1", 8000);
        let (server, front) = proxy_route(Some(&plain)).await.unwrap();
        assert_eq!(server.as_deref(), Some("http://10.0.0.1:8000"));
        assert!(front.is_none());

        let authed = plain.with_credentials(ProxyCredentials::new("u", "p"));
        let (server, front) = proxy_route(Some(&authed)).await.unwrap();
        let front = front.unwrap();
        assert_eq!(server.unwrap(), front.server_url());
        assert!(!front.server_url().contains('@'));
        assert_eq!(front.upstream(), "10.0.0.1:8000");
    }

    #[tokio::test]
    async fn test_close_all_on_empty_launcher() {
        let launcher = ChromeLauncher::default();
        assert_eq!(launcher.close_all().await.unwrap(), 0);
        assert_eq!(launcher.live_sessions(), 0);
    }
}
