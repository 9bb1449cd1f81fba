use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams, RequestPattern,
    RequestStage,
};
use chromiumoxide::cdp::browser_protocol::input::{DispatchMouseEventParams, DispatchMouseEventType};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, ResourceType, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use futures::StreamExt;
use rand::Rng;
use serde_json::Value;
use tokio::task::JoinHandle;
use trawler_core::error::AppError;
use trawler_core::session::PageHandle;

use crate::stealth::{Fingerprint, Point, mouse_path, random_point};

const BLOCKED_RESOURCES: &[ResourceType] =
    &[ResourceType::Image, ResourceType::Font, ResourceType::Media];

const NAVIGATION_STATUS: &str = "(() => { const e = performance.getEntriesByType('navigation')[0]; \
     return e && e.responseStatus ? e.responseStatus : 0; })()";

pub(crate) fn cdp_error(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::BrowserError(format!("{context}: {e}"))
}

/// One tab of a [`crate::browser::ChromeSession`], stealth-configured on open.
pub struct ChromePage {
    page: Page,
    navigation_timeout: Duration,
    interceptor: Option<JoinHandle<()>>,
}

impl ChromePage {
    pub(crate) async fn attach(
        page: Page,
        fingerprint: &Fingerprint,
        block_resources: bool,
        navigation_timeout: Duration,
    ) -> Result<Self, AppError> {
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            fingerprint.init_script(),
        ))
        .await
        .map_err(|e| cdp_error("Failed to install stealth script", e))?;

        page.execute(SetUserAgentOverrideParams {
            user_agent: fingerprint.user_agent.clone(),
            accept_language: Some(fingerprint.languages.join(",")),
            platform: Some(fingerprint.platform.to_string()),
            user_agent_metadata: None,
        })
        .await
        .map_err(|e| cdp_error("Failed to override user agent", e))?;

        let interceptor = if block_resources {
            Some(block_non_essential(&page).await?)
        } else {
            None
        };

        Ok(Self {
            page,
            navigation_timeout,
            interceptor,
        })
    }

    async fn move_mouse(&self, path: &[Point]) -> Result<(), AppError> {
        for point in path {
            self.page
                .execute(DispatchMouseEventParams::new(
                    DispatchMouseEventType::MouseMoved,
                    point.x,
                    point.y,
                ))
                .await
                .map_err(|e| cdp_error("Mouse event failed", e))?;
            let pause = rand::rng().random_range(8..25);
            tokio::time::sleep(Duration::from_millis(pause)).await;
        }
        Ok(())
    }
}

/// Pauses every request and aborts images, fonts and media.
async fn block_non_essential(page: &Page) -> Result<JoinHandle<()>, AppError> {
    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(|e| cdp_error("Failed to subscribe to requests", e))?;

    page.execute(EnableParams {
        patterns: Some(vec![RequestPattern {
            url_pattern: Some("*".into()),
            resource_type: None,
            request_stage: Some(RequestStage::Request),
        }]),
        handle_auth_requests: None,
    })
    .await
    .map_err(|e| cdp_error("Failed to enable request interception", e))?;

    let page = page.clone();
    Ok(tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let outcome = if BLOCKED_RESOURCES.contains(&event.resource_type) {
                page.execute(FailRequestParams::new(
                    event.request_id.clone(),
                    ErrorReason::BlockedByClient,
                ))
                .await
                .map(|_| ())
            } else {
                page.execute(ContinueRequestParams::new(event.request_id.clone()))
                    .await
                    .map(|_| ())
            };
            if let Err(e) = outcome {
                tracing::trace!(error = %e, "Interception reply failed");
            }
        }
    }))
}

#[async_trait]
impl PageHandle for ChromePage {
    async fn goto(&self, url: &str) -> Result<(), AppError> {
        let timeout = self.navigation_timeout;
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| AppError::Timeout(timeout.as_secs()))?
            .map_err(|e| cdp_error(&format!("Navigation to {url} failed"), e))?;

        let status = self.evaluate(NAVIGATION_STATUS).await?.as_u64().unwrap_or(0);
        if status >= 400 {
            return Err(AppError::HttpError {
                status: status as u16,
                message: format!("Navigation to {url}"),
            });
        }
        Ok(())
    }

    async fn content(&self) -> Result<String, AppError> {
        self.page
            .content()
            .await
            .map_err(|e| cdp_error("Failed to read page content", e))
    }

    async fn evaluate(&self, script: &str) -> Result<Value, AppError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| cdp_error("Script evaluation failed", e))?;
        Ok(result.into_value::<Value>().unwrap_or(Value::Null))
    }

    async fn url(&self) -> Result<Option<String>, AppError> {
        self.page
            .url()
            .await
            .map_err(|e| cdp_error("Failed to read page URL", e))
    }

    /// A curved pointer sweep across the viewport and a short dwell.
    async fn humanize(&self) -> Result<(), AppError> {
        let size = self.evaluate("[window.innerWidth, window.innerHeight]").await?;
        let width = size.get(0).and_then(Value::as_f64).unwrap_or(1366.0);
        let height = size.get(1).and_then(Value::as_f64).unwrap_or(768.0);

        let steps = rand::rng().random_range(15..30);
        let path = mouse_path(random_point(width, height), random_point(width, height), steps);
        self.move_mouse(&path).await?;

        let dwell = rand::rng().random_range(200..800);
        tokio::time::sleep(Duration::from_millis(dwell)).await;
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        if let Some(task) = &self.interceptor {
            task.abort();
        }
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| cdp_error("Failed to close page", e))
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        if let Some(task) = self.interceptor.take() {
            task.abort();
        }
    }
}
