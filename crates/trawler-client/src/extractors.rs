use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use trawler_core::error::AppError;
use trawler_core::session::{PageHandle, navigate_with_retry};
use trawler_core::traits::Extractor;

use crate::http::validate_target_url;

/// Source tag of [`PageSnapshotExtractor`].
pub const GENERIC_SOURCE: &str = "generic";

const DEFAULT_WAIT: Duration = Duration::from_secs(10);
const NAV_RETRIES: u32 = 2;
const NAV_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Navigates to `params.url` and returns `{url, title, html}`.
///
/// An optional `params.waitFor` selector is awaited before the snapshot.
/// Navigation is retried in place (`params.navRetries`, `params.navRetryDelayMs`)
/// before a failure reaches the job-level retry engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageSnapshotExtractor;

#[async_trait]
impl Extractor for PageSnapshotExtractor {
    async fn scrape(&self, page: &dyn PageHandle, params: &Map<String, Value>) -> Result<Value, AppError> {
        let raw = params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::ValidationError("'params.url' is required".into()))?;
        let url = validate_target_url(raw)?;

        let retries = params
            .get("navRetries")
            .and_then(Value::as_u64)
            .map_or(NAV_RETRIES, |n| n.min(u64::from(u32::MAX)) as u32);
        let delay = params
            .get("navRetryDelayMs")
            .and_then(Value::as_u64)
            .map_or(NAV_RETRY_DELAY, Duration::from_millis);
        navigate_with_retry(page, url.as_str(), retries, delay).await?;

        if let Some(selector) = params.get("waitFor").and_then(Value::as_str) {
            page.wait_for_selector(selector, DEFAULT_WAIT).await?;
        }

        let title = page.evaluate("document.title").await?;
        let html = page.content().await?;
        let final_url = page.url().await?.unwrap_or_else(|| url.to_string());

        Ok(json!({
            "url": final_url,
            "title": title.as_str().unwrap_or_default(),
            "html": html,
        }))
    }
}

#[cfg(test)]
mod tests {
    use trawler_core::testutil::MockPage;

    use super::*;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_snapshot() {
        let page = MockPage::new().with_html("<html><body>hi</body></html>");

        let out = PageSnapshotExtractor
            .scrape(&page, &params(json!({"url": "https://example.com/a"})))
            .await
            .unwrap();

        assert_eq!(out["url"], "https://example.com/a");
        assert_eq!(out["html"], "<html><body>hi</body></html>");
        assert_eq!(page.visited(), vec!["https://example.com/a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_is_retried_in_place() {
        let page = MockPage::new().with_goto_results(vec![
            Err(AppError::NetworkError("net::ERR_CONNECTION_RESET".into())),
            Ok(()),
        ]);

        let out = PageSnapshotExtractor
            .scrape(&page, &params(json!({"url": "https://example.com/a"})))
            .await
            .unwrap();

        assert_eq!(out["url"], "https://example.com/a");
        assert_eq!(page.visited().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_gives_up_after_configured_retries() {
        let page = MockPage::new().with_goto_results(vec![
            Err(AppError::Timeout(30)),
            Err(AppError::Timeout(30)),
            Err(AppError::Timeout(30)),
        ]);

        let err = PageSnapshotExtractor
            .scrape(
                &page,
                &params(json!({"url": "https://example.com/a", "navRetries": 1, "navRetryDelayMs": 50})),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Timeout(30)));
        assert_eq!(page.visited().len(), 2);
    }

    #[tokio::test]
    async fn test_requires_navigable_url() {
        let page = MockPage::new();

        let missing = PageSnapshotExtractor.scrape(&page, &Map::new()).await.unwrap_err();
        assert!(matches!(missing, AppError::ValidationError(_)));

        let local = PageSnapshotExtractor
            .scrape(&page, &params(json!({"url": "file:///etc/hosts"})))
            .await
            .unwrap_err();
        assert!(matches!(local, AppError::ValidationError(_)));
        assert!(page.visited().is_empty());
    }
}
