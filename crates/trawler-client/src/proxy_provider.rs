use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use trawler_core::error::AppError;
use trawler_core::proxy::{Proxy, ProxyCredentials, ProxyProvider};

use crate::http::{build_client, check_status, map_send_error};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Proxy-provider API client (Webshare-compatible list endpoint).
///
/// `GET {base_url}/api/v2/proxy/list/?mode=direct&page=1&page_size={batch}`
/// authenticated with `Authorization: Token {api_key}`.
#[derive(Clone)]
pub struct HttpProxyProvider {
    client: Client,
    base_url: String,
    api_key: String,
    batch_size: u32,
    timeout_secs: u64,
}

impl HttpProxyProvider {
    pub fn new(base_url: &str, api_key: &str, batch_size: u32) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(DEFAULT_TIMEOUT)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            batch_size,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        })
    }

    fn list_url(&self) -> String {
        format!(
            "{}/api/v2/proxy/list/?mode=direct&page=1&page_size={}",
            self.base_url, self.batch_size
        )
    }
}

#[derive(Deserialize)]
struct ListResponse {
    results: Vec<ProxyEntry>,
}

#[derive(Deserialize)]
struct ProxyEntry {
    proxy_address: String,
    port: u16,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default = "default_valid")]
    valid: bool,
}

fn default_valid() -> bool {
    true
}

/// Valid entries of a list response, in provider order.
fn parse_batch(body: &str) -> Result<Vec<Proxy>, AppError> {
    let response: ListResponse = serde_json::from_str(body)
        .map_err(|e| AppError::ProxyError(format!("Unexpected provider response: {e}")))?;

    Ok(response
        .results
        .into_iter()
        .filter(|entry| entry.valid)
        .map(|entry| {
            let mut proxy = Proxy::new(entry.proxy_address, entry.port);
            if let (Some(user), Some(pass)) = (entry.username, entry.password) {
                proxy = proxy.with_credentials(ProxyCredentials::new(user, pass));
            }
            if let Some(region) = entry.country_code {
                proxy = proxy.with_region(region.to_lowercase());
            }
            proxy
        })
        .collect())
}

impl ProxyProvider for HttpProxyProvider {
    async fn fetch_batch(&self) -> Result<Vec<Proxy>, AppError> {
        let response = self
            .client
            .get(self.list_url())
            .header("Authorization", format!("Token {}", self.api_key))
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout_secs))?;

        let body = check_status(response)
            .await?
            .text()
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to read provider response: {e}")))?;

        let batch = parse_batch(&body)?;
        tracing::debug!(count = batch.len(), "Fetched proxy batch");
        Ok(batch)
    }
}

/// Fixed proxy list, e.g. from `TRAWLER_PROXY_LIST`.
#[derive(Debug, Clone, Default)]
pub struct StaticProxyProvider {
    proxies: Vec<Proxy>,
}

impl StaticProxyProvider {
    pub fn new(proxies: Vec<Proxy>) -> Self {
        Self { proxies }
    }
}

impl ProxyProvider for StaticProxyProvider {
    async fn fetch_batch(&self) -> Result<Vec<Proxy>, AppError> {
        Ok(self.proxies.clone())
    }
}

/// Either provider, chosen at startup from configuration.
#[derive(Clone)]
pub enum AnyProxyProvider {
    Http(HttpProxyProvider),
    Static(StaticProxyProvider),
}

impl ProxyProvider for AnyProxyProvider {
    async fn fetch_batch(&self) -> Result<Vec<Proxy>, AppError> {
        match self {
            AnyProxyProvider::Http(p) => p.fetch_batch().await,
            AnyProxyProvider::Static(p) => p.fetch_batch().await,
        }
    }
}
