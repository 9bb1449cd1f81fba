use std::time::Duration;

use reqwest::{Client, Response};
use trawler_core::error::AppError;
use url::Url;

pub(crate) const USER_AGENT: &str = concat!("trawler/", env!("CARGO_PKG_VERSION"));

pub(crate) fn build_client(timeout: Duration) -> Result<Client, AppError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::ConfigError(format!("HTTP client: {e}")))
}

/// Maps a transport failure onto the error taxonomy.
pub(crate) fn map_send_error(e: reqwest::Error, timeout_secs: u64) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout_secs)
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed: {e}"))
    } else {
        AppError::NetworkError(e.to_string())
    }
}

/// Passes successful responses through; everything else becomes
/// [`AppError::HttpError`] carrying the status and a body excerpt.
pub(crate) async fn check_status(response: Response) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message: String = body.chars().take(200).collect();
    Err(AppError::HttpError {
        status: status.as_u16(),
        message: if message.is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            message
        },
    })
}

/// Only `http` and `https` URLs with a host are navigable.
pub(crate) fn validate_target_url(raw: &str) -> Result<Url, AppError> {
    let parsed =
        Url::parse(raw).map_err(|e| AppError::ValidationError(format!("Invalid URL '{raw}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::ValidationError(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }
    if parsed.host_str().is_none() {
        return Err(AppError::ValidationError(format!("URL '{raw}' has no host")));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_target_url() {
        assert!(validate_target_url("https://www.reddit.com/r/rust").is_ok());
        assert!(validate_target_url("http://example.com").is_ok());
        assert!(validate_target_url("file:///etc/passwd").is_err());
        assert!(validate_target_url("javascript:alert(1)").is_err());
        assert!(validate_target_url("not a url").is_err());
    }
}
