use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use trawler_core::error::AppError;
use trawler_core::session::{ChallengeInfo, ChallengeSolver, PageHandle};

use crate::http::{build_client, check_status, map_send_error};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_WAIT: Duration = Duration::from_secs(120);

/// Solver speaking the `createTask` / `getTaskResult` protocol shared by
/// 2Captcha, CapSolver and Anti-Captcha.
#[derive(Clone)]
pub struct RemoteSolver {
    client: Client,
    provider: String,
    base_url: String,
    client_key: String,
    poll_interval: Duration,
    max_wait: Duration,
}

impl RemoteSolver {
    /// `base_url` defaults to the provider's public endpoint when known.
    pub fn new(provider: &str, client_key: &str, base_url: Option<&str>) -> Result<Self, AppError> {
        let base_url = match base_url {
            Some(url) => url.to_string(),
            None => default_base_url(provider)
                .ok_or_else(|| {
                    AppError::ConfigError(format!(
                        "TRAWLER_SOLVER_URL is required for solver provider '{provider}'"
                    ))
                })?
                .to_string(),
        };
        Ok(Self {
            client: build_client(REQUEST_TIMEOUT)?,
            provider: provider.to_lowercase(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client_key: client_key.to_string(),
            poll_interval: POLL_INTERVAL,
            max_wait: MAX_WAIT,
        })
    }

    pub fn with_polling(mut self, interval: Duration, max_wait: Duration) -> Self {
        self.poll_interval = interval;
        self.max_wait = max_wait;
        self
    }

    async fn call<T: for<'de> Deserialize<'de>>(&self, method: &str, body: &impl Serialize) -> Result<T, AppError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| map_send_error(e, REQUEST_TIMEOUT.as_secs()))?;
        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| AppError::NetworkError(format!("Invalid solver response: {e}")))
    }

    async fn request_token(&self, task: Value) -> Result<String, AppError> {
        let created: TaskResponse = self
            .call("createTask", &json!({"clientKey": self.client_key, "task": task}))
            .await?;
        created.check()?;
        let task_id = created
            .task_id
            .ok_or_else(|| AppError::ExtractionError("Solver returned no task id".into()))?;

        let deadline = tokio::time::Instant::now() + self.max_wait;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            let result: TaskResponse = self
                .call("getTaskResult", &json!({"clientKey": self.client_key, "taskId": task_id}))
                .await?;
            result.check()?;
            if result.status.as_deref() == Some("ready") {
                return result
                    .solution
                    .as_ref()
                    .and_then(solution_token)
                    .ok_or_else(|| AppError::ExtractionError("Solver returned no token".into()));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::Timeout(self.max_wait.as_secs()));
            }
        }
    }
}

fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider.to_lowercase().as_str() {
        "2captcha" | "twocaptcha" => Some("https://api.2captcha.com"),
        "capsolver" => Some("https://api.capsolver.com"),
        "anticaptcha" | "anti-captcha" => Some("https://api.anti-captcha.com"),
        _ => None,
    }
}

/// Task type for a challenge kind, or `None` when the provider cannot solve it.
fn task_type(provider: &str, kind: &str) -> Option<&'static str> {
    let capsolver = provider == "capsolver";
    match kind {
        "recaptcha" if capsolver => Some("ReCaptchaV2TaskProxyLess"),
        "recaptcha" => Some("RecaptchaV2TaskProxyless"),
        "hcaptcha" if capsolver => Some("HCaptchaTaskProxyLess"),
        "hcaptcha" => Some("HCaptchaTaskProxyless"),
        "turnstile" if capsolver => Some("AntiTurnstileTaskProxyLess"),
        "turnstile" => Some("TurnstileTaskProxyless"),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskResponse {
    #[serde(default)]
    error_id: i64,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    task_id: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    solution: Option<Value>,
}

impl TaskResponse {
    fn check(&self) -> Result<(), AppError> {
        if self.error_id == 0 {
            return Ok(());
        }
        Err(AppError::ExtractionError(format!(
            "Solver error {}: {}",
            self.error_id,
            self.error_description.as_deref().unwrap_or("unknown")
        )))
    }
}

fn solution_token(solution: &Value) -> Option<String> {
    ["gRecaptchaResponse", "token", "captchaResponse"]
        .iter()
        .find_map(|field| solution.get(field).and_then(Value::as_str))
        .map(str::to_string)
}

/// Writes the token into the response fields the widget reads, then
/// submits the enclosing form or fires the widget callback.
fn injection_script(token: &str) -> String {
    let token = Value::String(token.to_string());
    format!(
        r#"(() => {{
  const token = {token};
  const names = ['g-recaptcha-response', 'h-captcha-response', 'cf-turnstile-response'];
  let form = null;
  for (const name of names) {{
    for (const el of document.querySelectorAll(`[name="${{name}}"], #${{name}}`)) {{
      el.value = token;
      el.innerHTML = token;
      form = form || el.closest('form');
    }}
  }}
  const widget = document.querySelector('[data-callback]');
  const callback = widget && window[widget.getAttribute('data-callback')];
  if (typeof callback === 'function') {{ callback(token); return 'callback'; }}
  if (form) {{ form.submit(); return 'submitted'; }}
  return 'injected';
}})()"#
    )
}

#[async_trait]
impl ChallengeSolver for RemoteSolver {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn solve(&self, page: &dyn PageHandle, challenge: &ChallengeInfo) -> Result<bool, AppError> {
        let (Some(task), Some(site_key)) = (
            task_type(&self.provider, &challenge.kind),
            challenge.site_key.as_deref(),
        ) else {
            tracing::debug!(kind = %challenge.kind, "Challenge not solvable remotely");
            return Ok(false);
        };
        let page_url = page.url().await?.unwrap_or_default();

        let token = self
            .request_token(json!({
                "type": task,
                "websiteURL": page_url,
                "websiteKey": site_key,
            }))
            .await?;

        page.evaluate(&injection_script(&token)).await?;
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_base_url() {
        assert_eq!(default_base_url("2Captcha"), Some("https://api.2captcha.com"));
        assert!(default_base_url("acme").is_none());
        assert!(RemoteSolver::new("acme", "k", None).is_err());
        assert!(RemoteSolver::new("acme", "k", Some("https://solver.internal")).is_ok());
    }

    #[test]
    fn test_task_type() {
        assert_eq!(task_type("2captcha", "recaptcha"), Some("RecaptchaV2TaskProxyless"));
        assert_eq!(task_type("capsolver", "turnstile"), Some("AntiTurnstileTaskProxyLess"));
        assert_eq!(task_type("2captcha", "cloudflare"), None);
    }

    #[test]
    fn test_task_response_error() {
        let response: TaskResponse = serde_json::from_str(
            r#"{"errorId": 1, "errorCode": "ERROR_KEY_DOES_NOT_EXIST", "errorDescription": "bad key"}"#,
        )
        .unwrap();
        assert!(matches!(response.check(), Err(AppError::ExtractionError(ref m)) if m.contains("bad key")));
    }

    #[test]
    fn test_solution_token() {
        assert_eq!(
            solution_token(&json!({"gRecaptchaResponse": "03AG"})).as_deref(),
            Some("03AG")
        );
        assert_eq!(solution_token(&json!({"token": "0.x"})).as_deref(), Some("0.x"));
        assert!(solution_token(&json!({})).is_none());
    }

    #[test]
    fn test_injection_script_escapes_token() {
        let script = injection_script("a\"b");
        assert!(script.contains(r#"const token = "a\"b";"#));
        assert!(script.contains("g-recaptcha-response"));
    }

    #[tokio::test]
    async fn test_declines_without_site_key() {
        let solver = RemoteSolver::new("2captcha", "k", None).unwrap();
        let page = trawler_core::testutil::MockPage::new();
        let challenge = ChallengeInfo {
            kind: "recaptcha".into(),
            marker: ".g-recaptcha".into(),
            site_key: None,
        };
        assert!(!solver.solve(&page, &challenge).await.unwrap());
    }
}
