use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Platform tag recorded on artifacts when a job carries no usable source.
pub const UNKNOWN_PLATFORM: &str = "unknown";

const MAX_JOB_ID_LEN: usize = 128;

/// Job ids become a blob key segment, so only `[A-Za-z0-9_-]` is accepted.
pub fn is_valid_job_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_JOB_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

pub fn validate_job_id(id: &str) -> Result<(), crate::AppError> {
    if is_valid_job_id(id) {
        Ok(())
    } else {
        Err(crate::AppError::ValidationError(format!(
            "Invalid job id '{id}': expected 1-{MAX_JOB_ID_LEN} characters from [A-Za-z0-9_-]"
        )))
    }
}

/// One unit of scrape work, as carried in a queue message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub delay_seconds: u32,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Platform tag used in artifact keys; `unknown` when the source is absent or blank.
    pub fn platform(&self) -> &str {
        match self.source.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => UNKNOWN_PLATFORM,
        }
    }

    /// Decodes a queue message body.
    pub fn from_body(body: &str) -> Result<Self, crate::AppError> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn to_body(&self) -> Result<String, crate::AppError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A job as submitted by a caller; id and timestamp are optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub delay_seconds: Option<u32>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_delay(mut self, seconds: u32) -> Self {
        self.delay_seconds = Some(seconds);
        self
    }

    pub fn has_source(&self) -> bool {
        self.source.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    /// Checks what a queue submission needs: a source and, if given, a usable id.
    pub fn validate(&self) -> Result<(), crate::AppError> {
        if !self.has_source() {
            return Err(crate::AppError::ValidationError(
                "Job is missing 'source'".into(),
            ));
        }
        match self.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => validate_job_id(id),
            None => Ok(()),
        }
    }

    /// Fills in a fresh id and creation time where absent.
    pub fn into_job(self) -> Job {
        Job {
            id: self
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            source: self.source,
            params: self.params,
            delay_seconds: self.delay_seconds.unwrap_or(0),
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    /// Delay before a failed message becomes visible again.
    pub failure_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            poll_interval: Duration::from_secs(5),
            failure_backoff: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_failure_backoff(mut self, backoff: Duration) -> Self {
        self.failure_backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_job_wire_format() {
        let body = r#"{"id":"abc","source":"reddit","params":{"subreddit":"rust"},
            "delaySeconds":5,"createdAt":"2024-05-01T12:00:00Z"}"#;
        let job = Job::from_body(body).unwrap();
        assert_eq!(job.id, "abc");
        assert_eq!(job.platform(), "reddit");
        assert_eq!(job.params["subreddit"], json!("rust"));
        assert_eq!(job.delay_seconds, 5);

        let value: Value = serde_json::from_str(&job.to_body().unwrap()).unwrap();
        assert!(value.get("delaySeconds").is_some());
        assert!(value.get("createdAt").is_some());
    }

    #[test]
    fn test_platform_falls_back_to_unknown() {
        let mut job = NewJob::default().into_job();
        assert_eq!(job.platform(), UNKNOWN_PLATFORM);
        job.source = Some("  ".into());
        assert_eq!(job.platform(), UNKNOWN_PLATFORM);
    }

    #[test]
    fn test_into_job_assigns_id_and_timestamp() {
        let job = NewJob::new("amazon").with_param("asin", "B000").into_job();
        assert!(Uuid::parse_str(&job.id).is_ok());
        assert_eq!(job.delay_seconds, 0);

        let kept = NewJob {
            id: Some("fixed".into()),
            ..NewJob::new("amazon")
        }
        .into_job();
        assert_eq!(kept.id, "fixed");
    }

    #[test]
    fn test_has_source() {
        assert!(NewJob::new("reddit").has_source());
        assert!(!NewJob::default().has_source());
        assert!(!NewJob::new("").has_source());
    }

    #[test]
    fn test_job_id_charset() {
        assert!(is_valid_job_id("abc-123_XYZ"));
        assert!(is_valid_job_id(&Uuid::new_v4().to_string()));
        assert!(!is_valid_job_id(""));
        assert!(!is_valid_job_id("../../x"));
        assert!(!is_valid_job_id("a/b"));
        assert!(!is_valid_job_id("a.b"));
        assert!(!is_valid_job_id(&"a".repeat(129)));
    }

    #[test]
    fn test_new_job_validate() {
        assert!(NewJob::new("reddit").validate().is_ok());
        assert!(NewJob::default().validate().is_err());

        let traversal = NewJob {
            id: Some("../../x".into()),
            ..NewJob::new("reddit")
        };
        let err = traversal.validate().unwrap_err();
        assert!(matches!(err, crate::AppError::ValidationError(ref m) if m.contains("../../x")));
    }
}
