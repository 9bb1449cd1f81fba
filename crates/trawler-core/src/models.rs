use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AppError;

/// Envelope fields of a result artifact; payload keys with these names are dropped.
const RESERVED_KEYS: [&str; 5] = ["jobId", "platform", "status", "resultKey", "timestamp"];

/// Body of a result artifact: envelope plus the extractor's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResult {
    pub job_id: String,
    pub platform: String,
    /// Always `"success"`.
    pub status: String,
    pub result_key: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ScrapeResult {
    /// Object payloads are merged into the envelope; anything else goes under `data`.
    pub fn new(
        job_id: impl Into<String>,
        platform: impl Into<String>,
        result_key: impl Into<String>,
        timestamp: impl Into<String>,
        payload: Value,
    ) -> Self {
        let payload = match payload {
            Value::Object(mut map) => {
                for key in RESERVED_KEYS {
                    if map.remove(key).is_some() {
                        tracing::debug!(%key, "Dropping payload key that collides with envelope");
                    }
                }
                map
            }
            other => {
                let mut map = Map::new();
                map.insert("data".into(), other);
                map
            }
        };

        Self {
            job_id: job_id.into(),
            platform: platform.into(),
            status: "success".into(),
            result_key: result_key.into(),
            timestamp: timestamp.into(),
            payload,
        }
    }
}

/// Body of an error artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub error: String,
    pub stack: String,
    pub job_id: String,
    pub platform: String,
    pub timestamp: String,
}

impl ErrorRecord {
    pub fn from_error(
        error: &AppError,
        job_id: impl Into<String>,
        platform: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            error: error.to_string(),
            stack: error.chain(),
            job_id: job_id.into(),
            platform: platform.into(),
            timestamp: timestamp.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_scrape_result_flattens_payload() {
        let result = ScrapeResult::new(
            "abc",
            "reddit",
            "reddit/abc/t.json",
            "t",
            json!({"posts": [1, 2], "status": "ignored", "jobId": "spoofed"}),
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["jobId"], "abc");
        assert_eq!(value["status"], "success");
        assert_eq!(value["resultKey"], "reddit/abc/t.json");
        assert_eq!(value["posts"], json!([1, 2]));
    }

    #[test]
    fn test_scrape_result_wraps_non_object_payload() {
        let result = ScrapeResult::new("abc", "reddit", "k", "t", json!([1, 2, 3]));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["data"], json!([1, 2, 3]));
    }

    #[test]
    fn test_error_record_shape() {
        let err = AppError::Timeout(30);
        let record = ErrorRecord::from_error(&err, "abc", "amazon", "t");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["error"], "Request timed out after 30 seconds");
        assert_eq!(value["jobId"], "abc");
        assert!(value["stack"].as_str().unwrap().contains("Timeout(30)"));
    }
}
