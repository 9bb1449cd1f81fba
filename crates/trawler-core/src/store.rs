use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::error::AppError;
use crate::models::{ErrorRecord, ScrapeResult};
use crate::traits::BlobStore;

const JSON_CONTENT_TYPE: &str = "application/json";

/// ISO-8601 timestamp used in artifact keys and bodies.
pub fn artifact_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Maps a value onto a single key segment: anything outside `[A-Za-z0-9_-]`
/// becomes `_`, so no input can add a level or step out of the layout.
pub fn key_segment(value: &str) -> String {
    if value.is_empty() {
        return "_".to_string();
    }
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `{platform}/{jobId}/{timestamp}.json`
pub fn result_key(platform: &str, job_id: &str, timestamp: &str) -> String {
    format!("{}/{}/{timestamp}.json", key_segment(platform), key_segment(job_id))
}

/// `errors/{platform}/{jobId}/{timestamp}.json`
pub fn error_key(platform: &str, job_id: &str, timestamp: &str) -> String {
    format!(
        "errors/{}/{}/{timestamp}.json",
        key_segment(platform),
        key_segment(job_id)
    )
}

/// Writes result and error artifacts under the fixed key scheme.
#[derive(Clone)]
pub struct ResultStore<B: BlobStore> {
    blobs: B,
}

impl<B: BlobStore> ResultStore<B> {
    pub fn new(blobs: B) -> Self {
        Self { blobs }
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    /// Serializes `payload` as JSON and writes it at `key`.
    pub async fn put<T: serde::Serialize>(&self, key: &str, payload: &T) -> Result<(), AppError> {
        let body = serde_json::to_vec_pretty(payload)?;
        self.blobs.put(key, body, JSON_CONTENT_TYPE).await
    }

    /// Persists a successful payload. Returns the key written.
    pub async fn put_result(
        &self,
        job_id: &str,
        platform: &str,
        payload: Value,
    ) -> Result<String, AppError> {
        let timestamp = artifact_timestamp(Utc::now());
        let key = result_key(platform, job_id, &timestamp);
        let result = ScrapeResult::new(job_id, platform, key.clone(), timestamp, payload);
        self.put(&key, &result).await?;
        tracing::info!(%job_id, %key, "Result stored");
        Ok(key)
    }

    /// Persists diagnostics for a failed job. Returns the key written.
    pub async fn put_error(
        &self,
        job_id: &str,
        platform: &str,
        error: &AppError,
    ) -> Result<String, AppError> {
        let timestamp = artifact_timestamp(Utc::now());
        let key = error_key(platform, job_id, &timestamp);
        let record = ErrorRecord::from_error(error, job_id, platform, timestamp);
        self.put(&key, &record).await?;
        tracing::info!(%job_id, %key, "Error record stored");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::testutil::MemoryBlobStore;

    #[test]
    fn test_key_scheme() {
        let ts = artifact_timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        assert_eq!(ts, "2024-05-01T12:00:00.000Z");
        assert_eq!(
            result_key("reddit", "abc", &ts),
            "reddit/abc/2024-05-01T12:00:00.000Z.json"
        );
        assert_eq!(
            error_key("reddit", "abc", &ts),
            "errors/reddit/abc/2024-05-01T12:00:00.000Z.json"
        );
    }

    #[test]
    fn test_unsafe_segments_stay_in_layout() {
        let ts = "2024-05-01T12:00:00.000Z";
        assert_eq!(
            error_key("a/b", "../../x", ts),
            "errors/a_b/______x/2024-05-01T12:00:00.000Z.json"
        );
        assert_eq!(result_key("reddit", "", ts), "reddit/_/2024-05-01T12:00:00.000Z.json");
        assert_eq!(key_segment("job-1_A"), "job-1_A");
    }

    #[tokio::test]
    async fn test_put_result_writes_envelope() {
        let blobs = MemoryBlobStore::new();
        let store = ResultStore::new(blobs.clone());

        let key = store
            .put_result("abc", "reddit", json!({"posts": []}))
            .await
            .unwrap();

        assert!(key.starts_with("reddit/abc/"));
        let body = blobs.get_json(&key).unwrap();
        assert_eq!(body["resultKey"], json!(key));
        assert_eq!(body["status"], "success");
        assert_eq!(blobs.content_type(&key).as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_put_error_writes_record() {
        let blobs = MemoryBlobStore::new();
        let store = ResultStore::new(blobs.clone());

        let key = store
            .put_error("abc", "amazon", &AppError::ProxyError("407".into()))
            .await
            .unwrap();

        assert!(key.starts_with("errors/amazon/abc/"));
        let body = blobs.get_json(&key).unwrap();
        assert_eq!(body["error"], "Proxy error: 407");
        assert_eq!(body["platform"], "amazon");
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let blobs = MemoryBlobStore::new();
        blobs.fail_writes("bucket missing");
        let store = ResultStore::new(blobs);

        let err = store.put_result("abc", "reddit", json!({})).await.unwrap_err();
        assert!(matches!(err, AppError::StorageError(_)));
    }
}
