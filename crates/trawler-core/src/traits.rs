use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::session::PageHandle;

/// Platform-supplied scraping logic: navigate, extract, paginate.
///
/// Runs against a page handle it does not own. The processor retries,
/// rotates proxies and persists results around it.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn scrape(
        &self,
        page: &dyn PageHandle,
        params: &Map<String, Value>,
    ) -> Result<Value, AppError>;
}

/// Extractors keyed by the job `source` tag they handle.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, source: impl Into<String>, extractor: Arc<dyn Extractor>) -> Self {
        self.extractors.insert(source.into(), extractor);
        self
    }

    pub fn get(&self, source: &str) -> Option<Arc<dyn Extractor>> {
        self.extractors.get(source).cloned()
    }

    pub fn contains(&self, source: &str) -> bool {
        self.extractors.contains_key(source)
    }

    /// Registered source tags, sorted.
    pub fn sources(&self) -> Vec<&str> {
        let mut sources: Vec<&str> = self.extractors.keys().map(String::as_str).collect();
        sources.sort_unstable();
        sources
    }
}

impl fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("sources", &self.sources())
            .finish()
    }
}

/// Durable key-addressed object storage for result and error artifacts.
pub trait BlobStore: Send + Sync + Clone {
    fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}
