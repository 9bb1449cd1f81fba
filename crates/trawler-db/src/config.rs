use trawler_core::AppError;
use trawler_core::config::QueueConfig;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Connection settings for the queue database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Derives pool settings from the queue section of the pipeline config.
    ///
    /// The pool size comes from `TRAWLER_DB_MAX_CONNECTIONS` (default 5).
    pub fn for_queue(queue: &QueueConfig) -> Result<Self, AppError> {
        let url = queue.url.clone().ok_or_else(|| {
            AppError::ConfigError("DATABASE_URL not set. Required for the job queue.".into())
        })?;

        let max_connections = match std::env::var("TRAWLER_DB_MAX_CONNECTIONS") {
            Err(_) => DEFAULT_MAX_CONNECTIONS,
            Ok(raw) => parse_pool_size(&raw)?,
        };

        Ok(Self {
            url,
            max_connections,
        })
    }
}

fn parse_pool_size(raw: &str) -> Result<u32, AppError> {
    match raw.trim().parse::<u32>() {
        Ok(0) => Err(AppError::ConfigError(
            "TRAWLER_DB_MAX_CONNECTIONS must be at least 1".into(),
        )),
        Ok(n) => Ok(n),
        Err(_) => Err(AppError::ConfigError(format!(
            "Invalid TRAWLER_DB_MAX_CONNECTIONS '{raw}': must be a positive integer"
        ))),
    }
}
