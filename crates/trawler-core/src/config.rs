//! Pipeline configuration read from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::proxy::{Proxy, ProxyCredentials, ProxyFilter, ProxyPoolConfig};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Environment {
    Production,
    #[default]
    Development,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Durable queue settings.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Queue endpoint (`DATABASE_URL`).
    pub url: Option<String>,
    pub name: String,
    pub region: Option<String>,
    /// How long a received message stays hidden before redelivery.
    pub visibility_timeout: Duration,
    /// Deliveries after which a message is dead-lettered.
    pub max_receives: u32,
}

/// Artifact storage settings. S3 is used when a bucket is set.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub bucket: Option<String>,
    pub region: Option<String>,
    /// Custom S3 endpoint (MinIO, LocalStack).
    pub endpoint: Option<String>,
    /// Root directory of the filesystem store.
    pub dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub default_credentials: Option<ProxyCredentials>,
    pub ttl: Duration,
    pub batch_size: u32,
    /// Fixed proxies (`TRAWLER_PROXY_LIST`), used instead of the provider API.
    pub static_list: Vec<Proxy>,
    pub region: Option<String>,
}

impl ProxyConfig {
    pub fn pool_config(&self, env: Environment) -> ProxyPoolConfig {
        ProxyPoolConfig {
            ttl: self.ttl,
            allow_loopback_stub: !env.is_production(),
            default_credentials: self.default_credentials.clone(),
            ..ProxyPoolConfig::default()
        }
    }

    pub fn filter(&self) -> ProxyFilter {
        ProxyFilter {
            region: self.region.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverConfig {
    pub provider: String,
    pub token: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub env: Environment,
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    pub proxy: ProxyConfig,
    pub retry: RetryPolicy,
    pub solver: Option<SolverConfig>,
}

impl PipelineConfig {
    /// Read configuration from environment variables.
    ///
    /// Every variable is optional; invalid values fail with
    /// [`AppError::ConfigError`] naming the variable.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let env = match vars.get("TRAWLER_ENV").as_deref() {
            Some("production") => Environment::Production,
            _ => Environment::Development,
        };

        let queue = QueueConfig {
            url: vars.get("DATABASE_URL"),
            name: vars
                .get("TRAWLER_QUEUE_NAME")
                .unwrap_or_else(|| "scrape-jobs".into()),
            region: vars.get("TRAWLER_QUEUE_REGION"),
            visibility_timeout: Duration::from_secs(
                vars.parse("TRAWLER_VISIBILITY_TIMEOUT_SECS", 300u64)?,
            ),
            max_receives: vars.parse_positive("TRAWLER_MAX_RECEIVES", 5)?,
        };

        let storage = StorageConfig {
            bucket: vars.get("TRAWLER_BUCKET"),
            region: vars.get("TRAWLER_STORAGE_REGION"),
            endpoint: vars.get("TRAWLER_STORAGE_ENDPOINT"),
            dir: vars
                .get("TRAWLER_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./artifacts")),
        };

        let default_credentials = match (
            vars.get("TRAWLER_PROXY_USERNAME"),
            vars.get("TRAWLER_PROXY_PASSWORD"),
        ) {
            (Some(user), Some(pass)) => Some(ProxyCredentials::new(user, pass)),
            (None, None) => None,
            _ => {
                return Err(AppError::ConfigError(
                    "TRAWLER_PROXY_USERNAME and TRAWLER_PROXY_PASSWORD must be set together"
                        .into(),
                ));
            }
        };

        let static_list = match vars.get("TRAWLER_PROXY_LIST") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Proxy::parse)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AppError::ConfigError(format!("Invalid TRAWLER_PROXY_LIST: {e}")))?,
            None => Vec::new(),
        };

        let proxy = ProxyConfig {
            api_key: vars.get("TRAWLER_PROXY_API_KEY"),
            base_url: vars
                .get("TRAWLER_PROXY_BASE_URL")
                .unwrap_or_else(|| "https://proxy.webshare.io".into()),
            default_credentials,
            ttl: Duration::from_secs(vars.parse("TRAWLER_PROXY_TTL_SECS", 600u64)?),
            batch_size: vars.parse_positive("TRAWLER_PROXY_BATCH_SIZE", 25)?,
            static_list,
            region: vars.get("TRAWLER_PROXY_REGION"),
        };

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: vars.parse("TRAWLER_MAX_RETRIES", defaults.max_retries)?,
            initial_delay: Duration::from_millis(vars.parse(
                "TRAWLER_INITIAL_DELAY_MS",
                defaults.initial_delay.as_millis() as u64,
            )?),
            max_delay: Duration::from_millis(vars.parse(
                "TRAWLER_MAX_DELAY_MS",
                defaults.max_delay.as_millis() as u64,
            )?),
            factor: vars.parse("TRAWLER_BACKOFF_FACTOR", defaults.factor)?,
            jitter: vars.parse("TRAWLER_JITTER", defaults.jitter)?,
        };
        if retry.factor < 1.0 {
            return Err(AppError::ConfigError(
                "TRAWLER_BACKOFF_FACTOR must be at least 1.0".into(),
            ));
        }
        if retry.max_delay < retry.initial_delay {
            return Err(AppError::ConfigError(
                "TRAWLER_MAX_DELAY_MS must not be below TRAWLER_INITIAL_DELAY_MS".into(),
            ));
        }

        let solver = match vars.get("TRAWLER_SOLVER_PROVIDER") {
            Some(provider) => Some(SolverConfig {
                provider,
                token: vars.get("TRAWLER_SOLVER_TOKEN").ok_or_else(|| {
                    AppError::ConfigError(
                        "TRAWLER_SOLVER_TOKEN is required when TRAWLER_SOLVER_PROVIDER is set"
                            .into(),
                    )
                })?,
                url: vars.get("TRAWLER_SOLVER_URL"),
            }),
            None => None,
        };

        Ok(Self {
            env,
            queue,
            storage,
            proxy,
            retry,
            solver,
        })
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    /// Non-empty, trimmed value of `name`.
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, name: &str, default: T) -> Result<T, AppError> {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| AppError::ConfigError(format!("Invalid {name} '{raw}'"))),
        }
    }

    fn parse_positive(&self, name: &str, default: u32) -> Result<u32, AppError> {
        let value = self.parse(name, default)?;
        if value == 0 {
            return Err(AppError::ConfigError(format!("{name} must be at least 1")));
        }
        Ok(value)
    }
}
