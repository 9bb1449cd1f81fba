use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use trawler_client::{
    AnyBlobStore, AnyProxyProvider, ChromeLauncher, FsBlobStore, GENERIC_SOURCE,
    HttpProxyProvider, PageSnapshotExtractor, RemoteSolver, S3BlobStore, StaticProxyProvider,
};
use trawler_core::config::{ProxyConfig, StorageConfig};
use trawler_core::{
    ExtractorRegistry, JobProcessor, NewJob, PipelineConfig, ProcessorConfig, ProxyPool,
    QueueClient, ResultStore, SessionOptions, TracingWorkerReporter, WorkerConfig, WorkerService,
};
use trawler_db::{Database, DatabaseConfig, PgQueue};

#[derive(Parser)]
#[command(name = "trawler", version, about = "Resilient distributed scraping pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct BrowserArgs {
    /// Show the browser window instead of running headless
    #[arg(long, default_value_t = false)]
    headful: bool,

    /// Launch Chromium without its sandbox (needed as root in containers)
    #[arg(long, env = "TRAWLER_NO_SANDBOX", default_value_t = false)]
    no_sandbox: bool,

    /// Keep images, fonts and media instead of aborting them
    #[arg(long, default_value_t = false)]
    load_resources: bool,

    /// Extra source tags served by the generic page-snapshot extractor
    #[arg(long, env = "TRAWLER_SNAPSHOT_SOURCES", value_delimiter = ',')]
    snapshot_sources: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume the job queue until interrupted
    Worker {
        /// Worker identifier (defaults to a random one)
        #[arg(long, env = "TRAWLER_WORKER_ID")]
        worker_id: Option<String>,

        /// Seconds to wait when the queue is empty
        #[arg(long, default_value_t = 5)]
        poll_interval: u64,

        /// Seconds before a failed message becomes visible again
        #[arg(long, default_value_t = 30)]
        failure_backoff: u64,

        #[command(flatten)]
        browser: BrowserArgs,
    },

    /// Process a single queued job and exit (non-zero if it failed)
    Process {
        #[command(flatten)]
        browser: BrowserArgs,
    },

    /// Submit one job
    Enqueue {
        /// Platform tag, e.g. "reddit"
        #[arg(short, long)]
        source: String,

        /// Job parameter as key=value; the value is parsed as JSON when possible
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Delay before the job becomes visible to workers
        #[arg(long, default_value_t = 0)]
        delay: u32,
    },

    /// Submit jobs from a JSON file: an array of jobs or {"jobs": [...]}
    EnqueueBatch {
        /// Path to the JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show queue depth and dead letters
    Stats {
        /// Number of dead-lettered bodies to print
        #[arg(long, default_value_t = 0)]
        dead_letters: i64,
    },

    /// Return dead-lettered messages to the queue
    Redrive,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("trawler=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env().context("Invalid configuration")?;

    match cli.command {
        Commands::Worker {
            worker_id,
            poll_interval,
            failure_backoff,
            browser,
        } => {
            let mut worker_config = WorkerConfig::default()
                .with_poll_interval(Duration::from_secs(poll_interval))
                .with_failure_backoff(Duration::from_secs(failure_backoff));
            if let Some(id) = worker_id {
                worker_config = worker_config.with_worker_id(id);
            }
            cmd_worker(&config, &browser, worker_config).await?;
        }
        Commands::Process { browser } => {
            cmd_process(&config, &browser).await?;
        }
        Commands::Enqueue {
            source,
            params,
            delay,
        } => {
            let job = params
                .into_iter()
                .fold(NewJob::new(source), |job, (k, v)| job.with_param(k, v))
                .with_delay(delay);
            let client = QueueClient::new(connect_queue(&config).await?);
            let receipt = client.enqueue(job).await?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
        }
        Commands::EnqueueBatch { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let jobs = parse_batch_file(&raw)?;
            let client = QueueClient::new(connect_queue(&config).await?);
            let report = client.enqueue_batch(jobs).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.is_partial() {
                let total = report.failed.len() + report.accepted.len();
                bail!("{} of {total} jobs failed to enqueue", report.failed.len());
            }
        }
        Commands::Stats { dead_letters } => {
            let queue = connect_queue(&config).await?;
            let stats = queue.stats().await?;
            println!(
                "queue={} visible={} in_flight={} dead_lettered={}",
                queue.label(),
                stats.visible,
                stats.in_flight,
                stats.dead_lettered
            );
            if dead_letters > 0 {
                for body in queue.dead_letters(dead_letters).await? {
                    println!("{body}");
                }
            }
        }
        Commands::Redrive => {
            let queue = connect_queue(&config).await?;
            let moved = queue.redrive().await?;
            println!("Redrove {moved} message(s)");
        }
    }

    Ok(())
}

/// Connects to PostgreSQL, applies migrations and opens the configured queue.
async fn connect_queue(config: &PipelineConfig) -> Result<PgQueue> {
    let db = Database::connect(&DatabaseConfig::for_queue(&config.queue)?)
        .await
        .context("Failed to connect to the queue database")?;
    db.migrate().await?;
    Ok(db.queue(&config.queue))
}

async fn build_store(storage: &StorageConfig) -> AnyBlobStore {
    match &storage.bucket {
        Some(bucket) => {
            tracing::info!(%bucket, "Storing artifacts in S3");
            AnyBlobStore::S3(
                S3BlobStore::connect(bucket, storage.region.as_deref(), storage.endpoint.as_deref())
                    .await,
            )
        }
        None => {
            tracing::info!(dir = %storage.dir.display(), "Storing artifacts on the local filesystem");
            AnyBlobStore::Fs(FsBlobStore::new(&storage.dir))
        }
    }
}

fn build_provider(proxy: &ProxyConfig) -> Result<AnyProxyProvider> {
    if !proxy.static_list.is_empty() {
        return Ok(AnyProxyProvider::Static(StaticProxyProvider::new(
            proxy.static_list.clone(),
        )));
    }
    match &proxy.api_key {
        Some(key) => Ok(AnyProxyProvider::Http(HttpProxyProvider::new(
            &proxy.base_url,
            key,
            proxy.batch_size,
        )?)),
        None => {
            tracing::warn!("No proxy source configured; development runs fall back to the loopback stub");
            Ok(AnyProxyProvider::Static(StaticProxyProvider::new(Vec::new())))
        }
    }
}

fn build_registry(browser: &BrowserArgs) -> ExtractorRegistry {
    let snapshot = Arc::new(PageSnapshotExtractor);
    browser
        .snapshot_sources
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .fold(
            ExtractorRegistry::new().register(GENERIC_SOURCE, snapshot.clone()),
            |registry, source| registry.register(source, snapshot.clone()),
        )
}

async fn build_worker(
    config: &PipelineConfig,
    browser: &BrowserArgs,
    worker_config: WorkerConfig,
) -> Result<WorkerService<PgQueue, ChromeLauncher, AnyProxyProvider, AnyBlobStore>> {
    let mut launcher = ChromeLauncher::new();
    if browser.no_sandbox {
        launcher = launcher.without_sandbox();
    }

    let pool = ProxyPool::new(
        build_provider(&config.proxy)?,
        config.proxy.pool_config(config.env),
    );
    let store = ResultStore::new(build_store(&config.storage).await);

    let processor_config = ProcessorConfig {
        retry: config.retry.clone(),
        session: SessionOptions {
            headless: !browser.headful,
            block_resources: !browser.load_resources,
            ..SessionOptions::default()
        },
        proxy_filter: config.proxy.filter(),
    };

    let mut processor = JobProcessor::new(
        launcher,
        pool,
        store,
        build_registry(browser),
        processor_config,
    );
    if let Some(solver) = &config.solver {
        tracing::info!(provider = %solver.provider, "Challenge solver enabled");
        processor = processor.with_solver(Arc::new(RemoteSolver::new(
            &solver.provider,
            &solver.token,
            solver.url.as_deref(),
        )?));
    }

    let queue = connect_queue(config).await?;
    Ok(WorkerService::new(queue, processor, worker_config))
}

async fn cmd_worker(
    config: &PipelineConfig,
    browser: &BrowserArgs,
    worker_config: WorkerConfig,
) -> Result<()> {
    let worker = build_worker(config, browser, worker_config).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested, finishing the current job");
            on_signal.cancel();
        }
    });

    worker.run(cancel, &TracingWorkerReporter).await?;
    Ok(())
}

async fn cmd_process(config: &PipelineConfig, browser: &BrowserArgs) -> Result<()> {
    let worker = build_worker(config, browser, WorkerConfig::default()).await?;

    match worker.process_next(&TracingWorkerReporter).await? {
        Some(outcome) => {
            println!(
                "{}",
                serde_json::json!({
                    "jobId": outcome.job_id,
                    "platform": outcome.platform,
                    "resultKey": outcome.result_key,
                    "attempts": outcome.attempts,
                })
            );
        }
        None => tracing::info!("Queue is empty"),
    }
    Ok(())
}

/// Parses `key=value`, reading the value as JSON and falling back to a string.
fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn parse_batch_file(raw: &str) -> Result<Vec<NewJob>> {
    let value: Value = serde_json::from_str(raw).context("Batch file is not valid JSON")?;
    let entries = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("jobs") {
            Some(Value::Array(items)) => items,
            _ => bail!("Batch file object must contain a 'jobs' array"),
        },
        _ => bail!("Batch file must be an array of jobs or {{\"jobs\": [...]}}"),
    };
    entries
        .into_iter()
        .map(|v| serde_json::from_value::<NewJob>(v).context("Invalid job entry"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("page=2").unwrap(), ("page".into(), Value::from(2)));
        assert_eq!(
            parse_param("q=rust lang").unwrap(),
            ("q".into(), Value::from("rust lang"))
        );
        assert_eq!(
            parse_param("tags=[\"a\"]").unwrap().1,
            serde_json::json!(["a"])
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_parse_batch_file_shapes() {
        let jobs = parse_batch_file(r#"[{"source":"reddit"},{"source":"amazon","delaySeconds":5}]"#)
            .unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].delay_seconds, Some(5));

        let wrapped = parse_batch_file(r#"{"jobs":[{"source":"reddit"}]}"#).unwrap();
        assert_eq!(wrapped.len(), 1);

        assert!(parse_batch_file(r#"{"items":[]}"#).is_err());
        assert!(parse_batch_file("42").is_err());
    }

    #[test]
    fn test_registry_includes_snapshot_sources() {
        let args = BrowserArgs {
            headful: false,
            no_sandbox: false,
            load_resources: false,
            snapshot_sources: vec!["reddit".into(), " ".into()],
        };
        let registry = build_registry(&args);
        assert!(registry.contains(GENERIC_SOURCE));
        assert!(registry.contains("reddit"));
        assert!(!registry.contains(""));
    }

    #[test]
    fn test_cli_parses_enqueue() {
        let cli = Cli::try_parse_from([
            "trawler", "enqueue", "--source", "reddit", "-p", "subreddit=rust", "--delay", "10",
        ])
        .unwrap();
        match cli.command {
            Commands::Enqueue { source, params, delay } => {
                assert_eq!(source, "reddit");
                assert_eq!(params, vec![("subreddit".to_string(), Value::from("rust"))]);
                assert_eq!(delay, 10);
            }
            _ => panic!("expected enqueue"),
        }
    }
}
