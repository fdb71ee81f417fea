//! Trendcrawl main entry point
//!
//! This is the command-line interface for the Trendcrawl task engine.

use chrono::Utc;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trendcrawl::config::{load_config_with_hash, load_task_file, Config, TaskFile};
use trendcrawl::executor::HttpExecutor;
use trendcrawl::output::{print_report, EngineReport};
use trendcrawl::sink::{CrawlLogSink, SqliteLogSink, TracingLogSink};
use trendcrawl::{ErrorClassifier, ProxyPool, RateLimiter, Scheduler, TaskStatus};
use tracing_subscriber::EnvFilter;

/// Trendcrawl: a bounded crawl task engine
///
/// Trendcrawl runs crawl tasks by priority under a concurrency limit, a
/// request rate limit and a rotating proxy pool, retrying failures according
/// to their classification.
#[derive(Parser, Debug)]
#[command(name = "trendcrawl")]
#[command(version)]
#[command(about = "A bounded crawl task engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Path to TOML file listing the tasks to run
    #[arg(value_name = "TASKS")]
    tasks: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and tasks without running anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let task_file = match load_task_file(&cli.tasks) {
        Ok(file) => file,
        Err(e) => {
            tracing::error!("Failed to load tasks from {}: {}", cli.tasks.display(), e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config, &task_file);
    } else {
        handle_run(config, task_file).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("trendcrawl=info,warn"),
            1 => EnvFilter::new("trendcrawl=debug,info"),
            2 => EnvFilter::new("trendcrawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the configuration and tasks
fn handle_dry_run(config: &Config, task_file: &TaskFile) {
    println!("=== Trendcrawl Dry Run ===\n");

    println!("Scheduler:");
    println!("  Max concurrent: {}", config.scheduler.max_concurrent);
    println!("  Default max retries: {}", config.scheduler.default_max_retries);
    println!("  Retry pause: {}ms", config.scheduler.retry_pause_ms);
    println!("  Respect retryable: {}", config.scheduler.respect_retryable);

    println!("\nRate Limiter:");
    println!(
        "  {} per minute, {} per hour",
        config.rate_limiter.max_requests_per_minute, config.rate_limiter.max_requests_per_hour
    );
    println!("  Cooldown: {}ms", config.rate_limiter.cooldown_ms);

    println!("\nHTTP:");
    println!("  User agent: {}", config.http.user_agent);
    println!("  Timeout: {}s", config.http.timeout_secs);
    println!("  Max fetch attempts: {}", config.http.max_fetch_attempts);

    println!("\nCrawl Log:");
    match &config.log.database_path {
        Some(path) => println!("  Database: {}", path),
        None => println!("  Tracing only"),
    }

    println!("\nProxies ({}):", config.proxy.len());
    for entry in &config.proxy {
        let auth = if entry.username.is_some() { " (auth)" } else { "" };
        println!("  - {}{}", entry.address, auth);
    }

    println!("\nTasks ({}):", task_file.tasks.len());
    for entry in &task_file.tasks {
        let delay = entry
            .delay_secs
            .map(|d| format!(", delayed {}s", d))
            .unwrap_or_default();
        println!(
            "  - [{}] {}{}",
            entry.priority,
            trendcrawl::executor::summarize_params(&entry.params),
            delay
        );
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would run {} task(s)", task_file.tasks.len());
}

/// Runs every task in the file until the engine is idle or Ctrl-C is pressed
async fn handle_run(config: Config, task_file: TaskFile) -> Result<(), Box<dyn std::error::Error>> {
    let classifier = Arc::new(ErrorClassifier::new());
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limiter.clone()));
    let proxy_pool = Arc::new(ProxyPool::from_entries(&config.proxy));
    let executor = Arc::new(HttpExecutor::new(config.http.clone(), classifier.clone())?);
    let sink = open_log_sink(config.log.database_path.as_deref())?;

    if proxy_pool.has_any() {
        tracing::info!("Using {} proxies", proxy_pool.active_count());
    }

    let mut builder = Scheduler::builder(config.scheduler.clone(), executor)
        .with_classifier(classifier)
        .with_rate_limiter(rate_limiter)
        .with_log_sink(sink);
    if proxy_pool.has_any() {
        builder = builder.with_proxy_pool(proxy_pool);
    }
    let scheduler = builder.build();

    for entry in &task_file.tasks {
        scheduler.add_task(entry.to_spec());
    }
    tracing::info!("Queued {} task(s)", task_file.tasks.len());

    scheduler.start();

    tokio::select! {
        _ = run_until_drained(&scheduler) => {
            tracing::info!("All runnable tasks finished");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, waiting for in-flight tasks");
            scheduler.stop();
            scheduler.wait_until_idle().await;
        }
    }
    scheduler.stop();

    let pending = scheduler.stats().pending;
    if pending > 0 {
        tracing::info!("{} task(s) left pending", pending);
    }

    print_report(&EngineReport::collect(&scheduler));
    Ok(())
}

/// Waits for idle, then sleeps until the next delayed task is due and
/// dispatches again, until no pending task remains
async fn run_until_drained(scheduler: &Scheduler) {
    loop {
        scheduler.wait_until_idle().await;

        let next_due = scheduler
            .list_tasks()
            .into_iter()
            .filter(|task| task.status == TaskStatus::Pending)
            .filter_map(|task| task.scheduled_at)
            .min();

        let Some(due) = next_due else {
            return;
        };

        let wait = (due - Utc::now()).to_std().unwrap_or_default();
        tracing::debug!("Next delayed task due in {:?}", wait);
        tokio::time::sleep(wait).await;
        scheduler.dispatch();
    }
}

/// Opens the SQLite crawl log if configured, the tracing sink otherwise
fn open_log_sink(
    database_path: Option<&str>,
) -> Result<Arc<dyn CrawlLogSink>, Box<dyn std::error::Error>> {
    match database_path {
        Some(path) => {
            tracing::info!("Recording crawl log to {}", path);
            Ok(Arc::new(SqliteLogSink::open(Path::new(path))?))
        }
        None => Ok(Arc::new(TracingLogSink)),
    }
}
