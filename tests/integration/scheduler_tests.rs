//! Integration tests for the scheduler
//!
//! These tests drive the scheduler through its public API with small
//! in-process executors that record, gate or fail their calls.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use trendcrawl::config::{RateLimiterConfig, SchedulerConfig};
use trendcrawl::executor::{CrawlExecutor, CrawlOutput, ExecutionContext, TaskParams};
use trendcrawl::sink::{CrawlLogEntry, CrawlLogSink};
use trendcrawl::{
    ErrorKind, Priority, ProxyEndpoint, ProxyPool, RateLimiter, Scheduler, TaskSpec, TaskStatus,
};

/// Records the `id` parameter of every call, in call order
#[derive(Default)]
struct RecordingExecutor {
    calls: Mutex<Vec<u64>>,
}

impl RecordingExecutor {
    fn calls(&self) -> Vec<u64> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CrawlExecutor for RecordingExecutor {
    async fn execute(
        &self,
        params: &TaskParams,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<CrawlOutput> {
        let id = params["id"].as_u64().unwrap_or_default();
        self.calls.lock().unwrap().push(id);
        Ok(CrawlOutput {
            data: json!({ "id": id }),
            item_count: 3,
        })
    }
}

/// Blocks every call until a permit is released, tracking peak concurrency
struct GatedExecutor {
    gate: Semaphore,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl GatedExecutor {
    fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

#[async_trait]
impl CrawlExecutor for GatedExecutor {
    async fn execute(
        &self,
        _params: &TaskParams,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<CrawlOutput> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let permit = self.gate.acquire().await?;
        permit.forget();

        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(CrawlOutput::default())
    }
}

/// Always fails with the same message
struct FailingExecutor {
    message: &'static str,
    calls: AtomicUsize,
}

impl FailingExecutor {
    fn new(message: &'static str) -> Self {
        Self {
            message,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CrawlExecutor for FailingExecutor {
    async fn execute(
        &self,
        _params: &TaskParams,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<CrawlOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("{}", self.message)
    }
}

struct PanickingExecutor;

#[async_trait]
impl CrawlExecutor for PanickingExecutor {
    async fn execute(
        &self,
        _params: &TaskParams,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<CrawlOutput> {
        panic!("selector table corrupted");
    }
}

/// Records the proxy of every attempt; tasks with `"blocked": true` fail
#[derive(Default)]
struct ProxyRecordingExecutor {
    proxies: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl CrawlExecutor for ProxyRecordingExecutor {
    async fn execute(
        &self,
        params: &TaskParams,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<CrawlOutput> {
        self.proxies
            .lock()
            .unwrap()
            .push(ctx.proxy.as_ref().map(|p| p.address.clone()));

        if params["blocked"].as_bool().unwrap_or(false) {
            anyhow::bail!("HTTP 403 for https://shop.example/list");
        }
        Ok(CrawlOutput::default())
    }
}

/// Records the timestamp of every call against the Tokio clock
#[derive(Default)]
struct TimingExecutor {
    calls: Mutex<Vec<tokio::time::Instant>>,
}

#[async_trait]
impl CrawlExecutor for TimingExecutor {
    async fn execute(
        &self,
        _params: &TaskParams,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<CrawlOutput> {
        self.calls.lock().unwrap().push(tokio::time::Instant::now());
        Ok(CrawlOutput::default())
    }
}

/// Refuses connections through one proxy and succeeds through the others
struct DeadProxyExecutor {
    dead: &'static str,
}

#[async_trait]
impl CrawlExecutor for DeadProxyExecutor {
    async fn execute(
        &self,
        _params: &TaskParams,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<CrawlOutput> {
        match &ctx.proxy {
            Some(proxy) if proxy.address == self.dead => {
                anyhow::bail!("network error connecting to shop.example: connection refused")
            }
            _ => Ok(CrawlOutput::default()),
        }
    }
}

/// Collects entries, optionally taking a while to write each one
#[derive(Default)]
struct MemorySink {
    entries: Mutex<Vec<CrawlLogEntry>>,
    write_delay: Duration,
}

#[async_trait]
impl CrawlLogSink for MemorySink {
    async fn record(&self, entry: &CrawlLogEntry) -> anyhow::Result<()> {
        tokio::time::sleep(self.write_delay).await;
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

fn create_test_config(max_concurrent: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_concurrent,
        default_max_retries: 3,
        retry_pause_ms: 1,
        respect_retryable: false,
    }
}

fn spec(id: u64, priority: Priority) -> TaskSpec {
    TaskSpec::new(json!({ "id": id, "platform": "shopee", "keyword": format!("item{}", id) }))
        .priority(priority)
}

/// Polls until the condition holds, panicking after two seconds
async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn test_dispatch_order_by_priority_then_fifo() {
    let executor = Arc::new(RecordingExecutor::default());
    let scheduler = Scheduler::new(create_test_config(1), executor.clone());

    scheduler.add_task(spec(1, Priority::Low));
    scheduler.add_task(spec(2, Priority::High));
    scheduler.add_task(spec(3, Priority::Normal));
    scheduler.add_task(spec(4, Priority::Urgent));
    scheduler.add_task(spec(5, Priority::High));

    scheduler.start();
    scheduler.wait_until_idle().await;

    assert_eq!(executor.calls(), vec![4, 2, 5, 3, 1]);
    assert_eq!(scheduler.stats().completed, 5);
}

#[tokio::test]
async fn test_concurrency_bound() {
    let executor = Arc::new(GatedExecutor::new());
    let scheduler = Scheduler::new(create_test_config(2), executor.clone());

    for i in 0..5 {
        scheduler.add_task(spec(i, Priority::Normal));
    }
    scheduler.start();

    wait_for("two running tasks", || scheduler.stats().running == 2).await;
    let stats = scheduler.stats();
    assert_eq!(stats.pending, 3);
    assert_eq!(stats.total, 5);

    executor.release(5);
    scheduler.wait_until_idle().await;

    assert_eq!(scheduler.stats().completed, 5);
    assert_eq!(executor.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_raising_bound_applies_on_next_dispatch() {
    let executor = Arc::new(GatedExecutor::new());
    let scheduler = Scheduler::new(create_test_config(1), executor.clone());

    for i in 0..3 {
        scheduler.add_task(spec(i, Priority::Normal));
    }
    scheduler.start();
    wait_for("one running task", || scheduler.stats().running == 1).await;

    scheduler.set_max_concurrent(3);
    scheduler.dispatch();
    assert_eq!(scheduler.stats().running, 3);

    executor.release(3);
    scheduler.wait_until_idle().await;
    assert_eq!(scheduler.stats().completed, 3);
}

#[tokio::test]
async fn test_retries_until_budget_exhausted() {
    let executor = Arc::new(FailingExecutor::new("connect ECONNREFUSED 10.0.0.1:443"));
    let scheduler = Scheduler::new(create_test_config(2), executor.clone());

    let id = scheduler.add_task(spec(1, Priority::Normal).max_retries(2));
    scheduler.start();
    scheduler.wait_until_idle().await;

    let task = scheduler.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert_eq!(task.last_error_kind, Some(ErrorKind::Network));
    assert_eq!(
        task.last_error.as_deref(),
        Some("connect ECONNREFUSED 10.0.0.1:443")
    );
    assert_eq!(executor.calls.load(Ordering::SeqCst), 3);

    let errors = scheduler.classifier().stats();
    assert_eq!(errors.total, 3);
    assert_eq!(errors.by_kind.get(&ErrorKind::Network), Some(&3));
}

#[tokio::test]
async fn test_zero_retries_fails_on_first_error() {
    let executor = Arc::new(FailingExecutor::new("request timeout for https://shop.example"));
    let scheduler = Scheduler::new(create_test_config(1), executor.clone());

    let id = scheduler.add_task(spec(1, Priority::Normal).max_retries(0));
    scheduler.start();
    scheduler.wait_until_idle().await;

    let task = scheduler.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 0);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_non_retryable_errors_still_retried_by_default() {
    let executor = Arc::new(FailingExecutor::new("HTTP 403 Forbidden"));
    let scheduler = Scheduler::new(create_test_config(1), executor.clone());

    let id = scheduler.add_task(spec(1, Priority::Normal));
    scheduler.start();
    scheduler.wait_until_idle().await;

    let task = scheduler.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 3);
    assert_eq!(task.last_error_kind, Some(ErrorKind::Blocked));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_respect_retryable_fails_immediately() {
    let executor = Arc::new(FailingExecutor::new("HTTP 403 Forbidden"));
    let config = SchedulerConfig {
        respect_retryable: true,
        ..create_test_config(1)
    };
    let scheduler = Scheduler::new(config, executor.clone());

    let id = scheduler.add_task(spec(1, Priority::Normal));
    scheduler.start();
    scheduler.wait_until_idle().await;

    let task = scheduler.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 0);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_executor_panic_is_a_failure() {
    let scheduler = Scheduler::new(create_test_config(1), Arc::new(PanickingExecutor));

    let id = scheduler.add_task(spec(1, Priority::Normal).max_retries(0));
    let next = scheduler.add_task(spec(2, Priority::Low).max_retries(0));
    scheduler.start();
    scheduler.wait_until_idle().await;

    let task = scheduler.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.last_error.unwrap().contains("panicked"));

    // The slot was released and the next task still ran
    assert_eq!(scheduler.get_task(next).unwrap().status, TaskStatus::Failed);
    assert_eq!(scheduler.stats().running, 0);
}

#[tokio::test]
async fn test_cancel_pending_but_not_running() {
    let executor = Arc::new(GatedExecutor::new());
    let scheduler = Scheduler::new(create_test_config(1), executor.clone());

    let first = scheduler.add_task(spec(1, Priority::Normal));
    let second = scheduler.add_task(spec(2, Priority::Normal));
    scheduler.start();
    wait_for("first task running", || {
        scheduler.get_task(first).map(|t| t.status) == Some(TaskStatus::Running)
    })
    .await;

    assert!(!scheduler.cancel_task(first));
    assert!(scheduler.cancel_task(second));
    assert!(scheduler.get_task(second).is_none());

    executor.release(1);
    scheduler.wait_until_idle().await;

    let stats = scheduler.stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.completed, 1);

    // Finished tasks can be removed too
    assert!(scheduler.cancel_task(first));
    assert_eq!(scheduler.stats().total, 0);
}

#[tokio::test]
async fn test_stop_lets_running_tasks_finish() {
    let executor = Arc::new(GatedExecutor::new());
    let scheduler = Scheduler::new(create_test_config(1), executor.clone());

    for i in 0..3 {
        scheduler.add_task(spec(i, Priority::Normal));
    }
    scheduler.start();
    wait_for("one running task", || scheduler.stats().running == 1).await;

    scheduler.stop();
    assert!(!scheduler.is_running());
    executor.release(3);
    scheduler.wait_until_idle().await;

    let stats = scheduler.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.pending, 2);

    scheduler.start();
    scheduler.wait_until_idle().await;
    assert_eq!(scheduler.stats().completed, 3);
}

#[tokio::test]
async fn test_add_while_running_dispatches() {
    let executor = Arc::new(RecordingExecutor::default());
    let scheduler = Scheduler::new(create_test_config(2), executor.clone());
    scheduler.start();

    let id = scheduler.add_task(spec(9, Priority::Normal));
    scheduler.wait_until_idle().await;

    let task = scheduler.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result.unwrap().item_count, 3);
    assert!(task.started_at.is_some());
}

#[tokio::test]
async fn test_scheduled_task_waits_until_due() {
    let executor = Arc::new(RecordingExecutor::default());
    let scheduler = Scheduler::new(create_test_config(2), executor.clone());

    let later = scheduler.add_task(
        spec(1, Priority::Urgent).scheduled_at(Utc::now() + ChronoDuration::milliseconds(100)),
    );
    scheduler.add_task(spec(2, Priority::Low));

    scheduler.start();
    scheduler.wait_until_idle().await;
    assert_eq!(executor.calls(), vec![2]);
    assert_eq!(scheduler.get_task(later).unwrap().status, TaskStatus::Pending);

    tokio::time::sleep(Duration::from_millis(150)).await;
    scheduler.dispatch();
    scheduler.wait_until_idle().await;

    assert_eq!(executor.calls(), vec![2, 1]);
    assert_eq!(scheduler.get_task(later).unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_proxies_rotate_and_blocked_proxy_leaves_pool() {
    let pool = Arc::new(ProxyPool::new());
    pool.add_endpoint(ProxyEndpoint::new("http://10.0.0.1:8080"));
    pool.add_endpoint(ProxyEndpoint::new("http://10.0.0.2:8080"));

    let executor = Arc::new(ProxyRecordingExecutor::default());
    let scheduler = Scheduler::builder(create_test_config(1), executor.clone())
        .with_proxy_pool(pool.clone())
        .build();

    scheduler.add_task(TaskSpec::new(json!({ "id": 1 })));
    scheduler.add_task(TaskSpec::new(json!({ "id": 2 })));
    scheduler.add_task(TaskSpec::new(json!({ "id": 3 })));
    scheduler.start();
    scheduler.wait_until_idle().await;

    let seen = executor.proxies.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            Some("http://10.0.0.1:8080".to_string()),
            Some("http://10.0.0.2:8080".to_string()),
            Some("http://10.0.0.1:8080".to_string()),
        ]
    );

    // The next attempt goes through 10.0.0.2 and gets blocked
    let blocked = scheduler.add_task(TaskSpec::new(json!({ "id": 4, "blocked": true })).max_retries(0));
    scheduler.wait_until_idle().await;

    assert_eq!(scheduler.get_task(blocked).unwrap().status, TaskStatus::Failed);
    assert_eq!(pool.active_count(), 1);
    assert_eq!(
        pool.next_endpoint().map(|p| p.address),
        Some("http://10.0.0.1:8080".to_string())
    );
}

#[tokio::test]
async fn test_empty_pool_gives_no_proxy() {
    let executor = Arc::new(ProxyRecordingExecutor::default());
    let scheduler = Scheduler::builder(create_test_config(1), executor.clone())
        .with_proxy_pool(Arc::new(ProxyPool::new()))
        .build();

    scheduler.add_task(TaskSpec::new(json!({ "id": 1 })));
    scheduler.start();
    scheduler.wait_until_idle().await;

    assert_eq!(executor.proxies.lock().unwrap().clone(), vec![None]);
}

#[tokio::test]
async fn test_log_sink_receives_terminal_outcomes() {
    let sink = Arc::new(MemorySink::default());
    let scheduler = Scheduler::builder(
        create_test_config(1),
        Arc::new(FailingExecutor::new("HTTP 429 Too Many Requests")),
    )
    .with_log_sink(sink.clone())
    .build();

    scheduler.add_task(spec(1, Priority::Normal).max_retries(1));
    scheduler.start();
    scheduler.wait_until_idle().await;

    let entries = sink.entries.lock().unwrap().clone();

    // Only the terminal outcome is logged, not the retried attempt
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].success);
    assert_eq!(entries[0].item_count, 0);
    assert_eq!(
        entries[0].error_message.as_deref(),
        Some("HTTP 429 Too Many Requests")
    );
    assert!(entries[0].summary.contains("platform=shopee"));
    assert!(entries[0].summary.contains("keyword=item1"));
}

#[tokio::test]
async fn test_log_sink_records_success() {
    let sink = Arc::new(MemorySink::default());
    let scheduler = Scheduler::builder(create_test_config(2), Arc::new(RecordingExecutor::default()))
        .with_log_sink(sink.clone())
        .build();

    scheduler.add_task(spec(1, Priority::Normal));
    scheduler.add_task(spec(2, Priority::Normal));
    scheduler.start();
    scheduler.wait_until_idle().await;

    let entries = sink.entries.lock().unwrap().clone();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.success && e.item_count == 3));
}

#[tokio::test]
async fn test_wait_until_idle_waits_for_slow_sink() {
    let sink = Arc::new(MemorySink {
        write_delay: Duration::from_millis(50),
        ..MemorySink::default()
    });
    let scheduler = Scheduler::builder(create_test_config(2), Arc::new(RecordingExecutor::default()))
        .with_log_sink(sink.clone())
        .build();

    scheduler.add_task(spec(1, Priority::Normal));
    scheduler.add_task(spec(2, Priority::Normal));
    scheduler.start();
    scheduler.wait_until_idle().await;

    assert_eq!(sink.entries.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_repeated_transport_failures_deactivate_proxy() {
    let pool = Arc::new(ProxyPool::new().with_failure_threshold(2));
    pool.add_endpoint(ProxyEndpoint::new("http://10.0.0.1:8080"));
    pool.add_endpoint(ProxyEndpoint::new("http://10.0.0.2:8080"));

    let executor = Arc::new(DeadProxyExecutor {
        dead: "http://10.0.0.1:8080",
    });
    let scheduler = Scheduler::builder(create_test_config(1), executor)
        .with_proxy_pool(pool.clone())
        .build();

    // Attempts alternate 10.0.0.1, 10.0.0.2, 10.0.0.1, 10.0.0.2
    let ids: Vec<_> = (0..4)
        .map(|i| scheduler.add_task(spec(i, Priority::Normal).max_retries(0)))
        .collect();
    scheduler.start();
    scheduler.wait_until_idle().await;

    let statuses: Vec<_> = ids
        .iter()
        .map(|id| scheduler.get_task(*id).unwrap().status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            TaskStatus::Failed,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Completed,
        ]
    );

    assert_eq!(pool.active_count(), 1);
    let remaining = pool.endpoints().into_iter().find(|e| e.active).unwrap();
    assert_eq!(remaining.address, "http://10.0.0.2:8080");
}

#[tokio::test]
async fn test_single_transport_failure_keeps_proxy() {
    let pool = Arc::new(ProxyPool::new());
    pool.add_endpoint(ProxyEndpoint::new("http://10.0.0.1:8080"));

    let scheduler = Scheduler::builder(
        create_test_config(1),
        Arc::new(DeadProxyExecutor {
            dead: "http://10.0.0.1:8080",
        }),
    )
    .with_proxy_pool(pool.clone())
    .build();

    scheduler.add_task(spec(1, Priority::Normal).max_retries(0));
    scheduler.start();
    scheduler.wait_until_idle().await;

    assert_eq!(pool.active_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limiter_spaces_attempts() {
    let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
        max_requests_per_minute: 2,
        max_requests_per_hour: 100,
        cooldown_ms: 60_000,
    }));
    let executor = Arc::new(TimingExecutor::default());
    let scheduler = Scheduler::builder(create_test_config(3), executor.clone())
        .with_rate_limiter(limiter.clone())
        .build();

    for i in 0..3 {
        scheduler.add_task(spec(i, Priority::Normal));
    }
    scheduler.start();
    scheduler.wait_until_idle().await;

    let calls = executor.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 3);
    assert!(calls[1] - calls[0] < Duration::from_secs(1));
    assert!(calls[2] - calls[0] >= Duration::from_secs(60));
    assert_eq!(scheduler.stats().completed, 3);
}
