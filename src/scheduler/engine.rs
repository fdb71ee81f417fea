//! Task scheduler
//!
//! This module owns the task table and drives execution:
//! - Priority selection with FIFO tie-break among admissible tasks
//! - A concurrency bound on running tasks
//! - Rate-limiter slots and proxy selection per attempt
//! - Retry-or-fail decisions after failures
//! - Crawl log notifications that never block task completion

use crate::classify::{ErrorClassifier, ErrorKind};
use crate::config::SchedulerConfig;
use crate::executor::{summarize_params, CrawlExecutor, CrawlOutput, ExecutionContext, TaskParams};
use crate::proxy::ProxyPool;
use crate::scheduler::task::{Task, TaskId, TaskSpec, TaskStatus};
use crate::sink::{CrawlLogEntry, CrawlLogSink, TracingLogSink};
use crate::throttle::RateLimiter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Task counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// All mutable scheduler state, guarded by a single mutex
#[derive(Debug)]
struct TaskTable {
    /// Keyed by id, which is also insertion order
    tasks: BTreeMap<TaskId, Task>,

    /// Tasks currently occupying a concurrency slot
    running: HashSet<TaskId>,

    next_id: u64,
    is_running: bool,
    max_concurrent: usize,

    /// Log entries handed to the sink but not yet written
    pending_logs: usize,
}

impl TaskTable {
    /// Picks the admissible task with the highest priority, earliest added
    /// first among equals
    fn next_admissible(&self, now: DateTime<Utc>) -> Option<TaskId> {
        self.tasks
            .values()
            .filter(|task| task.is_admissible(now))
            .fold(None, |best: Option<&Task>, task| match best {
                Some(current) if current.priority >= task.priority => Some(current),
                _ => Some(task),
            })
            .map(|task| task.id)
    }

    /// Moves the next admissible task into a free slot
    ///
    /// Returns the task's id, parameters and retry count, or `None` when the
    /// engine is stopped, all slots are taken, or nothing is admissible.
    fn claim_next(&mut self, now: DateTime<Utc>) -> Option<(TaskId, TaskParams, u32)> {
        if !self.is_running || self.running.len() >= self.max_concurrent {
            return None;
        }

        let id = self.next_admissible(now)?;
        let task = self.tasks.get_mut(&id)?;
        task.status = TaskStatus::Running;
        task.started_at = Some(now);
        let claimed = (id, task.params.clone(), task.retry_count);

        self.running.insert(id);
        Some(claimed)
    }

    fn is_idle(&self, now: DateTime<Utc>) -> bool {
        self.running.is_empty()
            && self.pending_logs == 0
            && (!self.is_running || self.next_admissible(now).is_none())
    }
}

/// What happened to a task after a failed attempt
enum FailureOutcome {
    Retry { retry_count: u32, max_retries: u32 },
    Failed,
    /// The task disappeared from the table
    Gone,
}

struct Shared {
    config: SchedulerConfig,
    table: Mutex<TaskTable>,
    executor: Arc<dyn CrawlExecutor>,
    classifier: Arc<ErrorClassifier>,
    rate_limiter: Option<Arc<RateLimiter>>,
    proxy_pool: Option<Arc<ProxyPool>>,
    sink: Arc<dyn CrawlLogSink>,

    /// Bumped on every state change so waiters can re-check
    changed: watch::Sender<u64>,
}

/// Builder wiring the scheduler to its collaborators
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    executor: Arc<dyn CrawlExecutor>,
    classifier: Option<Arc<ErrorClassifier>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    proxy_pool: Option<Arc<ProxyPool>>,
    sink: Option<Arc<dyn CrawlLogSink>>,
}

impl SchedulerBuilder {
    /// Shares an error classifier (a private one is created otherwise)
    pub fn with_classifier(mut self, classifier: Arc<ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Makes every attempt wait for a rate-limiter slot
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Hands every attempt the next proxy from the pool
    pub fn with_proxy_pool(mut self, pool: Arc<ProxyPool>) -> Self {
        self.proxy_pool = Some(pool);
        self
    }

    /// Receives one entry per finished task (tracing only otherwise)
    pub fn with_log_sink(mut self, sink: Arc<dyn CrawlLogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Scheduler {
        let (changed, _) = watch::channel(0);
        let max_concurrent = self.config.max_concurrent.max(1);

        Scheduler {
            shared: Arc::new(Shared {
                table: Mutex::new(TaskTable {
                    tasks: BTreeMap::new(),
                    running: HashSet::new(),
                    next_id: 1,
                    is_running: false,
                    max_concurrent,
                    pending_logs: 0,
                }),
                config: self.config,
                executor: self.executor,
                classifier: self.classifier.unwrap_or_default(),
                rate_limiter: self.rate_limiter,
                proxy_pool: self.proxy_pool,
                sink: self.sink.unwrap_or_else(|| Arc::new(TracingLogSink)),
                changed,
            }),
        }
    }
}

/// Priority task scheduler with a concurrency bound
///
/// `Scheduler` is a cheap handle; clones share the same task table. Dispatch
/// happens when a task is added while running, when [`Scheduler::start`] is
/// called, and whenever a running task finishes. There is no background
/// timer: tasks scheduled for later are picked up on the next dispatch after
/// they become due (see [`Scheduler::dispatch`]).
///
/// Methods that can dispatch must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Starts building a scheduler around an executor
    pub fn builder(config: SchedulerConfig, executor: Arc<dyn CrawlExecutor>) -> SchedulerBuilder {
        SchedulerBuilder {
            config,
            executor,
            classifier: None,
            rate_limiter: None,
            proxy_pool: None,
            sink: None,
        }
    }

    /// Creates a scheduler without rate limiting or proxies
    pub fn new(config: SchedulerConfig, executor: Arc<dyn CrawlExecutor>) -> Self {
        Self::builder(config, executor).build()
    }

    /// Queues a new task and returns its id
    ///
    /// Triggers a dispatch pass if the scheduler is running.
    pub fn add_task(&self, spec: TaskSpec) -> TaskId {
        let (id, priority) = {
            let mut table = self.lock_table();
            let id = TaskId(table.next_id);
            table.next_id += 1;

            let task = Task::new(id, spec, self.shared.config.default_max_retries);
            let priority = task.priority;
            table.tasks.insert(id, task);
            (id, priority)
        };

        tracing::debug!("Added {} with {} priority", id, priority);
        self.notify_changed();
        self.dispatch();
        id
    }

    /// Starts dispatching tasks
    ///
    /// Calling this while already running only logs.
    pub fn start(&self) {
        {
            let mut table = self.lock_table();
            if table.is_running {
                tracing::info!("Scheduler is already running");
                return;
            }
            table.is_running = true;
        }

        tracing::info!("Scheduler started");
        self.notify_changed();
        self.dispatch();
    }

    /// Stops dispatching new tasks
    ///
    /// Attempts already in flight run to completion.
    pub fn stop(&self) {
        let in_flight = {
            let mut table = self.lock_table();
            table.is_running = false;
            table.running.len()
        };

        tracing::info!("Scheduler stopped ({} task(s) still in flight)", in_flight);
        self.notify_changed();
    }

    pub fn is_running(&self) -> bool {
        self.lock_table().is_running
    }

    /// Returns a snapshot of a task
    pub fn get_task(&self, id: TaskId) -> Option<Task> {
        self.lock_table().tasks.get(&id).cloned()
    }

    /// Returns snapshots of all tasks in insertion order
    pub fn list_tasks(&self) -> Vec<Task> {
        self.lock_table().tasks.values().cloned().collect()
    }

    /// Removes a pending or finished task
    ///
    /// Returns false if the task is running (it cannot be interrupted) or
    /// does not exist.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        let removed = {
            let mut table = self.lock_table();
            match table.tasks.get(&id) {
                Some(task) if task.status == TaskStatus::Running => {
                    tracing::debug!("Refusing to cancel running {}", id);
                    false
                }
                Some(_) => table.tasks.remove(&id).is_some(),
                None => false,
            }
        };

        if removed {
            tracing::info!("Cancelled {}", id);
            self.notify_changed();
        }
        removed
    }

    /// Removes all completed tasks and returns how many were removed
    pub fn clear_completed(&self) -> usize {
        let removed = {
            let mut table = self.lock_table();
            let before = table.tasks.len();
            table
                .tasks
                .retain(|_, task| task.status != TaskStatus::Completed);
            before - table.tasks.len()
        };

        if removed > 0 {
            tracing::debug!("Cleared {} completed task(s)", removed);
            self.notify_changed();
        }
        removed
    }

    /// Returns task counts per status
    pub fn stats(&self) -> SchedulerStats {
        let table = self.lock_table();
        let mut stats = SchedulerStats {
            total: table.tasks.len(),
            ..SchedulerStats::default()
        };

        for task in table.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Changes the concurrency bound to `max(1, n)`
    ///
    /// Running tasks are never interrupted; the new bound applies from the
    /// next dispatch pass.
    pub fn set_max_concurrent(&self, n: usize) {
        let bound = n.max(1);
        self.lock_table().max_concurrent = bound;
        tracing::info!("Max concurrent tasks set to {}", bound);
    }

    pub fn max_concurrent(&self) -> usize {
        self.lock_table().max_concurrent
    }

    /// The classifier recording this scheduler's failures
    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.shared.classifier
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.shared.rate_limiter.as_ref()
    }

    pub fn proxy_pool(&self) -> Option<&Arc<ProxyPool>> {
        self.shared.proxy_pool.as_ref()
    }

    /// Fills free concurrency slots with admissible tasks
    ///
    /// Called internally on every trigger; callers owning a timer can call
    /// it to pick up tasks whose `scheduled_at` has passed.
    pub fn dispatch(&self) {
        let claimed: Vec<(TaskId, TaskParams, u32)> = {
            let mut table = self.lock_table();
            let now = Utc::now();
            std::iter::from_fn(|| table.claim_next(now)).collect()
        };

        if claimed.is_empty() {
            return;
        }
        self.notify_changed();

        for (id, params, attempt) in claimed {
            tracing::debug!("Dispatching {} (retry {})", id, attempt);
            let scheduler = self.clone();
            tokio::spawn(async move { scheduler.run_attempt(id, params, attempt).await });
        }
    }

    /// Waits until nothing is running and nothing admissible is waiting
    ///
    /// When the scheduler is stopped this resolves once in-flight attempts
    /// have finished. Tasks scheduled for the future don't keep it waiting.
    /// Crawl log entries of finished tasks have reached the sink by the time
    /// this returns.
    pub async fn wait_until_idle(&self) {
        let mut changes = self.shared.changed.subscribe();
        loop {
            if self.lock_table().is_idle(Utc::now()) {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    /// Runs one attempt of a claimed task
    async fn run_attempt(self, id: TaskId, params: TaskParams, attempt: u32) {
        if let Some(limiter) = &self.shared.rate_limiter {
            limiter.wait_for_slot().await;
        }

        let ctx = ExecutionContext {
            task_id: id,
            attempt,
            proxy: self
                .shared
                .proxy_pool
                .as_ref()
                .and_then(|pool| pool.next_endpoint()),
            rate_limiter: self.shared.rate_limiter.clone(),
        };

        let started = Instant::now();

        // Run the executor in its own task so a panic is contained
        let outcome = {
            let executor = self.shared.executor.clone();
            let params = params.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { executor.execute(&params, &ctx).await }).await
        };

        let outcome = match outcome {
            Ok(result) => result,
            Err(join_error) => Err(anyhow::anyhow!("executor panicked: {}", join_error)),
        };

        let duration = started.elapsed();
        match outcome {
            Ok(output) => self.complete_task(id, &params, &ctx, output, duration),
            Err(error) => self.fail_attempt(id, &params, &ctx, error, duration),
        }
    }

    fn complete_task(
        &self,
        id: TaskId,
        params: &TaskParams,
        ctx: &ExecutionContext,
        output: CrawlOutput,
        duration: Duration,
    ) {
        if let (Some(pool), Some(proxy)) = (&self.shared.proxy_pool, &ctx.proxy) {
            pool.record_success(proxy);
        }

        let item_count = output.item_count;
        {
            let mut table = self.lock_table();
            table.running.remove(&id);
            table.pending_logs += 1;
            if let Some(task) = table.tasks.get_mut(&id) {
                task.status = TaskStatus::Completed;
                task.result = Some(output);
                task.finished_at = Some(Utc::now());
            }
        }

        tracing::info!(
            "Completed {} with {} item(s) in {:?}",
            id,
            item_count,
            duration
        );

        self.record_log(CrawlLogEntry {
            task_id: id,
            summary: summarize_params(params),
            success: true,
            item_count,
            error_message: None,
            duration_ms: duration.as_millis() as u64,
            recorded_at: Utc::now(),
        });
        self.notify_changed();
        self.dispatch();
    }

    fn fail_attempt(
        &self,
        id: TaskId,
        params: &TaskParams,
        ctx: &ExecutionContext,
        error: anyhow::Error,
        duration: Duration,
    ) {
        let source_url = params.get("url").and_then(|v| v.as_str());
        let classified = self.shared.classifier.classify_error(&error, source_url);

        // A block is attributed to the egress identity right away; transport
        // failures only count toward the pool's failure threshold
        if let (Some(pool), Some(proxy)) = (&self.shared.proxy_pool, &ctx.proxy) {
            match classified.kind {
                ErrorKind::Blocked => pool.mark_failed(proxy),
                ErrorKind::Network | ErrorKind::Timeout => {
                    pool.record_failure(proxy);
                }
                _ => {}
            }
        }

        let give_up_early = self.shared.config.respect_retryable && !classified.retryable;

        let outcome = {
            let mut guard = self.lock_table();
            let table = &mut *guard;
            table.running.remove(&id);
            match table.tasks.get_mut(&id) {
                Some(task) => {
                    task.last_error = Some(classified.message.clone());
                    task.last_error_kind = Some(classified.kind);

                    if task.retry_count < task.max_retries && !give_up_early {
                        task.retry_count += 1;
                        task.status = TaskStatus::Pending;
                        FailureOutcome::Retry {
                            retry_count: task.retry_count,
                            max_retries: task.max_retries,
                        }
                    } else {
                        task.status = TaskStatus::Failed;
                        task.finished_at = Some(Utc::now());
                        table.pending_logs += 1;
                        FailureOutcome::Failed
                    }
                }
                None => FailureOutcome::Gone,
            }
        };

        match outcome {
            FailureOutcome::Retry {
                retry_count,
                max_retries,
            } => {
                tracing::warn!(
                    "{} failed ({}), retry {}/{}",
                    id,
                    classified.kind,
                    retry_count,
                    max_retries
                );
                self.notify_changed();

                let scheduler = self.clone();
                let pause = Duration::from_millis(self.shared.config.retry_pause_ms);
                tokio::spawn(async move {
                    tokio::time::sleep(pause).await;
                    scheduler.dispatch();
                });
            }
            FailureOutcome::Failed => {
                tracing::error!("{} failed permanently: {}", id, classified.message);
                self.record_log(CrawlLogEntry {
                    task_id: id,
                    summary: summarize_params(params),
                    success: false,
                    item_count: 0,
                    error_message: Some(classified.message),
                    duration_ms: duration.as_millis() as u64,
                    recorded_at: Utc::now(),
                });
                self.notify_changed();
                self.dispatch();
            }
            FailureOutcome::Gone => {
                self.notify_changed();
                self.dispatch();
            }
        }
    }

    /// Sends an entry to the log sink without blocking the caller
    ///
    /// The caller must have counted the entry in `pending_logs` while it
    /// moved the task to its terminal state, so [`Scheduler::wait_until_idle`]
    /// never resolves between the two. A failing sink is only logged.
    fn record_log(&self, entry: CrawlLogEntry) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.shared.sink.record(&entry).await {
                tracing::warn!("Failed to record crawl log for {}: {:#}", entry.task_id, e);
            }

            {
                let mut table = scheduler.lock_table();
                table.pending_logs = table.pending_logs.saturating_sub(1);
            }
            scheduler.notify_changed();
        });
    }

    fn notify_changed(&self) {
        self.shared
            .changed
            .send_modify(|version| *version = version.wrapping_add(1));
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, TaskTable> {
        self.shared
            .table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}
