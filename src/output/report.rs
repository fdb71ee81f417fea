use crate::classify::{ErrorKind, ErrorStats};
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::throttle::RateLimiterStats;
use serde::Serialize;
use std::fmt::Write;

/// Snapshot of scheduler, classifier, rate limiter and proxy pool state
#[derive(Debug, Clone, Serialize)]
pub struct EngineReport {
    pub tasks: SchedulerStats,
    pub errors: ErrorStats,

    /// `None` when the scheduler runs without a rate limiter
    pub rate_limiter: Option<RateLimiterStats>,

    /// Active proxies, `None` when the scheduler runs without a pool
    pub active_proxies: Option<usize>,
}

impl EngineReport {
    /// Collects the current statistics from a scheduler and its collaborators
    pub fn collect(scheduler: &Scheduler) -> Self {
        Self {
            tasks: scheduler.stats(),
            errors: scheduler.classifier().stats(),
            rate_limiter: scheduler.rate_limiter().map(|limiter| limiter.stats()),
            active_proxies: scheduler.proxy_pool().map(|pool| pool.active_count()),
        }
    }

    /// Share of finished tasks that completed, in percent
    pub fn success_rate(&self) -> f64 {
        let finished = self.tasks.completed + self.tasks.failed;
        if finished == 0 {
            0.0
        } else {
            (self.tasks.completed as f64 / finished as f64) * 100.0
        }
    }
}

/// Renders a report as plain text
pub fn render_report(report: &EngineReport) -> String {
    let mut out = String::new();
    let tasks = &report.tasks;

    // Writing to a String cannot fail
    let _ = writeln!(out, "=== Trendcrawl Report ===\n");

    let _ = writeln!(out, "Tasks:");
    let _ = writeln!(out, "  Total: {}", tasks.total);
    let _ = writeln!(out, "  Pending: {}", tasks.pending);
    let _ = writeln!(out, "  Running: {}", tasks.running);
    let _ = writeln!(out, "  Completed: {}", tasks.completed);
    let _ = writeln!(out, "  Failed: {}", tasks.failed);
    let _ = writeln!(out);

    if report.errors.total > 0 {
        let _ = writeln!(
            out,
            "Errors ({} retryable, {} not):",
            report.errors.retryable_count, report.errors.non_retryable_count
        );
        for kind in ErrorKind::ALL {
            if let Some(count) = report.errors.by_kind.get(&kind).filter(|c| **c > 0) {
                let _ = writeln!(out, "  {}: {}", kind, count);
            }
        }
        let _ = writeln!(out);
    }

    if let Some(limiter) = &report.rate_limiter {
        let _ = writeln!(out, "Rate Limiter:");
        let _ = writeln!(out, "  Last minute: {}", limiter.requests_in_last_minute);
        let _ = writeln!(out, "  Last hour: {}", limiter.requests_in_last_hour);
        if limiter.is_in_cooldown {
            let _ = writeln!(out, "  In cooldown");
        }
        let _ = writeln!(out);
    }

    if let Some(active) = report.active_proxies {
        let _ = writeln!(out, "Active Proxies: {}\n", active);
    }

    let _ = write!(
        out,
        "Success Rate: {:.1}% ({} / {} finished tasks)",
        report.success_rate(),
        tasks.completed,
        tasks.completed + tasks.failed
    );
    out
}

/// Prints a report to stdout
pub fn print_report(report: &EngineReport) {
    println!("{}", render_report(report));
}
