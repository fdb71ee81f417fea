use crate::config::RateLimiterConfig;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Longest a waiter sleeps before re-checking the windows
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Snapshot of the limiter's windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimiterStats {
    pub requests_in_last_minute: usize,
    pub requests_in_last_hour: usize,
    pub is_in_cooldown: bool,
}

/// Timestamps of admitted requests plus the cooldown deadline
#[derive(Debug, Default)]
struct Window {
    /// Oldest first
    timestamps: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
}

impl Window {
    /// Drops timestamps that fell out of the hourly horizon
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= HOUR {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Counts timestamps younger than `horizon`
    fn count_within(&self, now: Instant, horizon: Duration) -> usize {
        self.timestamps
            .iter()
            .rev()
            .take_while(|&&t| now.saturating_duration_since(t) < horizon)
            .count()
    }
}

/// Sliding-window rate limiter with an hourly cooldown
///
/// The limiter is shared through an `Arc` by every task attempt. All window
/// state sits behind one mutex; the lock is never held across an await.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    window: Mutex<Window>,
    released: Notify,
}

impl RateLimiter {
    /// Creates a new rate limiter
    ///
    /// # Arguments
    ///
    /// * `config` - Window sizes and cooldown duration
    ///
    /// Both request limits are raised to at least 1.
    pub fn new(mut config: RateLimiterConfig) -> Self {
        config.max_requests_per_minute = config.max_requests_per_minute.max(1);
        config.max_requests_per_hour = config.max_requests_per_hour.max(1);

        Self {
            config,
            window: Mutex::new(Window::default()),
            released: Notify::new(),
        }
    }

    /// Returns the limiter configuration
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Checks whether a request may be made right now
    ///
    /// Returns false while in cooldown or when the per-minute window is full.
    /// Reaching the hourly ceiling returns false and starts a cooldown.
    pub fn can_make_request(&self) -> bool {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        self.time_until_open(&mut window, Instant::now()).is_none()
    }

    /// Records an admitted request at the current instant
    pub fn record_request(&self) {
        let now = Instant::now();
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.timestamps.push_back(now);
    }

    /// Waits until a request is admissible, then records it
    ///
    /// The waiter sleeps until the earliest instant the windows can admit a
    /// request (never longer than [`POLL_INTERVAL`] between checks) and is
    /// woken immediately by [`RateLimiter::reset`].
    pub async fn wait_for_slot(&self) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let wait = {
                let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
                let now = Instant::now();
                match self.time_until_open(&mut window, now) {
                    None => {
                        window.timestamps.push_back(now);
                        return;
                    }
                    Some(wait) => wait,
                }
            };

            tracing::debug!("Rate limit reached, waiting {:?} for a slot", wait);

            tokio::select! {
                _ = &mut released => {}
                _ = tokio::time::sleep(wait.min(POLL_INTERVAL)) => {}
            }
        }
    }

    /// Returns the current window counts and cooldown flag
    pub fn stats(&self) -> RateLimiterStats {
        let now = Instant::now();
        let window = self.window.lock().unwrap_or_else(|e| e.into_inner());

        RateLimiterStats {
            requests_in_last_minute: window.count_within(now, MINUTE),
            requests_in_last_hour: window.count_within(now, HOUR),
            is_in_cooldown: window.cooldown_until.is_some_and(|until| now < until),
        }
    }

    /// Clears all tracked requests and ends any cooldown
    pub fn reset(&self) {
        {
            let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
            window.timestamps.clear();
            window.cooldown_until = None;
        }
        tracing::info!("Rate limiter reset");
        self.released.notify_waiters();
    }

    /// Returns `None` when a request can be made at `now`, otherwise how long
    /// until the limiting window could open
    ///
    /// Expired cooldowns are cleared here, together with the request history.
    fn time_until_open(&self, window: &mut Window, now: Instant) -> Option<Duration> {
        if let Some(until) = window.cooldown_until {
            if now < until {
                return Some(until - now);
            }
            window.cooldown_until = None;
            window.timestamps.clear();
            tracing::info!("Rate limiter cooldown finished, request history cleared");
        }

        window.prune(now);

        let in_minute = window.count_within(now, MINUTE);
        if in_minute >= self.config.max_requests_per_minute as usize {
            let oldest_in_minute = window.timestamps[window.timestamps.len() - in_minute];
            return Some(MINUTE.saturating_sub(now.saturating_duration_since(oldest_in_minute)));
        }

        let in_hour = window.count_within(now, HOUR);
        if in_hour >= self.config.max_requests_per_hour as usize {
            let cooldown = Duration::from_millis(self.config.cooldown_ms);
            window.cooldown_until = Some(now + cooldown);
            tracing::warn!(
                "Hourly request limit of {} reached, cooling down for {:?}",
                self.config.max_requests_per_hour,
                cooldown
            );
            return Some(cooldown);
        }

        None
    }
}
