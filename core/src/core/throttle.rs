//! Fixed-window rate limiter with a bounded-concurrency gate.
//!
//! Each `acquire` counts against the current window. Once `max_requests`
//! have been admitted, the next caller sleeps out the rest of the window while
//! holding the window lock, so everyone queued behind it waits too; the window
//! is then restarted. Admission also takes one of `max_requests` concurrency
//! slots, returned when the `RateSlot` is dropped.
//!
//! Window capacity and concurrency capacity are the same explicit value.

use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore, SemaphorePermit};

use crate::ReconConfig;

const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

pub struct RateLimiter {
    max_requests: usize,
    time_window: Duration,
    window: Mutex<WindowState>,
    slots: Semaphore,
}

struct WindowState {
    requests: usize,
    started: Instant,
}

impl WindowState {
    /// Restarts an elapsed window, then reports how long the caller has to
    /// wait if the window is already full.
    fn check(&mut self, now: Instant, max_requests: usize, time_window: Duration) -> Option<Duration> {
        if now.duration_since(self.started) >= time_window {
            self.restart(now);
        }
        if self.requests >= max_requests {
            Some(time_window.saturating_sub(now.duration_since(self.started)))
        } else {
            None
        }
    }

    fn restart(&mut self, now: Instant) {
        self.requests = 0;
        self.started = now;
    }
}

/// A granted admission. Dropping it releases the concurrency slot.
#[must_use = "dropping the slot releases it immediately"]
pub struct RateSlot<'a> {
    _permit: SemaphorePermit<'a>,
}

impl RateSlot<'_> {
    /// Returns the slot. Equivalent to dropping it.
    pub fn release(self) {}
}

impl RateLimiter {
    pub fn new(max_requests: usize, time_window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            max_requests,
            time_window,
            window: Mutex::new(WindowState {
                requests: 0,
                started: Instant::now(),
            }),
            slots: Semaphore::new(max_requests),
        }
    }

    /// `rate_limit.requests_per_second` admissions per one-second window.
    pub fn from_config(config: &ReconConfig) -> Self {
        Self::new(config.rate_limit.requests_per_second, DEFAULT_WINDOW)
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn time_window(&self) -> Duration {
        self.time_window
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub async fn acquire(&self) -> RateSlot<'_> {
        let mut window = self.window.lock().await;

        if let Some(wait) = window.check(Instant::now(), self.max_requests, self.time_window) {
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            window.restart(Instant::now());
        }

        // `slots` is owned by the limiter and never closed.
        let permit = self
            .slots
            .acquire()
            .await
            .expect("rate limiter semaphore closed unexpectedly");
        window.requests += 1;

        RateSlot { _permit: permit }
    }

    /// Blocking twin of [`acquire`](Self::acquire) for worker threads.
    /// Panics if called from inside an async task.
    pub fn acquire_blocking(&self) -> RateSlot<'_> {
        let mut window = self.window.blocking_lock();

        if let Some(wait) = window.check(Instant::now(), self.max_requests, self.time_window) {
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
            window.restart(Instant::now());
        }

        // `slots` is owned by the limiter and never closed.
        let permit = futures::executor::block_on(self.slots.acquire())
            .expect("rate limiter semaphore closed unexpectedly");
        window.requests += 1;

        RateSlot { _permit: permit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_third_acquire_waits_for_window_boundary() {
        let start = Instant::now();
        let limiter = RateLimiter::new(2, Duration::from_millis(500));

        let a = limiter.acquire().await;
        let b = limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(250));
        a.release();
        b.release();

        let c = limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
        drop(c);
    }

    #[tokio::test]
    async fn test_elapsed_window_resets_the_count() {
        let limiter = RateLimiter::new(2, Duration::from_millis(100));
        limiter.acquire().await.release();
        limiter.acquire().await.release();

        tokio::time::sleep(Duration::from_millis(150)).await;

        let start = Instant::now();
        limiter.acquire().await.release();
        limiter.acquire().await.release();
        assert!(start.elapsed() < Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_concurrency_gate_holds_until_release() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_millis(1)));
        let held = limiter.acquire().await;
        assert_eq!(limiter.available_slots(), 0);

        let blocked = tokio::time::timeout(Duration::from_millis(100), limiter.acquire()).await;
        assert!(blocked.is_err());

        drop(held);
        let granted = tokio::time::timeout(Duration::from_millis(500), limiter.acquire()).await;
        assert!(granted.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_callers_span_multiple_windows() {
        let limiter = Arc::new(RateLimiter::new(2, Duration::from_millis(250)));
        let start = Instant::now();

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    let slot = limiter.acquire().await;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    slot.release();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        // 5 admissions at 2 per window need at least two full window waits.
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(limiter.available_slots(), 2);
    }

    #[test]
    fn test_blocking_acquire_follows_the_same_window() {
        let start = Instant::now();
        let limiter = RateLimiter::new(2, Duration::from_millis(300));

        limiter.acquire_blocking().release();
        limiter.acquire_blocking().release();
        assert!(start.elapsed() < Duration::from_millis(150));

        limiter.acquire_blocking().release();
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn test_from_config_uses_requests_per_second() {
        let mut config = ReconConfig::default();
        config.rate_limit.requests_per_second = 4;
        let limiter = RateLimiter::from_config(&config);

        assert_eq!(limiter.max_requests(), 4);
        assert_eq!(limiter.available_slots(), 4);
        assert_eq!(limiter.time_window(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_capacity_is_clamped_to_one() {
        assert_eq!(RateLimiter::new(0, Duration::from_secs(1)).max_requests(), 1);
    }
}
