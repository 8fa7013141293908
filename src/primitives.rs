use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard};

/// Serializes a block of work so calls arriving within `interval` of the
/// previous one queue up behind it instead of running concurrently.
///
/// Grounded on the original bot's `Debounced` class (an `asyncio.Lock`
/// plus a `last_call_time` timestamp used as an async context manager):
/// `enter` sleeps up to `interval - (now - last_call)` before returning a
/// scoped guard, and the guard records the new `last_call` on whichever
/// exit path releases it (normal return, early return, or panic unwind).
/// The first caller is never delayed.
pub struct Debouncer {
    interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Debouncer {
            interval,
            last_call: Mutex::new(None),
        }
    }

    /// Blocks until this call's turn, sleeping out any remaining debounce
    /// window, then returns a guard that stamps the new `last_call` time
    /// when it is dropped (keeping the venue's work inside the debounced
    /// window instead of racing the next caller).
    pub async fn enter(&self) -> DebounceGuard<'_> {
        let mut guard = self.last_call.lock().await;
        if let Some(last) = *guard {
            let elapsed = Instant::now().duration_since(last);
            if elapsed < self.interval {
                tokio::time::sleep(self.interval - elapsed).await;
            }
        }
        DebounceGuard { last_call: guard }
    }
}

/// Scoped acquisition for a [`Debouncer`]; held across the guarded work so
/// the next caller is serialized behind this one, not just this one's wait.
pub struct DebounceGuard<'a> {
    last_call: MutexGuard<'a, Option<Instant>>,
}

impl Drop for DebounceGuard<'_> {
    fn drop(&mut self) {
        *self.last_call = Some(Instant::now());
    }
}

/// Leaky-bucket rate limiter: at most `max_calls` acquisitions in any
/// rolling `period`. Callers beyond the limit wait until the oldest call
/// in the window ages out.
///
/// Grounded on the original bot's `Limited` class (`asyncio.Lock` guarding
/// a bounded `asyncio.Queue` of call timestamps); the bounded queue is
/// realized here as a `VecDeque` with manual eviction, matching the style
/// of the rolling window used by the teacher's order-flow-imbalance
/// calculator.
pub struct RateLimiter {
    max_calls: usize,
    period: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, period: Duration) -> Self {
        RateLimiter {
            max_calls,
            period,
            calls: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                while let Some(&oldest) = calls.front() {
                    if now.duration_since(oldest) >= self.period {
                        calls.pop_front();
                    } else {
                        break;
                    }
                }
                if calls.len() < self.max_calls {
                    calls.push_back(now);
                    None
                } else {
                    let oldest = *calls.front().unwrap();
                    Some(self.period - now.duration_since(oldest))
                }
            };
            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn debouncer_does_not_delay_the_first_call() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let start = Instant::now();
        drop(debouncer.enter().await);
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn three_immediate_enters_resolve_one_interval_apart() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let start = Instant::now();
        drop(debouncer.enter().await);
        let first = start.elapsed();
        drop(debouncer.enter().await);
        let second = start.elapsed();
        drop(debouncer.enter().await);
        let third = start.elapsed();
        assert!(first < Duration::from_millis(20), "{first:?}");
        assert!(second >= Duration::from_millis(90) && second < Duration::from_millis(150), "{second:?}");
        assert!(third >= Duration::from_millis(190) && third < Duration::from_millis(260), "{third:?}");
    }

    #[tokio::test]
    async fn rate_limiter_admits_up_to_max_calls_immediately() {
        let limiter = RateLimiter::new(2, Duration::from_millis(200));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn rate_limiter_blocks_the_third_call_until_window_frees_up() {
        let limiter = RateLimiter::new(1, Duration::from_millis(100));
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
