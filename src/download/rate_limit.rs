//! Request pacing shared by all download workers.
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

/// Leaky-bucket limiter: request starts are spaced at least `interval` apart,
/// across every thread holding the same limiter.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reserve the next start slot and block until it arrives.
    /// Returns how long the caller waited.
    pub fn acquire(&self) -> Duration {
        if self.interval.is_zero() {
            return Duration::ZERO;
        }
        let wait = {
            let mut next = self
                .next_slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            let slot = next.map_or(now, |n| n.max(now));
            *next = Some(slot + self.interval);
            slot - now
        };
        if !wait.is_zero() {
            trace!("Rate limiter holding request for {:?}", wait);
            thread::sleep(wait);
        }
        wait
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        for _ in 0..100 {
            assert_eq!(limiter.acquire(), Duration::ZERO);
        }
    }

    #[test]
    fn test_requests_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_millis(20));
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire();
        }
        // First slot is immediate, the other three wait one interval each.
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_spacing_holds_across_threads() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(15)));
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || limiter.acquire())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(45));
    }
}
