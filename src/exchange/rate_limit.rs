use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::ExchangeError;

/// Sliding-window request limiter keyed by endpoint family.
///
/// Advisory only: a rejected call is reported as `RateLimitExceeded` and
/// never queued or retried.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    calls: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Record a call under `key`, or reject it if the window is full.
    pub fn check(&self, key: &str) -> Result<(), ExchangeError> {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), ExchangeError> {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        let entries = calls.entry(key.to_string()).or_default();

        while let Some(oldest) = entries.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() >= self.limit {
            return Err(ExchangeError::RateLimitExceeded(format!(
                "{}: {} calls in {}s",
                key,
                entries.len(),
                self.window.as_secs()
            )));
        }

        entries.push_back(now);
        Ok(())
    }

    /// Calls currently counted for `key`
    pub fn in_window(&self, key: &str) -> usize {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.get(key).map(VecDeque::len).unwrap_or(0)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(1200, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_call_at_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();

        for i in 0..3 {
            limiter
                .check_at("create_order", start + Duration::from_millis(i))
                .unwrap();
        }
        let err = limiter
            .check_at("create_order", start + Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::RateLimitExceeded(_)));
        // rejected call is not recorded
        assert_eq!(limiter.in_window("create_order"), 3);
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();

        limiter.check_at("depth", start).unwrap();
        limiter.check_at("depth", start + Duration::from_secs(30)).unwrap();
        assert!(limiter.check_at("depth", start + Duration::from_secs(59)).is_err());

        // first call has aged out
        limiter.check_at("depth", start + Duration::from_secs(61)).unwrap();
        assert_eq!(limiter.in_window("depth"), 2);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        limiter.check_at("price_BTCUSDT", now).unwrap();
        limiter.check_at("price_ETHUSDT", now).unwrap();
        assert!(limiter.check_at("price_BTCUSDT", now).is_err());
    }
}
