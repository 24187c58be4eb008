//! Per-client fixed-window rate limiter
//!
//! Each client key gets `limit` requests per `window`. The window starts at
//! the client's first request and resets once it has fully elapsed.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::error::ServiceError;

pub const DEFAULT_LIMIT_PER_MINUTE: u32 = 100;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

pub struct FixedWindowRateLimiter {
    limit: u32,
    window: Duration,
    clients: DashMap<String, Window>,
}

impl FixedWindowRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            clients: DashMap::new(),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count one request from `client`. `false` once the window is used up.
    pub fn allow(&self, client: &str) -> bool {
        self.allow_at(client, Instant::now())
    }

    pub fn check(&self, client: &str) -> Result<(), ServiceError> {
        if self.allow(client) {
            Ok(())
        } else {
            Err(ServiceError::RateLimited)
        }
    }

    fn allow_at(&self, client: &str, now: Instant) -> bool {
        // The entry guard holds the shard lock, so count-and-compare is atomic
        let mut entry = self.clients.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window { started: now, count: 0 };
        }
        if entry.count >= self.limit {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Drop clients whose window has elapsed. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    fn evict_expired_at(&self, now: Instant) -> usize {
        let before = self.clients.len();
        self.clients
            .retain(|_, w| now.duration_since(w.started) < self.window);
        before.saturating_sub(self.clients.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}

impl Default for FixedWindowRateLimiter {
    fn default() -> Self {
        Self::per_minute(DEFAULT_LIMIT_PER_MINUTE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_limit_per_client() {
        let limiter = FixedWindowRateLimiter::per_minute(3);
        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.2"));
        assert_eq!(limiter.check("10.0.0.1"), Err(ServiceError::RateLimited));
    }

    #[test]
    fn test_window_resets() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(limiter.allow_at("c", t0));
        assert!(!limiter.allow_at("c", t0 + Duration::from_secs(59)));
        assert!(limiter.allow_at("c", t0 + Duration::from_secs(60)));
    }

    #[test]
    fn test_evict_expired() {
        let limiter = FixedWindowRateLimiter::new(10, Duration::from_secs(60));
        let t0 = Instant::now();
        limiter.allow_at("old", t0);
        limiter.allow_at("new", t0 + Duration::from_secs(30));
        assert_eq!(limiter.evict_expired_at(t0 + Duration::from_secs(61)), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_default_is_hundred_per_minute() {
        let limiter = FixedWindowRateLimiter::default();
        assert_eq!(limiter.limit(), 100);
        for _ in 0..100 {
            assert!(limiter.allow("c"));
        }
        assert!(!limiter.allow("c"));
    }

    #[test]
    fn test_concurrent_requests_never_exceed_limit() {
        let limiter = Arc::new(FixedWindowRateLimiter::per_minute(100));
        let allowed = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let allowed = allowed.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        if limiter.allow("shared") {
                            allowed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(allowed.load(Ordering::Relaxed), 100);
    }
}
