//! Rate limiting middleware
//!
//! Windowed in-memory limiter applied to session start, the only endpoint a
//! crawler can hammer without a session id. Suitable for single-instance
//! deployments; a distributed deployment would move the counters to Redis.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum number of requests allowed in the window
    pub max_requests: u32,
    /// Time window duration
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Strict limit for the admission endpoint
    pub fn strict() -> Self {
        Self {
            max_requests: 20,
            window: Duration::from_secs(60),
        }
    }
}

/// Track request counts per IP
#[derive(Debug)]
struct RequestTracker {
    count: u32,
    window_start: Instant,
}

/// Rate limit rejection with a retry hint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub retry_after_secs: u32,
}

/// In-memory windowed rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    requests: Arc<RwLock<HashMap<IpAddr, RequestTracker>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            requests: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Check whether a request from the given IP is allowed, counting it if
    /// so.
    pub async fn check(&self, ip: IpAddr) -> Result<(), RateLimited> {
        let mut requests = self.requests.write().await;
        let now = Instant::now();

        let tracker = requests.entry(ip).or_insert(RequestTracker {
            count: 0,
            window_start: now,
        });

        // Reset window if expired
        if now.duration_since(tracker.window_start) >= self.config.window {
            tracker.count = 0;
            tracker.window_start = now;
        }

        if tracker.count >= self.config.max_requests {
            let elapsed = now.duration_since(tracker.window_start).as_secs();
            let retry_after = self.config.window.as_secs().saturating_sub(elapsed);
            return Err(RateLimited {
                retry_after_secs: retry_after as u32,
            });
        }

        tracker.count += 1;
        Ok(())
    }

    /// Drop trackers whose window has long expired. Called opportunistically
    /// by the background sweeper to bound memory.
    pub async fn prune(&self) {
        let mut requests = self.requests.write().await;
        let now = Instant::now();
        let window = self.config.window;
        requests.retain(|_, t| now.duration_since(t.window_start) < window * 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(RateLimitConfig::new(3, 60));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        for _ in 0..3 {
            assert!(limiter.check(ip).await.is_ok());
        }
        assert!(limiter.check(ip).await.is_err());
    }

    #[tokio::test]
    async fn limits_are_per_ip() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, 60));
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(a).await.is_ok());
        assert!(limiter.check(a).await.is_err());
        assert!(limiter.check(b).await.is_ok());
    }

    #[tokio::test]
    async fn prune_keeps_recent_trackers() {
        let limiter = RateLimiter::new(RateLimitConfig::new(5, 60));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        limiter.check(ip).await.unwrap();
        limiter.prune().await;
        // Tracker still within its window survives the prune
        assert!(limiter.check(ip).await.is_ok());
    }
}
