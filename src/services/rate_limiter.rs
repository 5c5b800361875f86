//! In-memory rate limiting
//!
//! - Failed admin logins per username (5 attempts per 15 minutes)
//! - Inbound API requests per client IP (sliding window, configurable)
//!
//! State lives in the process, so limits are per instance.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::RateLimitConfig;

const MAX_LOGIN_ATTEMPTS: usize = 5;
const LOGIN_WINDOW_MINUTES: i64 = 15;

/// Every this many requests, the request limiter sweeps stale windows
const CLEANUP_EVERY: u64 = 1_000;

/// Failed login limiter
pub struct LoginRateLimiter {
    username_attempts: Arc<RwLock<HashMap<String, Vec<DateTime<Utc>>>>>,
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self {
            username_attempts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Whether `username` already has 5 failures in the last 15 minutes
    pub async fn is_username_limited(&self, username: &str) -> bool {
        let mut attempts = self.username_attempts.write().await;
        let cutoff = Utc::now() - Duration::minutes(LOGIN_WINDOW_MINUTES);

        let username_attempts = attempts.entry(username.to_lowercase()).or_default();
        username_attempts.retain(|time| *time > cutoff);
        username_attempts.len() >= MAX_LOGIN_ATTEMPTS
    }

    pub async fn record_failed_attempt(&self, username: &str) {
        let mut attempts = self.username_attempts.write().await;
        attempts
            .entry(username.to_lowercase())
            .or_default()
            .push(Utc::now());
    }

    /// Forget failures after a successful login
    pub async fn clear_username_attempts(&self, username: &str) {
        self.username_attempts
            .write()
            .await
            .remove(&username.to_lowercase());
    }

    pub async fn cleanup(&self) {
        let cutoff = Utc::now() - Duration::minutes(LOGIN_WINDOW_MINUTES);
        let mut attempts = self.username_attempts.write().await;
        attempts.retain(|_, times| {
            times.retain(|time| *time > cutoff);
            !times.is_empty()
        });
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a request limiter check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: usize },
    Limited { retry_after_secs: i64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Per-IP sliding window limiter for the public API
pub struct RequestRateLimiter {
    max_requests: usize,
    window: Duration,
    windows: RwLock<HashMap<IpAddr, Vec<DateTime<Utc>>>>,
    seen: AtomicU64,
}

impl RequestRateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            windows: RwLock::new(HashMap::new()),
            seen: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.requests_per_window,
            Duration::seconds(config.window_seconds.max(1)),
        )
    }

    /// Count a request from `ip` and decide whether it may proceed.
    ///
    /// Rejected requests are not recorded, so a client that backs off
    /// regains capacity as its old requests age out.
    pub async fn check(&self, ip: IpAddr) -> RateDecision {
        self.check_at(ip, Utc::now()).await
    }

    async fn check_at(&self, ip: IpAddr, now: DateTime<Utc>) -> RateDecision {
        if self.seen.fetch_add(1, Ordering::Relaxed) % CLEANUP_EVERY == CLEANUP_EVERY - 1 {
            self.cleanup_at(now).await;
        }

        let cutoff = now - self.window;
        let mut windows = self.windows.write().await;
        let hits = windows.entry(ip).or_default();
        hits.retain(|time| *time > cutoff);

        if hits.len() >= self.max_requests {
            let oldest = hits.first().copied().unwrap_or(now);
            let retry_after = (oldest + self.window - now).num_seconds().max(1);
            return RateDecision::Limited {
                retry_after_secs: retry_after,
            };
        }

        hits.push(now);
        RateDecision::Allowed {
            remaining: self.max_requests - hits.len(),
        }
    }

    /// Drop windows with no request inside the current window
    pub async fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now()).await
    }

    async fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        let mut windows = self.windows.write().await;
        let before = windows.len();
        windows.retain(|_, hits| {
            hits.retain(|time| *time > cutoff);
            !hits.is_empty()
        });
        before - windows.len()
    }

    pub async fn tracked_clients(&self) -> usize {
        self.windows.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn test_username_rate_limit() {
        let limiter = LoginRateLimiter::new();

        for _ in 0..4 {
            assert!(!limiter.is_username_limited("testuser").await);
            limiter.record_failed_attempt("testuser").await;
        }
        limiter.record_failed_attempt("testuser").await;
        assert!(limiter.is_username_limited("testuser").await);

        limiter.clear_username_attempts("testuser").await;
        assert!(!limiter.is_username_limited("testuser").await);
    }

    #[tokio::test]
    async fn test_case_insensitive_username() {
        let limiter = LoginRateLimiter::new();
        for name in ["Admin", "admin", "ADMIN", "aDmIn", "admin"] {
            limiter.record_failed_attempt(name).await;
        }
        assert!(limiter.is_username_limited("Admin").await);
    }

    #[tokio::test]
    async fn test_request_window_limits_and_recovers() {
        let limiter = RequestRateLimiter::new(3, Duration::seconds(60));
        let ip = IpAddr::from_str("10.0.0.1").unwrap();
        let start = Utc::now();

        assert_eq!(
            limiter.check_at(ip, start).await,
            RateDecision::Allowed { remaining: 2 }
        );
        assert!(limiter.check_at(ip, start).await.is_allowed());
        assert!(limiter.check_at(ip, start).await.is_allowed());

        match limiter.check_at(ip, start + Duration::seconds(10)).await {
            RateDecision::Limited { retry_after_secs } => assert_eq!(retry_after_secs, 50),
            other => panic!("expected limit, got {:?}", other),
        }

        assert!(limiter
            .check_at(ip, start + Duration::seconds(61))
            .await
            .is_allowed());
    }

    #[tokio::test]
    async fn test_request_limits_are_per_ip() {
        let limiter = RequestRateLimiter::new(1, Duration::seconds(60));
        let a = IpAddr::from_str("10.0.0.1").unwrap();
        let b = IpAddr::from_str("10.0.0.2").unwrap();

        assert!(limiter.check(a).await.is_allowed());
        assert!(!limiter.check(a).await.is_allowed());
        assert!(limiter.check(b).await.is_allowed());
    }

    #[tokio::test]
    async fn test_cleanup_drops_stale_windows() {
        let limiter = RequestRateLimiter::new(10, Duration::seconds(60));
        let ip = IpAddr::from_str("192.168.1.1").unwrap();
        let old = Utc::now() - Duration::seconds(120);
        limiter.check_at(ip, old).await;
        assert_eq!(limiter.tracked_clients().await, 1);

        assert_eq!(limiter.cleanup().await, 1);
        assert_eq!(limiter.tracked_clients().await, 0);
    }
}
