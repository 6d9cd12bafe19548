use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use log::warn;
use tokio::sync::Mutex;

use crate::{RATE_LIMIT_MAX_REQUESTS, RATE_LIMIT_WINDOW_MS};

/// Per-IP sliding window: at most `max_requests` handler invocations within
/// any `window`. Checked pre-dispatch, so a rejected request never reaches
/// its handler.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<IpAddr, Vec<Instant>>>>,
    window: Duration,
    max_requests: usize,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_requests,
        }
    }

    /// Drops expired entries for the caller, then either records the request
    /// or reports the window as full.
    pub async fn check(&self, ip: IpAddr) -> bool {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        let bucket = buckets.entry(ip).or_default();
        bucket.retain(|t| now.duration_since(*t) < self.window);
        if bucket.len() >= self.max_requests {
            false
        } else {
            bucket.push(now);
            true
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(RATE_LIMIT_WINDOW_MS),
            RATE_LIMIT_MAX_REQUESTS,
        )
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !limiter.check(addr.ip()).await {
        warn!("Rate limit exceeded for {}", addr.ip());
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 5);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        for _ in 0..5 {
            assert!(limiter.check(ip).await);
        }
        assert!(!limiter.check(ip).await);
    }

    #[tokio::test]
    async fn test_buckets_are_per_ip() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        let ip1: IpAddr = "10.0.0.1".parse().unwrap();
        let ip2: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(ip1).await);
        assert!(limiter.check(ip1).await);
        assert!(!limiter.check(ip1).await);

        assert!(limiter.check(ip2).await);
    }

    #[tokio::test]
    async fn test_expired_entries_free_the_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        let ip: IpAddr = "192.168.1.9".parse().unwrap();

        // Backdate a full bucket past the window edge.
        let stale = Instant::now() - Duration::from_secs(61);
        limiter
            .buckets
            .lock()
            .await
            .insert(ip, vec![stale, stale]);

        assert!(limiter.check(ip).await);
    }
}
