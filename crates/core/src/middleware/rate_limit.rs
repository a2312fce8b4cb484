//! Token-bucket rate limiting.
//!
//! The bucket table is owned by the middleware and guarded by its own
//! mutex; the dispatch pipeline imposes no locking discipline of its own.
//! The lock is never held across an await point.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::CallError;
use crate::middleware::{Flow, Middleware};
use crate::request::{Params, Request};

type KeyFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// Allows `capacity` calls per `window` per client key, continuously
/// refilled.
pub struct RateLimit {
    capacity: f64,
    window: Duration,
    key_fn: KeyFn,
    buckets: Mutex<HashMap<String, Bucket>>,
}

struct Bucket {
    tokens: f64,
    refilled: Instant,
}

impl RateLimit {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity: f64::from(capacity.max(1)),
            window,
            key_fn: Arc::new(default_key),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides how a request maps to a bucket key (an API token, a
    /// tenant id, ...).
    pub fn key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(key_fn);
        self
    }

    /// Takes one token for `key`; `Err` carries the seconds until the next
    /// token is available.
    fn take(&self, key: &str, now: Instant) -> Result<(), u64> {
        let refill_per_sec = self.capacity / self.window.as_secs_f64();

        let mut buckets = self.buckets.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let bucket = buckets
            .entry(key.to_owned())
            .or_insert_with(|| Bucket { tokens: self.capacity, refilled: now });

        let elapsed = now.saturating_duration_since(bucket.refilled).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(self.capacity);
        bucket.refilled = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let wait = (1.0 - bucket.tokens) / refill_per_sec;
            Err(wait.ceil() as u64)
        }
    }
}

fn default_key(req: &Request) -> String {
    req.header("x-forwarded-for")
        .map(|forwarded| forwarded.split(',').next().unwrap_or(forwarded).trim().to_owned())
        .or_else(|| req.header("host").map(str::to_owned))
        .unwrap_or_else(|| "anonymous".to_owned())
}

#[async_trait]
impl Middleware for RateLimit {
    async fn before(&self, req: &Request, _kwargs: &mut Params) -> Result<Flow, CallError> {
        let key = (self.key_fn)(req);
        match self.take(&key, Instant::now()) {
            Ok(()) => Ok(Flow::Continue),
            Err(retry_after) => {
                debug!(key = %key, retry_after, "rate limit exceeded");
                Err(CallError::RateLimitExceeded { retry_after })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[tokio::test]
    async fn allows_up_to_capacity_then_rejects() {
        let limiter = RateLimit::new(2, Duration::from_secs(60));
        let req = Request::builder().path("/").header("x-forwarded-for", "10.0.0.1").build();
        let mut kwargs = Params::new();

        assert!(limiter.before(&req, &mut kwargs).await.is_ok());
        assert!(limiter.before(&req, &mut kwargs).await.is_ok());

        let err = limiter.before(&req, &mut kwargs).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(matches!(err, CallError::RateLimitExceeded { retry_after } if retry_after >= 1));
    }

    #[tokio::test]
    async fn distinct_keys_get_distinct_buckets() {
        let limiter = RateLimit::new(1, Duration::from_secs(60));
        let first = Request::builder().path("/").header("x-forwarded-for", "10.0.0.1").build();
        let second = Request::builder().path("/").header("x-forwarded-for", "10.0.0.2").build();
        let mut kwargs = Params::new();

        assert!(limiter.before(&first, &mut kwargs).await.is_ok());
        assert!(limiter.before(&second, &mut kwargs).await.is_ok());
        assert!(limiter.before(&first, &mut kwargs).await.is_err());
    }

    #[test]
    fn bucket_refills_over_time() {
        let limiter = RateLimit::new(1, Duration::from_secs(1));
        let start = Instant::now();

        assert!(limiter.take("k", start).is_ok());
        assert!(limiter.take("k", start).is_err());
        assert!(limiter.take("k", start + Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn custom_key_fn_is_used() {
        let limiter = RateLimit::new(1, Duration::from_secs(60)).key_fn(|req| {
            req.header("x-api-key").unwrap_or("none").to_owned()
        });
        let req = Request::builder().path("/").header("x-api-key", "abc").build();
        assert_eq!((limiter.key_fn)(&req), "abc");
    }
}
