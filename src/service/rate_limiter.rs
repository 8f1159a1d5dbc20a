//! Fixed-window rate limiting over the durable store.
//!
//! Windows are calendar aligned: `window_start = now - now % window`. Each
//! check atomically increments the counter for the scope, conditioned on
//! the stored window matching the current one. When the condition fails
//! the window has rolled over and the row is overwritten with a count of
//! one. That overwrite is last-writer-wins: callers racing across the
//! boundary may each reset the count, briefly undercounting the first
//! requests of a window.
//!
//! Store failures fail closed.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;

use crate::error::GatewayError;
use crate::persistence::DurableStore;

/// Quota shared by every subject under one key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Key prefix separating this policy's counters from others.
    pub prefix: String,
    /// Requests allowed per window.
    pub max: u32,
    /// Window length in seconds.
    pub window_secs: u32,
}

impl RateLimitPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(prefix: impl Into<String>, max: u32, window_secs: u32) -> Self {
        Self {
            prefix: prefix.into(),
            max,
            window_secs: window_secs.max(1),
        }
    }

    /// Store key for `subject` under this policy.
    #[must_use]
    pub fn key_for(&self, subject: &str) -> String {
        format!("RL#{}#{subject}", self.prefix)
    }

    /// Start of the window containing `now` (Unix seconds).
    #[must_use]
    pub fn window_start(&self, now: i64) -> i64 {
        let window = i64::from(self.window_secs);
        now - now.rem_euclid(window)
    }
}

impl fmt::Display for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{}s)", self.prefix, self.max, self.window_secs)
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Seconds until the current window ends.
    pub retry_after_secs: u64,
}

impl RateLimitDecision {
    /// Converts a rejection into [`GatewayError::RateLimited`].
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::RateLimited`] when `allowed` is `false`.
    pub const fn into_result(self) -> Result<Self, GatewayError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(GatewayError::RateLimited {
                remaining: self.remaining,
                retry_after_secs: self.retry_after_secs,
            })
        }
    }
}

/// Generic fixed-window limiter shared by every endpoint.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn DurableStore>,
}

impl RateLimiter {
    /// Creates a limiter over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Counts one request for `subject` under `policy` at the current time.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::StoreUnavailable`] if the store cannot be
    /// reached. The request must then be rejected.
    pub async fn check(
        &self,
        policy: &RateLimitPolicy,
        subject: &str,
    ) -> Result<RateLimitDecision, GatewayError> {
        self.check_at(policy, subject, Utc::now().timestamp()).await
    }

    /// Counts one request for `subject` under `policy` at `now` (Unix seconds).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::StoreUnavailable`] if the store cannot be
    /// reached.
    pub async fn check_at(
        &self,
        policy: &RateLimitPolicy,
        subject: &str,
        now: i64,
    ) -> Result<RateLimitDecision, GatewayError> {
        let key = policy.key_for(subject);
        let window_start = policy.window_start(now);
        let window_end = window_start + i64::from(policy.window_secs);

        let count = match self
            .store
            .increment_window(&key, window_start, window_end)
            .await?
        {
            Some(count) => count,
            None => {
                self.store
                    .reset_window(&key, window_start, window_end)
                    .await?;
                tracing::debug!(%policy, subject, window_start, "rate limit window rolled over");
                1
            }
        };

        let max = u64::from(policy.max);
        let decision = RateLimitDecision {
            allowed: count <= max,
            remaining: u32::try_from(max.saturating_sub(count)).unwrap_or(0),
            retry_after_secs: u64::try_from(window_end - now).unwrap_or(0),
        };
        if !decision.allowed {
            tracing::info!(%policy, subject, count, "rate limit exceeded");
        }
        Ok(decision)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::persistence::testing::{FaultyStore, Op};
    use crate::persistence::{MemoryStore, StoreError};

    const HOUR: i64 = 3600;
    const NOW: i64 = 1_700_000_000 - 1_700_000_000 % HOUR + 10;

    fn limiter() -> (RateLimiter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (RateLimiter::new(Arc::clone(&store) as Arc<dyn DurableStore>), store)
    }

    #[test]
    fn windows_are_calendar_aligned() {
        let policy = RateLimitPolicy::new("SHOT", 10, 3600);
        assert_eq!(policy.window_start(7_205), 7_200);
        assert_eq!(policy.window_start(7_200), 7_200);
        assert_eq!(policy.key_for("1.2.3.4"), "RL#SHOT#1.2.3.4");
    }

    #[tokio::test]
    async fn allows_exactly_max_per_window() {
        let (limiter, _) = limiter();
        let policy = RateLimitPolicy::new("SHOT", 10, 3600);
        for i in 1..=10u32 {
            let Ok(decision) = limiter.check_at(&policy, "ip", NOW + i64::from(i)).await else {
                panic!("check failed");
            };
            assert!(decision.allowed, "request {i} should pass");
            assert_eq!(decision.remaining, 10 - i);
        }
        let Ok(decision) = limiter.check_at(&policy, "ip", NOW + 20).await else {
            panic!("check failed");
        };
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after_secs, u64::try_from(HOUR - 30).unwrap_or(0));
        assert!(matches!(
            decision.into_result(),
            Err(GatewayError::RateLimited { remaining: 0, .. })
        ));
    }

    #[tokio::test]
    async fn next_window_allows_again() {
        let (limiter, store) = limiter();
        let policy = RateLimitPolicy::new("SHOT", 2, 3600);
        for _ in 0..3 {
            let _ = limiter.check_at(&policy, "ip", NOW).await;
        }
        let Ok(decision) = limiter.check_at(&policy, "ip", NOW + HOUR).await else {
            panic!("check failed");
        };
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);

        let Some(row) = store.rate_limit_window(&policy.key_for("ip")).await else {
            panic!("row missing");
        };
        assert_eq!(row.count, 1);
        assert_eq!(row.window_start, policy.window_start(NOW + HOUR));
    }

    #[tokio::test]
    async fn scopes_and_prefixes_are_independent() {
        let (limiter, _) = limiter();
        let ingest = RateLimitPolicy::new("SHOT", 1, 3600);
        let connect = RateLimitPolicy::new("WSCONN", 1, 3600);
        assert!(matches!(limiter.check_at(&ingest, "a", NOW).await, Ok(d) if d.allowed));
        assert!(matches!(limiter.check_at(&ingest, "b", NOW).await, Ok(d) if d.allowed));
        assert!(matches!(limiter.check_at(&connect, "a", NOW).await, Ok(d) if d.allowed));
        assert!(matches!(limiter.check_at(&ingest, "a", NOW).await, Ok(d) if !d.allowed));
    }

    #[tokio::test]
    async fn concurrent_checks_count_every_request() {
        let (limiter, _) = limiter();
        let policy = RateLimitPolicy::new("SHOT", 25, 3600);
        let mut tasks = Vec::new();
        for _ in 0..40 {
            let limiter = limiter.clone();
            let policy = policy.clone();
            tasks.push(tokio::spawn(async move {
                limiter.check_at(&policy, "ip", NOW).await
            }));
        }
        let mut allowed = 0;
        for task in tasks {
            if let Ok(Ok(decision)) = task.await
                && decision.allowed
            {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 25);
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let store = Arc::new(FaultyStore::new());
        store.fail(Op::IncrementWindow);
        let limiter = RateLimiter::new(store);
        let policy = RateLimitPolicy::new("SHOT", 10, 3600);
        assert!(matches!(
            limiter.check_at(&policy, "ip", NOW).await,
            Err(GatewayError::StoreUnavailable(StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn failed_rollover_reset_fails_closed() {
        let store = Arc::new(FaultyStore::new());
        let limiter = RateLimiter::new(Arc::clone(&store) as Arc<dyn DurableStore>);
        let policy = RateLimitPolicy::new("SHOT", 10, 3600);
        let _ = limiter.check_at(&policy, "ip", NOW).await;
        store.fail(Op::ResetWindow);
        assert!(limiter.check_at(&policy, "ip", NOW + HOUR).await.is_err());
    }
}
