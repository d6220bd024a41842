//! Per-host rate limiting shared by every in-flight resolution.
//!
//! Each host gets a semaphore bounding concurrent calls (the quota ceiling)
//! and a "blocked until" instant. A rate-limit response for one package
//! pushes the instant forward, and every other package waiting on the same
//! host honours it before its next call.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

/// Concurrent calls per host with a credential.
pub const AUTHENTICATED_PERMITS: usize = 8;
/// Concurrent calls per host without a credential.
pub const ANONYMOUS_PERMITS: usize = 2;
/// Longest block a server-provided delay can impose on a host.
pub const MAX_BLOCK: Duration = Duration::from_secs(60 * 60);

/// Exponential backoff with jitter and a fixed attempt bound.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter: bool,
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Longest a caller will wait for a blocked host before giving up.
    pub max_wait: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            max_attempts: 3,
            max_wait: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based), capped at `max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 0.0 {
            self.multiplier
        } else {
            1.0
        };
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let max_secs = self.max.as_secs_f64();

        let base = self.initial.as_secs_f64() * multiplier.powi(exponent);
        let clamped = if base.is_finite() {
            base.clamp(0.0, max_secs)
        } else {
            max_secs
        };
        let delay = Duration::from_secs_f64(clamped);

        let delay = if self.jitter {
            let factor = rand::rng().random_range(0.0..=0.25);
            delay + delay.mul_f64(factor)
        } else {
            delay
        };
        delay.min(self.max)
    }
}

struct HostGate {
    permits: Arc<Semaphore>,
    blocked_until: Mutex<Option<Instant>>,
}

impl HostGate {
    fn remaining_block(&self) -> Option<Duration> {
        let blocked = self
            .blocked_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        blocked
            .map(|until| until.saturating_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    fn extend_block(&self, until: Instant) {
        let mut blocked = self
            .blocked_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if blocked.map_or(true, |current| current < until) {
            *blocked = Some(until);
        }
    }
}

/// Shared limiter handle; clone the `Arc` into every task.
pub struct RateLimiter {
    hosts: DashMap<String, Arc<HostGate>>,
    permits_per_host: usize,
    policy: BackoffPolicy,
}

impl RateLimiter {
    pub fn new(policy: BackoffPolicy, permits_per_host: usize) -> Self {
        Self {
            hosts: DashMap::new(),
            permits_per_host: permits_per_host.max(1),
            policy,
        }
    }

    /// Limiter sized for the quota ceiling of the given credential mode.
    pub fn for_credentials(authenticated: bool, policy: BackoffPolicy) -> Self {
        let permits = if authenticated {
            AUTHENTICATED_PERMITS
        } else {
            ANONYMOUS_PERMITS
        };
        Self::new(policy, permits)
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    fn gate(&self, host: &str) -> Arc<HostGate> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(HostGate {
                    permits: Arc::new(Semaphore::new(self.permits_per_host)),
                    blocked_until: Mutex::new(None),
                })
            })
            .clone()
    }

    /// Wait for a call slot on `host`.
    ///
    /// Returns `None` without waiting when the host is blocked for longer
    /// than the policy's `max_wait`.
    pub async fn acquire(&self, host: &str) -> Option<OwnedSemaphorePermit> {
        let gate = self.gate(host);
        loop {
            if let Some(wait) = gate.remaining_block() {
                if wait > self.policy.max_wait {
                    debug!(host, ?wait, "host blocked beyond max wait");
                    return None;
                }
                tokio::time::sleep(wait).await;
                continue;
            }

            let permit = Arc::clone(&gate.permits).acquire_owned().await.ok()?;
            // Another caller may have hit the limit while we queued.
            if gate.remaining_block().is_none() {
                return Some(permit);
            }
        }
    }

    /// Record a rate-limit response and block the host for the returned delay.
    ///
    /// A server-provided `retry_after` takes precedence over the backoff curve
    /// and is capped at [`MAX_BLOCK`].
    pub fn record_rate_limited(
        &self,
        host: &str,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> Duration {
        let delay = retry_after.map_or_else(|| self.policy.backoff(attempt), |d| d.min(MAX_BLOCK));
        self.gate(host).extend_block(Instant::now() + delay);
        debug!(host, attempt, ?delay, "host rate limited");
        delay
    }

    /// Remaining block on `host`, if any.
    #[cfg(test)]
    pub fn blocked_for(&self, host: &str) -> Option<Duration> {
        self.hosts.get(host).and_then(|g| g.remaining_block())
    }
}
