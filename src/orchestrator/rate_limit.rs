use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::error::{ConfigError, SourceError};

// Type alias for the rate limiter to simplify signatures
type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Request budget for one source: `requests` per `per_secs` window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests: u32,
    pub per_secs: u64,
    /// How long a resolution may wait for budget before skipping the source
    pub max_wait_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 2,
            per_secs: 1,
            max_wait_ms: 2000,
        }
    }
}

/// Per-source token bucket
pub struct SourceLimiter {
    limiter: DirectRateLimiter,
    max_wait: Duration,
}

impl SourceLimiter {
    pub fn new(source_name: &str, config: &RateLimitConfig) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidRateLimit {
            source_name: source_name.to_string(),
            requests: config.requests,
            per_secs: config.per_secs,
        };

        let burst = NonZeroU32::new(config.requests).ok_or_else(invalid)?;
        if config.per_secs == 0 {
            return Err(invalid());
        }

        // One cell replenishes every window/requests, bursting up to the full window
        let replenish = Duration::from_secs(config.per_secs) / config.requests;
        let quota = Quota::with_period(replenish)
            .ok_or_else(invalid)?
            .allow_burst(burst);

        Ok(Self {
            limiter: RateLimiter::direct(quota),
            max_wait: Duration::from_millis(config.max_wait_ms),
        })
    }

    /// Take one request from the budget, waiting at most `max_wait`
    pub async fn acquire(&self) -> Result<(), SourceError> {
        if self.limiter.check().is_ok() {
            return Ok(());
        }
        if self.max_wait.is_zero() {
            return Err(SourceError::RateLimited(Duration::ZERO));
        }

        tokio::time::timeout(self.max_wait, self.limiter.until_ready())
            .await
            .map_err(|_| SourceError::RateLimited(self.max_wait))
    }
}
