use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::SourceError;

/// Circuit breaker thresholds shared by every source
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,               // 3 failures in a row
            cooldown: Duration::from_secs(300), // 5 minutes off the rotation
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CircuitState {
    Available,
    CoolingDown { remaining_secs: u64 },
}

/// Serializable view of one source's health
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceHealth {
    pub name: String,
    pub rank: u32,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub circuit: CircuitState,
}

/// Mutable health counters for a source
#[derive(Debug, Clone, Default)]
pub struct HealthRecord {
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    open_until: Option<Instant>,
}

impl HealthRecord {
    /// `Err(remaining)` while the circuit is cooling down
    pub fn check(&self, now: Instant) -> Result<(), Duration> {
        match self.open_until {
            Some(until) if until > now => Err(until - now),
            _ => Ok(()),
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.total_successes += 1;
        self.last_success = Some(Utc::now());
        self.open_until = None;
    }

    /// Returns true when this failure opened the circuit
    pub fn record_failure(
        &mut self,
        error: &SourceError,
        config: &CircuitBreakerConfig,
        now: Instant,
    ) -> bool {
        self.consecutive_failures += 1;
        self.total_failures += 1;
        self.last_error = Some(error.to_string());

        if self.consecutive_failures >= config.failure_threshold {
            self.open_until = Some(now + config.cooldown);
            return true;
        }
        false
    }

    pub fn snapshot(&self, name: &str, rank: u32, now: Instant) -> SourceHealth {
        let circuit = match self.check(now) {
            Ok(()) => CircuitState::Available,
            Err(remaining) => CircuitState::CoolingDown {
                remaining_secs: remaining.as_secs_f64().ceil() as u64,
            },
        };

        SourceHealth {
            name: name.to_string(),
            rank,
            consecutive_failures: self.consecutive_failures,
            total_successes: self.total_successes,
            total_failures: self.total_failures,
            last_success: self.last_success,
            last_error: self.last_error.clone(),
            circuit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_opens_after_threshold() {
        let mut record = HealthRecord::default();
        let now = Instant::now();

        assert!(!record.record_failure(&SourceError::EmptySeries, &breaker(), now));
        assert!(!record.record_failure(&SourceError::EmptySeries, &breaker(), now));
        assert!(record.check(now).is_ok());

        assert!(record.record_failure(&SourceError::EmptySeries, &breaker(), now));
        assert_eq!(record.check(now), Err(Duration::from_secs(60)));
        assert!(record.check(now + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn test_success_resets() {
        let mut record = HealthRecord::default();
        let now = Instant::now();
        for _ in 0..3 {
            record.record_failure(&SourceError::EmptySeries, &breaker(), now);
        }

        record.record_success();

        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.total_failures, 3);
        assert_eq!(record.total_successes, 1);
        assert!(record.check(now).is_ok());
        assert!(record.last_success.is_some());
    }

    #[test]
    fn test_snapshot_reports_cooldown() {
        let mut record = HealthRecord::default();
        let now = Instant::now();
        for _ in 0..3 {
            record.record_failure(
                &SourceError::Status {
                    code: 503,
                    body: "down".to_string(),
                },
                &breaker(),
                now,
            );
        }

        let snapshot = record.snapshot("yahoo", 1, now + Duration::from_millis(30_500));

        assert_eq!(snapshot.consecutive_failures, 3);
        assert_eq!(snapshot.last_error.as_deref(), Some("HTTP 503: down"));
        assert_eq!(
            snapshot.circuit,
            CircuitState::CoolingDown { remaining_secs: 30 }
        );
    }
}
