// Price source orchestration
// Ranked fallback with rate limiting, circuit breaking, caching and request coalescing

pub mod cache;
pub mod coverage;
pub mod health;
pub mod rate_limit;

pub use coverage::CoverageConfig;
pub use health::{CircuitBreakerConfig, CircuitState, SourceHealth};
pub use rate_limit::RateLimitConfig;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

use crate::api::PriceSource;
use crate::error::{ConfigError, ResolveError, SourceAttempt, SourceError};
use crate::models::{Coverage, PriceRequest, PriceSeries};
use cache::{InFlight, Resolution, SeriesCache};
use health::HealthRecord;
use rate_limit::SourceLimiter;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub cache_ttl_secs: u64,
    pub attempt_timeout_ms: u64,
    pub max_in_flight: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 300,
            cache_ttl_secs: 3600,
            attempt_timeout_ms: 15_000,
            max_in_flight: 4,
        }
    }
}

impl OrchestratorConfig {
    fn breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.max(1),
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }
}

/// A source with its priority (lower rank is tried first) and request budget
pub struct RankedSource {
    pub source: Arc<dyn PriceSource>,
    pub rank: u32,
    pub rate_limit: RateLimitConfig,
}

impl RankedSource {
    pub fn new(source: Arc<dyn PriceSource>, rank: u32, rate_limit: RateLimitConfig) -> Self {
        Self {
            source,
            rank,
            rate_limit,
        }
    }
}

struct SourceSlot {
    source: Arc<dyn PriceSource>,
    rank: u32,
    limiter: SourceLimiter,
    health: Mutex<HealthRecord>,
}

/// An attempt that produced no acceptable series
struct Rejection {
    error: SourceError,
    /// Series that fell short of the coverage threshold, kept as a last resort
    partial: Option<(u64, PriceSeries)>,
}

/// Resolves price series from ranked sources with deterministic fallback.
///
/// All caches, counters and circuit state live in the instance; [`reset`](Self::reset)
/// returns it to a fresh state.
pub struct PriceSourceOrchestrator {
    sources: Vec<SourceSlot>,
    breaker: CircuitBreakerConfig,
    coverage: CoverageConfig,
    attempt_timeout: Duration,
    cache: SeriesCache,
    in_flight: InFlight,
    permits: Semaphore,
}

impl PriceSourceOrchestrator {
    pub fn new(
        config: &OrchestratorConfig,
        coverage: CoverageConfig,
        sources: Vec<RankedSource>,
    ) -> Result<Self, ConfigError> {
        let mut slots = sources
            .into_iter()
            .map(|ranked| {
                let limiter = SourceLimiter::new(ranked.source.name(), &ranked.rate_limit)?;
                Ok(SourceSlot {
                    source: ranked.source,
                    rank: ranked.rank,
                    limiter,
                    health: Mutex::new(HealthRecord::default()),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        // Stable sort keeps registration order for equal ranks
        slots.sort_by_key(|slot| slot.rank);

        if config.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.max_in_flight must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            sources: slots,
            breaker: config.breaker(),
            coverage,
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
            cache: SeriesCache::new(Duration::from_secs(config.cache_ttl_secs)),
            in_flight: InFlight::default(),
            permits: Semaphore::new(config.max_in_flight),
        })
    }

    /// Source names in the order they are tried
    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|slot| slot.source.name().to_string())
            .collect()
    }

    /// Resolve a price series for `request`.
    ///
    /// Serves from cache when possible, otherwise joins or starts the single in-flight
    /// resolution for the key.
    pub async fn resolve(&self, request: &PriceRequest) -> Resolution {
        if let Some(series) = self.cache.get(request).await {
            tracing::debug!("Cache hit for {}", request);
            return Ok(series);
        }

        let cell = self.in_flight.join(request).await;
        let result = cell
            .get_or_init(|| async {
                // Permit errors only happen on a closed semaphore, which is never closed
                let _permit = self.permits.acquire().await.ok();

                // A resolution that finished while we queued may have filled the cache
                if let Some(series) = self.cache.get(request).await {
                    return Ok(series);
                }

                let result = self.resolve_uncached(request).await;
                if let Ok(series) = &result {
                    if !series.is_partial() {
                        self.cache.insert(request.clone(), Arc::clone(series)).await;
                    }
                }
                result
            })
            .await
            .clone();

        self.in_flight.finish(request, &cell).await;
        result
    }

    async fn resolve_uncached(&self, request: &PriceRequest) -> Resolution {
        let as_of = Utc::now();
        let mut attempts = Vec::new();
        let mut best_partial: Option<(u64, PriceSeries)> = None;

        for slot in &self.sources {
            let name = slot.source.name();

            match self.attempt(slot, request, as_of).await {
                Ok(series) => {
                    tracing::info!(
                        "Resolved {} from {} ({} bars)",
                        request,
                        name,
                        series.bars.len()
                    );
                    return Ok(Arc::new(series));
                }
                Err(rejection) => {
                    if rejection.error.counts_as_failure() {
                        tracing::warn!("{} failed for {}: {}", name, request, rejection.error);
                    } else {
                        tracing::debug!("{} skipped for {}: {}", name, request, rejection.error);
                    }

                    if let Some((gap, series)) = rejection.partial {
                        // Earlier rank wins ties
                        if best_partial.as_ref().map_or(true, |(best, _)| gap < *best) {
                            best_partial = Some((gap, series));
                        }
                    }

                    attempts.push(SourceAttempt {
                        source: name.to_string(),
                        error: rejection.error,
                    });
                }
            }
        }

        if let Some((gap, series)) = best_partial {
            tracing::warn!(
                "Every source fell short for {}, using partial series from {} (gap of {} bars)",
                request,
                series.source,
                gap
            );
            return Ok(Arc::new(series));
        }

        tracing::warn!(
            "No data available for {} after {} attempt(s)",
            request,
            attempts.len()
        );
        Err(ResolveError::NoDataAvailable {
            symbol: request.symbol.clone(),
            attempts,
        })
    }

    async fn attempt(
        &self,
        slot: &SourceSlot,
        request: &PriceRequest,
        as_of: chrono::DateTime<Utc>,
    ) -> Result<PriceSeries, Rejection> {
        let skip = |error| Rejection {
            error,
            partial: None,
        };

        if let Err(remaining) = slot.health.lock().await.check(Instant::now()) {
            return Err(skip(SourceError::CircuitOpen(remaining)));
        }

        slot.limiter.acquire().await.map_err(skip)?;

        let outcome = self.fetch_series(slot, request, as_of).await;

        let mut health = slot.health.lock().await;
        match &outcome {
            Ok(_) => health.record_success(),
            Err(rejection) => {
                if health.record_failure(&rejection.error, &self.breaker, Instant::now()) {
                    tracing::warn!(
                        "Circuit opened for {} after {} consecutive failures, cooling down {:?}",
                        slot.source.name(),
                        health.consecutive_failures,
                        self.breaker.cooldown
                    );
                }
            }
        }
        outcome
    }

    /// Fetch, normalize and coverage-check one source's answer
    async fn fetch_series(
        &self,
        slot: &SourceSlot,
        request: &PriceRequest,
        as_of: chrono::DateTime<Utc>,
    ) -> Result<PriceSeries, Rejection> {
        let name = slot.source.name();
        let fail = |error| Rejection {
            error,
            partial: None,
        };

        let bars = tokio::time::timeout(self.attempt_timeout, slot.source.fetch(request))
            .await
            .map_err(|_| fail(SourceError::Timeout(self.attempt_timeout)))?
            .map_err(fail)?;

        let bars = coverage::normalize_bars(name, request, bars);
        if bars.is_empty() {
            return Err(fail(SourceError::EmptySeries));
        }

        let gap = coverage::largest_gap(&bars, request, as_of, &self.coverage);
        let allowed = self.coverage.max_missing_bars;

        if gap > allowed {
            let partial = PriceSeries {
                request: request.clone(),
                bars,
                source: name.to_string(),
                coverage: Coverage::Partial {
                    largest_gap_bars: gap,
                },
            };
            return Err(Rejection {
                error: SourceError::IncompleteCoverage {
                    missing_bars: gap,
                    allowed,
                },
                partial: Some((gap, partial)),
            });
        }

        Ok(PriceSeries {
            request: request.clone(),
            bars,
            source: name.to_string(),
            coverage: Coverage::Complete,
        })
    }

    /// Health of every source, in rank order
    pub async fn health_snapshot(&self) -> Vec<SourceHealth> {
        let now = Instant::now();
        let mut snapshot = Vec::with_capacity(self.sources.len());
        for slot in &self.sources {
            let health = slot.health.lock().await;
            snapshot.push(health.snapshot(slot.source.name(), slot.rank, now));
        }
        snapshot
    }

    /// Clear cache, in-flight registrations and health counters
    pub async fn reset(&self) {
        self.cache.clear().await;
        self.in_flight.clear().await;
        for slot in &self.sources {
            *slot.health.lock().await = HealthRecord::default();
        }
        tracing::info!("Orchestrator state reset");
    }
}
