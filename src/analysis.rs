use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::error::{MatchError, ResolveError};
use crate::matching::{MatchReport, RejectedExecution, TradeMatcher, TradeStats};
use crate::models::{ClosedPosition, Execution, Granularity, Lot, PriceRequest};
use crate::orchestrator::{PriceSourceOrchestrator, SourceHealth};
use crate::simulation::{ExitSimulator, SimulationResult};

/// How much price history around a position is fetched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    /// Bars before entry so indicators are warmed up at the entry bar
    pub warmup_bars: u32,
    /// How far past the exit late exits are searched
    pub late_exit_horizon_hours: i64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            warmup_bars: 30,
            late_exit_horizon_hours: 48,
        }
    }
}

/// Price request covering a position plus warmup and the late-exit horizon.
///
/// Edges snap to UTC midnight so positions on the same days share cache keys.
pub fn fetch_window(
    position: &ClosedPosition,
    config: &WindowConfig,
    now: DateTime<Utc>,
) -> PriceRequest {
    let granularity = Granularity::for_holding_period(position.holding_period());

    let warmup = (granularity.duration() * config.warmup_bars as i32).max(Duration::hours(1));
    let start = floor_to_day(position.entry_time - warmup);

    let horizon = position.exit_time + Duration::hours(config.late_exit_horizon_hours.max(0));
    let end = ceil_to_day(horizon).min(now).max(start);

    PriceRequest::new(position.symbol.clone(), start, end, granularity)
}

fn floor_to_day(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&at.date_naive().and_time(NaiveTime::MIN))
}

fn ceil_to_day(at: DateTime<Utc>) -> DateTime<Utc> {
    let floored = floor_to_day(at);
    if floored == at {
        at
    } else {
        floored + Duration::days(1)
    }
}

/// What happened to one closed position
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PositionOutcome {
    Simulated(SimulationResult),
    Skipped { reason: ResolveError },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PositionAnalysis {
    pub position: ClosedPosition,
    pub request: PriceRequest,
    pub outcome: PositionOutcome,
}

/// Largest single improvement found across the batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MissedOpportunity {
    pub symbol: String,
    pub exit_time: DateTime<Utc>,
    pub amount: f64,
}

/// Aggregate exit opportunities over every simulated position
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OpportunitySummary {
    pub positions_simulated: usize,
    pub positions_skipped: usize,
    pub partial_data: usize,

    pub early_exit_count: usize,
    pub early_exit_gain: f64,
    /// Only late exits that beat the realized P&L
    pub late_exit_count: usize,
    pub late_exit_gain: f64,
    pub trailing_stop_count: usize,
    pub trailing_stop_gain: f64,

    pub high_volatility_count: usize,
    pub worst_miss: Option<MissedOpportunity>,
}

impl OpportunitySummary {
    pub fn from_analyses(analyses: &[PositionAnalysis]) -> Self {
        let mut summary = Self::default();

        for analysis in analyses {
            let result = match &analysis.outcome {
                PositionOutcome::Simulated(result) => result,
                PositionOutcome::Skipped { .. } => {
                    summary.positions_skipped += 1;
                    continue;
                }
            };

            summary.positions_simulated += 1;
            if result.partial_data {
                summary.partial_data += 1;
            }

            if let Some(early) = &result.best_early_exit {
                summary.early_exit_count += 1;
                summary.early_exit_gain += early.pnl_delta;
            }
            if let Some(late) = result.best_late_exit.as_ref().filter(|o| o.pnl_delta > 0.0) {
                summary.late_exit_count += 1;
                summary.late_exit_gain += late.pnl_delta;
            }
            if let Some(trail) = result.trailing_stop.as_ref().filter(|s| s.pnl_delta > 0.0) {
                summary.trailing_stop_count += 1;
                summary.trailing_stop_gain += trail.pnl_delta;
            }
            if result.volatility.as_ref().is_some_and(|v| v.high_volatility) {
                summary.high_volatility_count += 1;
            }

            let missed = result.missed_profit();
            let worse = summary.worst_miss.as_ref().map_or(true, |w| missed > w.amount);
            if missed > 0.0 && worse {
                summary.worst_miss = Some(MissedOpportunity {
                    symbol: analysis.position.symbol.clone(),
                    exit_time: analysis.position.exit_time,
                    amount: missed,
                });
            }
        }

        summary
    }
}

/// Output of one analysis run
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub positions: Vec<PositionAnalysis>,
    pub open_lots: Vec<Lot>,
    pub rejected: Vec<RejectedExecution>,
    pub stats: TradeStats,
    pub opportunities: OpportunitySummary,
    pub source_health: Vec<SourceHealth>,
}

impl AnalysisReport {
    pub fn skipped(&self) -> impl Iterator<Item = (&ClosedPosition, &ResolveError)> {
        self.positions.iter().filter_map(|a| match &a.outcome {
            PositionOutcome::Skipped { reason } => Some((&a.position, reason)),
            PositionOutcome::Simulated(_) => None,
        })
    }

    pub fn rejection_reasons(&self) -> Vec<&MatchError> {
        self.rejected.iter().map(|r| &r.reason).collect()
    }
}

/// Batch pipeline: match, fetch, simulate, summarize
pub struct Analyzer {
    matcher: TradeMatcher,
    orchestrator: Arc<PriceSourceOrchestrator>,
    simulator: Arc<ExitSimulator>,
    window: WindowConfig,
}

impl Analyzer {
    pub fn new(
        matcher: TradeMatcher,
        orchestrator: Arc<PriceSourceOrchestrator>,
        simulator: ExitSimulator,
        window: WindowConfig,
    ) -> Self {
        Self {
            matcher,
            orchestrator,
            simulator: Arc::new(simulator),
            window,
        }
    }

    pub async fn analyze(&self, executions: &[Execution]) -> AnalysisReport {
        let now = Utc::now();
        let MatchReport {
            closed,
            open_lots,
            rejected,
        } = self.matcher.match_executions(executions);

        tracing::info!(
            "Matched {} executions into {} closed positions ({} open lots, {} rejected)",
            executions.len(),
            closed.len(),
            open_lots.len(),
            rejected.len()
        );

        let positions = self.simulate_all(&closed, now).await;
        let stats = TradeStats::from_positions(&closed);
        let opportunities = OpportunitySummary::from_analyses(&positions);

        tracing::info!(
            "Simulated {} positions, skipped {}",
            opportunities.positions_simulated,
            opportunities.positions_skipped
        );

        AnalysisReport {
            generated_at: now,
            positions,
            open_lots,
            rejected,
            stats,
            opportunities,
            source_health: self.orchestrator.health_snapshot().await,
        }
    }

    /// One task per position; results keep the matcher's order
    async fn simulate_all(
        &self,
        closed: &[ClosedPosition],
        now: DateTime<Utc>,
    ) -> Vec<PositionAnalysis> {
        let mut tasks = JoinSet::new();

        for (idx, position) in closed.iter().enumerate() {
            let request = fetch_window(position, &self.window, now);
            let position = position.clone();
            let orchestrator = Arc::clone(&self.orchestrator);
            let simulator = Arc::clone(&self.simulator);

            tasks.spawn(async move {
                let outcome = match orchestrator.resolve(&request).await {
                    Ok(series) => PositionOutcome::Simulated(simulator.simulate(&position, &series)),
                    Err(reason) => {
                        tracing::warn!(
                            "Skipping {} closed at {}: {}",
                            position.symbol,
                            position.exit_time,
                            reason
                        );
                        PositionOutcome::Skipped { reason }
                    }
                };
                (
                    idx,
                    PositionAnalysis {
                        position,
                        request,
                        outcome,
                    },
                )
            });
        }

        let mut slots: Vec<Option<PositionAnalysis>> = vec![None; closed.len()];
        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, analysis)) => slots[idx] = Some(analysis),
                Err(e) => {
                    tracing::error!("Position analysis task failed: {}", e);
                    failure = Some(e.to_string());
                }
            }
        }

        // Every closed position stays in the report, even if its task died
        slots
            .into_iter()
            .zip(closed)
            .map(|(slot, position)| {
                slot.unwrap_or_else(|| PositionAnalysis {
                    position: position.clone(),
                    request: fetch_window(position, &self.window, now),
                    outcome: PositionOutcome::Skipped {
                        reason: ResolveError::Aborted {
                            symbol: position.symbol.clone(),
                            message: failure.clone().unwrap_or_else(|| "task failed".to_string()),
                        },
                    },
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PriceSource;
    use crate::config::AppConfig;
    use crate::error::SourceError;
    use crate::models::{PositionSide, PriceBar, TradeSide};
    use crate::orchestrator::{CoverageConfig, OrchestratorConfig, RankedSource, RateLimitConfig};
    use async_trait::async_trait;

    /// Panics for one symbol, has nothing for the rest
    struct BrokenFeed;

    #[async_trait]
    impl PriceSource for BrokenFeed {
        fn name(&self) -> &str {
            "broken"
        }

        async fn fetch(&self, request: &PriceRequest) -> Result<Vec<PriceBar>, SourceError> {
            if request.symbol == "BOOM" {
                panic!("decoder blew up");
            }
            Err(SourceError::EmptySeries)
        }
    }

    fn fill(id: &str, symbol: &str, side: TradeSide, at: DateTime<Utc>) -> Execution {
        Execution {
            id: id.to_string(),
            symbol: symbol.to_string(),
            side,
            quantity: 5,
            price: 100.0,
            timestamp: at,
        }
    }

    fn position(entry: DateTime<Utc>, exit: DateTime<Utc>) -> ClosedPosition {
        ClosedPosition {
            symbol: "WIPRO".to_string(),
            side: PositionSide::Long,
            quantity: 10,
            entry_time: entry,
            entry_price: 450.0,
            exit_time: exit,
            exit_price: 455.0,
            realized_pnl: 50.0,
            holding_period_secs: (exit - entry).num_seconds(),
            entry_execution_id: "1".to_string(),
            exit_execution_id: "2".to_string(),
        }
    }

    fn far_future() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_intraday_window() {
        let entry = Utc.with_ymd_and_hms(2024, 3, 12, 4, 30, 0).unwrap();
        let exit = Utc.with_ymd_and_hms(2024, 3, 12, 8, 0, 0).unwrap();

        let request = fetch_window(&position(entry, exit), &WindowConfig::default(), far_future());

        assert_eq!(request.granularity, Granularity::FifteenMinutes);
        // 30 x 15m of warmup reaches back into the previous day
        assert_eq!(request.start, Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());
        // Exit + 48h, rounded up to midnight
        assert_eq!(request.end, Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_swing_window_uses_daily_bars() {
        let entry = Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap();
        let exit = Utc.with_ymd_and_hms(2024, 3, 20, 9, 0, 0).unwrap();

        let request = fetch_window(&position(entry, exit), &WindowConfig::default(), far_future());

        assert_eq!(request.granularity, Granularity::OneDay);
        assert_eq!(request.start, Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_window_end_capped_at_now() {
        let entry = Utc.with_ymd_and_hms(2024, 3, 12, 4, 30, 0).unwrap();
        let exit = Utc.with_ymd_and_hms(2024, 3, 12, 8, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 12, 10, 0, 0).unwrap();

        let request = fetch_window(&position(entry, exit), &WindowConfig::default(), now);
        assert_eq!(request.end, now);
    }

    #[test]
    fn test_ceil_keeps_midnight() {
        let midnight = Utc.with_ymd_and_hms(2024, 3, 12, 0, 0, 0).unwrap();
        assert_eq!(ceil_to_day(midnight), midnight);
        assert_eq!(
            ceil_to_day(midnight + Duration::seconds(1)),
            midnight + Duration::days(1)
        );
    }

    #[tokio::test]
    async fn test_panicked_task_is_reported_as_skipped() {
        let orchestrator = PriceSourceOrchestrator::new(
            &OrchestratorConfig::default(),
            CoverageConfig::default(),
            vec![RankedSource::new(Arc::new(BrokenFeed), 1, RateLimitConfig::default())],
        )
        .unwrap();
        let analyzer = AppConfig::default().build_analyzer(Arc::new(orchestrator));

        let at = |h: u32| Utc.with_ymd_and_hms(2024, 1, 3, h, 0, 0).unwrap();
        let executions = vec![
            fill("1", "BOOM", TradeSide::Buy, at(4)),
            fill("2", "BOOM", TradeSide::Sell, at(5)),
            fill("3", "ITC", TradeSide::Buy, at(6)),
            fill("4", "ITC", TradeSide::Sell, at(7)),
        ];

        let report = analyzer.analyze(&executions).await;

        assert_eq!(report.positions.len(), 2);
        let reasons: Vec<_> = report.skipped().map(|(p, r)| (p.symbol.clone(), r.clone())).collect();
        assert_eq!(reasons.len(), 2);
        assert!(matches!(
            &reasons[0],
            (symbol, ResolveError::Aborted { .. }) if symbol == "BOOM"
        ));
        assert!(matches!(
            &reasons[1],
            (symbol, ResolveError::NoDataAvailable { .. }) if symbol == "ITC"
        ));
        assert_eq!(report.opportunities.positions_skipped, 2);
    }
}
