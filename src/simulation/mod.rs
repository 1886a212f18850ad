// Exit strategy simulation
// Replays a closed position against its price path under alternative exit policies

pub mod exits;
pub mod trailing_stop;

pub use exits::{best_early_exit, best_late_exit, volatility, ExitOpportunity, VolatilityMetric};
pub use trailing_stop::{simulate_trailing_stop, sweep, TrailingStopOutcome, TrailingStopSweep};

use serde::{Deserialize, Serialize};

use crate::indicators::{IndicatorEngine, IndicatorSnapshot};
use crate::models::{ClosedPosition, Granularity, PriceSeries};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    pub trailing_stop_pcts: Vec<f64>,
    pub volatility_threshold_pct: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            trailing_stop_pcts: vec![1.0, 2.0, 3.0, 4.0, 5.0],
            volatility_threshold_pct: 5.0,
        }
    }
}

/// Counterfactual exits and indicator context for one closed position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationResult {
    pub realized_pnl: f64,
    pub granularity: Granularity,
    pub source: String,
    /// The series fell short of the coverage threshold
    pub partial_data: bool,
    pub best_early_exit: Option<ExitOpportunity>,
    pub best_late_exit: Option<ExitOpportunity>,
    pub trailing_stop: Option<TrailingStopSweep>,
    pub volatility: Option<VolatilityMetric>,
    pub entry_indicators: Option<IndicatorSnapshot>,
    pub exit_indicators: Option<IndicatorSnapshot>,
}

impl SimulationResult {
    /// Largest positive improvement any simulated exit offered over the realized P&L
    pub fn missed_profit(&self) -> f64 {
        [
            self.best_early_exit.as_ref().map(|o| o.pnl_delta),
            self.best_late_exit.as_ref().map(|o| o.pnl_delta),
            self.trailing_stop.as_ref().map(|s| s.pnl_delta),
        ]
        .into_iter()
        .flatten()
        .fold(0.0, f64::max)
    }
}

/// Read-only replay of closed positions; identical inputs give identical results
#[derive(Debug, Clone, Default)]
pub struct ExitSimulator {
    config: SimulationConfig,
    indicators: IndicatorEngine,
}

impl ExitSimulator {
    pub fn new(config: SimulationConfig, indicators: IndicatorEngine) -> Self {
        Self { config, indicators }
    }

    pub fn simulate(&self, position: &ClosedPosition, series: &PriceSeries) -> SimulationResult {
        let bars = &series.bars;
        let points = self.indicators.compute(series);

        SimulationResult {
            realized_pnl: position.realized_pnl,
            granularity: series.request.granularity,
            source: series.source.clone(),
            partial_data: series.is_partial(),
            best_early_exit: best_early_exit(position, bars),
            best_late_exit: best_late_exit(position, bars),
            trailing_stop: sweep(position, bars, &self.config.trailing_stop_pcts),
            volatility: volatility(position, bars, self.config.volatility_threshold_pct),
            entry_indicators: self
                .indicators
                .snapshot_at(series, &points, position.entry_time),
            exit_indicators: self
                .indicators
                .snapshot_at(series, &points, position.exit_time),
        }
    }
}
