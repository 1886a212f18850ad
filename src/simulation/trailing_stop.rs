use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ClosedPosition, PositionSide, PriceBar};

/// Result of replaying the position under one trailing-stop percentage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrailingStopOutcome {
    pub trail_pct: f64,
    /// false when the stop never fired and the outcome exits at the last bar
    pub triggered: bool,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub pnl: f64,
}

/// Outcomes for every tested percentage plus the winner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrailingStopSweep {
    pub outcomes: Vec<TrailingStopOutcome>,
    pub best_pct: f64,
    pub best_pnl: f64,
    pub pnl_delta: f64,
}

/// Walk closes from entry onward, exiting on the first retrace of `trail_pct` from the
/// running extreme (highest close for longs, lowest for shorts)
pub fn simulate_trailing_stop(
    position: &ClosedPosition,
    bars: &[PriceBar],
    trail_pct: f64,
) -> Option<TrailingStopOutcome> {
    let mut extreme = position.entry_price;
    let mut last = None;

    for bar in bars.iter().filter(|b| b.timestamp >= position.entry_time) {
        last = Some(bar);

        let stopped = match position.side {
            PositionSide::Long => {
                extreme = extreme.max(bar.close);
                bar.close <= extreme * (1.0 - trail_pct / 100.0)
            }
            PositionSide::Short => {
                extreme = extreme.min(bar.close);
                bar.close >= extreme * (1.0 + trail_pct / 100.0)
            }
        };

        if stopped {
            return Some(TrailingStopOutcome {
                trail_pct,
                triggered: true,
                exit_time: bar.timestamp,
                exit_price: bar.close,
                pnl: position.pnl_at(bar.close),
            });
        }
    }

    last.map(|bar| TrailingStopOutcome {
        trail_pct,
        triggered: false,
        exit_time: bar.timestamp,
        exit_price: bar.close,
        pnl: position.pnl_at(bar.close),
    })
}

/// Replay every percentage; the best maximizes P&L, smallest percentage on ties
pub fn sweep(
    position: &ClosedPosition,
    bars: &[PriceBar],
    trail_pcts: &[f64],
) -> Option<TrailingStopSweep> {
    let mut pcts: Vec<f64> = trail_pcts
        .iter()
        .copied()
        .filter(|p| p.is_finite() && *p > 0.0 && *p < 100.0)
        .collect();
    pcts.sort_by(f64::total_cmp);
    pcts.dedup();

    let outcomes: Vec<TrailingStopOutcome> = pcts
        .iter()
        .filter_map(|&pct| simulate_trailing_stop(position, bars, pct))
        .collect();

    let mut best: Option<(f64, f64)> = None;
    for outcome in &outcomes {
        if best.map_or(true, |(_, pnl)| outcome.pnl > pnl) {
            best = Some((outcome.trail_pct, outcome.pnl));
        }
    }
    let (best_pct, best_pnl) = best?;

    Some(TrailingStopSweep {
        outcomes,
        best_pct,
        best_pnl,
        pnl_delta: best_pnl - position.realized_pnl,
    })
}
