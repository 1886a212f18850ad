use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ClosedPosition, PositionSide, PriceBar};

/// Alternative exit at a single bar's extreme price
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExitOpportunity {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub pnl: f64,
    /// Difference to the realized P&L (positive means the alternative was better)
    pub pnl_delta: f64,
}

/// Price range over the holding period
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolatilityMetric {
    /// (max high - min low) as % of entry price
    pub range_pct: f64,
    pub high_volatility: bool,
}

/// Most favourable bar in `bars` for the position's side, earliest on ties
fn best_bar<'a>(
    position: &ClosedPosition,
    bars: impl Iterator<Item = &'a PriceBar>,
) -> Option<(DateTime<Utc>, f64)> {
    let mut best: Option<(DateTime<Utc>, f64)> = None;

    for bar in bars {
        let price = match position.side {
            PositionSide::Long => bar.high,
            PositionSide::Short => bar.low,
        };
        let better = match best {
            None => true,
            Some((_, current)) => match position.side {
                PositionSide::Long => price > current,
                PositionSide::Short => price < current,
            },
        };
        if better {
            best = Some((bar.timestamp, price));
        }
    }

    best
}

fn opportunity(position: &ClosedPosition, (timestamp, price): (DateTime<Utc>, f64)) -> ExitOpportunity {
    let pnl = position.pnl_at(price);
    ExitOpportunity {
        timestamp,
        price,
        pnl,
        pnl_delta: pnl - position.realized_pnl,
    }
}

/// Best exit strictly inside the holding period, only if it beats the realized P&L
pub fn best_early_exit(position: &ClosedPosition, bars: &[PriceBar]) -> Option<ExitOpportunity> {
    let inside = bars
        .iter()
        .filter(|b| b.timestamp > position.entry_time && b.timestamp < position.exit_time);

    best_bar(position, inside)
        .map(|best| opportunity(position, best))
        .filter(|o| o.pnl_delta > 0.0)
}

/// Best exit after the actual exit, reported even when holding longer would have lost
pub fn best_late_exit(position: &ClosedPosition, bars: &[PriceBar]) -> Option<ExitOpportunity> {
    let after = bars.iter().filter(|b| b.timestamp > position.exit_time);
    best_bar(position, after).map(|best| opportunity(position, best))
}

pub fn volatility(
    position: &ClosedPosition,
    bars: &[PriceBar],
    threshold_pct: f64,
) -> Option<VolatilityMetric> {
    let mut held = bars
        .iter()
        .filter(|b| b.timestamp >= position.entry_time && b.timestamp <= position.exit_time)
        .peekable();
    held.peek()?;

    let (high, low) = held.fold((f64::MIN, f64::MAX), |(high, low), bar| {
        (high.max(bar.high), low.min(bar.low))
    });
    let range_pct = (high - low) / position.entry_price * 100.0;

    Some(VolatilityMetric {
        range_pct,
        high_volatility: range_pct > threshold_pct,
    })
}
