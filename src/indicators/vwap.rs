use serde::{Deserialize, Serialize};

use crate::models::PriceBar;

/// Where cumulative VWAP sums start from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VwapAnchor {
    /// Accumulate from the first bar of the series
    Series,
    /// Reset at the first bar of each UTC calendar date
    Session,
}

/// Volume-weighted average price at every bar: cumulative (close * volume) / cumulative volume
///
/// `None` while no volume has traded since the anchor.
pub fn vwap_series(bars: &[PriceBar], anchor: VwapAnchor) -> Vec<Option<f64>> {
    let mut values = Vec::with_capacity(bars.len());
    let mut turnover = 0.0;
    let mut volume = 0.0;
    let mut session = None;

    for bar in bars {
        if anchor == VwapAnchor::Session {
            let day = bar.timestamp.date_naive();
            if session != Some(day) {
                session = Some(day);
                turnover = 0.0;
                volume = 0.0;
            }
        }

        turnover += bar.close * bar.volume;
        volume += bar.volume;

        values.push(if volume > 0.0 {
            Some(turnover / volume)
        } else {
            None
        });
    }

    values
}
