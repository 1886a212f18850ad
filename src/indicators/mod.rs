// Technical indicators module
// RSI (Wilder), SMA and VWAP aligned to every bar of a price series

pub mod moving_average;
pub mod rsi;
pub mod vwap;

pub use moving_average::sma_series;
pub use rsi::rsi_series;
pub use vwap::{vwap_series, VwapAnchor};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::PriceSeries;

/// Indicator window sizes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    /// One SMA per period (short and long trend)
    pub sma_periods: Vec<usize>,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            sma_periods: vec![10, 20],
        }
    }
}

/// Indicator values at one bar; `None` means the window had not filled yet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorPoint {
    pub timestamp: DateTime<Utc>,
    pub rsi: Option<f64>,
    /// SMA by period, only for windows that have filled
    pub sma: BTreeMap<usize, f64>,
    pub vwap: Option<f64>,
}

/// Indicator context at a decision point (entry or exit)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorSnapshot {
    /// Timestamp of the bar the values were read from
    pub bar_time: DateTime<Utc>,
    pub close: f64,
    pub rsi: Option<f64>,
    pub sma: BTreeMap<usize, f64>,
    pub vwap: Option<f64>,
    /// Bar volume relative to the series mean volume
    pub volume_ratio: Option<f64>,
}

/// Pure indicator computations over a price series
#[derive(Debug, Clone, Default)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    /// Indicator values for every bar of `series`.
    ///
    /// VWAP resets each session for intraday series and runs from the first bar for daily ones.
    pub fn compute(&self, series: &PriceSeries) -> Vec<IndicatorPoint> {
        let closes = series.closes();
        let anchor = if series.request.granularity.is_intraday() {
            VwapAnchor::Session
        } else {
            VwapAnchor::Series
        };

        let rsi = rsi_series(&closes, self.config.rsi_period);
        let smas: Vec<(usize, Vec<Option<f64>>)> = self
            .config
            .sma_periods
            .iter()
            .map(|&period| (period, sma_series(&closes, period)))
            .collect();
        let vwap = vwap_series(&series.bars, anchor);

        series
            .bars
            .iter()
            .enumerate()
            .map(|(i, bar)| IndicatorPoint {
                timestamp: bar.timestamp,
                rsi: rsi[i],
                sma: smas
                    .iter()
                    .filter_map(|(period, values)| values[i].map(|v| (*period, v)))
                    .collect(),
                vwap: vwap[i],
            })
            .collect()
    }

    /// Snapshot at the last bar at or before `at`.
    ///
    /// `points` must come from [`IndicatorEngine::compute`] on the same series.
    pub fn snapshot_at(
        &self,
        series: &PriceSeries,
        points: &[IndicatorPoint],
        at: DateTime<Utc>,
    ) -> Option<IndicatorSnapshot> {
        let idx = series.bars.partition_point(|b| b.timestamp <= at);
        if idx == 0 {
            return None;
        }
        let bar = &series.bars[idx - 1];
        let point = points.get(idx - 1)?;

        let mean_volume =
            series.bars.iter().map(|b| b.volume).sum::<f64>() / series.bars.len() as f64;
        let volume_ratio = if mean_volume > 0.0 {
            Some(bar.volume / mean_volume)
        } else {
            None
        };

        Some(IndicatorSnapshot {
            bar_time: bar.timestamp,
            close: bar.close,
            rsi: point.rsi,
            sma: point.sma.clone(),
            vwap: point.vwap,
            volume_ratio,
        })
    }
}
