use serde::{Deserialize, Serialize};

use crate::models::ClosedPosition;

/// Summary statistics over a set of closed positions
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TradeStats {
    // Trade counts
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    // P&L
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    /// Gross wins / gross losses; None when nothing lost
    pub profit_factor: Option<f64>,

    // Holding period and size
    pub avg_holding_hours: f64,
    pub total_entry_value: f64,
}

impl TradeStats {
    /// Calculate stats from matched positions (break-even trades count as losses)
    pub fn from_positions(positions: &[ClosedPosition]) -> Self {
        let total_trades = positions.len();
        if total_trades == 0 {
            return Self::default();
        }

        let total_pnl: f64 = positions.iter().map(|p| p.realized_pnl).sum();

        let wins: Vec<f64> = positions
            .iter()
            .filter(|p| p.is_win())
            .map(|p| p.realized_pnl)
            .collect();
        let losses: Vec<f64> = positions
            .iter()
            .filter(|p| !p.is_win())
            .map(|p| p.realized_pnl)
            .collect();

        let gross_wins: f64 = wins.iter().sum();
        let gross_losses: f64 = losses.iter().map(|l| l.abs()).sum();

        let largest_win = wins.iter().copied().fold(0.0, f64::max);
        let largest_loss = losses.iter().copied().fold(0.0, f64::min);

        let profit_factor = if gross_losses > 0.0 {
            Some(gross_wins / gross_losses)
        } else {
            None
        };

        let total_holding_secs: i64 = positions.iter().map(|p| p.holding_period_secs).sum();
        let avg_holding_hours = total_holding_secs as f64 / total_trades as f64 / 3600.0;

        let total_entry_value = positions
            .iter()
            .map(|p| p.entry_price * p.quantity as f64)
            .sum();

        Self {
            total_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: (wins.len() as f64 / total_trades as f64) * 100.0,
            total_pnl,
            avg_pnl: total_pnl / total_trades as f64,
            largest_win,
            largest_loss,
            profit_factor,
            avg_holding_hours,
            total_entry_value,
        }
    }
}
