// FIFO lot matching of brokerage fills into closed positions
pub mod stats;

pub use stats::TradeStats;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::error::MatchError;
use crate::models::{ClosedPosition, Execution, Lot, PositionSide, TradeSide};

/// Matching policy knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatcherConfig {
    /// When false, a sell with no open long lot is rejected instead of opening a short
    pub allow_short: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self { allow_short: true }
    }
}

/// An execution the matcher refused, with the reason
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RejectedExecution {
    pub execution: Execution,
    pub reason: MatchError,
}

/// Everything the matcher learned from one batch of executions
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MatchReport {
    pub closed: Vec<ClosedPosition>,
    pub open_lots: Vec<Lot>,
    pub rejected: Vec<RejectedExecution>,
}

impl MatchReport {
    /// Remaining open quantity for a symbol on one side
    pub fn open_quantity(&self, symbol: &str, side: PositionSide) -> u64 {
        self.open_lots
            .iter()
            .filter(|lot| lot.symbol == symbol && lot.side == side)
            .map(|lot| lot.remaining)
            .sum()
    }
}

/// Open lots of one symbol, oldest first.
///
/// Only one of the two queues is ever non-empty: an opposing fill drains the other
/// side before it opens anything on its own.
#[derive(Debug, Default)]
struct SymbolBook {
    long: VecDeque<Lot>,
    short: VecDeque<Lot>,
}

impl SymbolBook {
    fn queue_mut(&mut self, side: PositionSide) -> &mut VecDeque<Lot> {
        match side {
            PositionSide::Long => &mut self.long,
            PositionSide::Short => &mut self.short,
        }
    }
}

/// Converts executions into closed positions under first-in-first-out lot accounting
pub struct TradeMatcher {
    config: MatcherConfig,
}

impl TradeMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Match a batch of executions covering any number of symbols.
    ///
    /// Each symbol is matched independently, in (timestamp, execution id) order, so the
    /// result does not depend on how symbols are interleaved in the input.
    pub fn match_executions(&self, executions: &[Execution]) -> MatchReport {
        let mut by_symbol: BTreeMap<&str, Vec<&Execution>> = BTreeMap::new();
        let mut report = MatchReport::default();

        for execution in executions {
            if let Err(reason) = validate(execution) {
                tracing::warn!("Rejecting execution: {}", reason);
                report.rejected.push(RejectedExecution {
                    execution: execution.clone(),
                    reason,
                });
                continue;
            }
            by_symbol
                .entry(execution.symbol.as_str())
                .or_default()
                .push(execution);
        }

        for (symbol, mut fills) in by_symbol {
            fills.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

            let mut book = SymbolBook::default();
            for execution in fills {
                if let Err(reason) = self.apply(&mut book, execution, &mut report.closed) {
                    tracing::warn!("Rejecting execution: {}", reason);
                    report.rejected.push(RejectedExecution {
                        execution: execution.clone(),
                        reason,
                    });
                }
            }

            let residue: Vec<Lot> = book.long.into_iter().chain(book.short).collect();
            if !residue.is_empty() {
                tracing::debug!(
                    "{}: {} open lot(s) left unmatched ({} units)",
                    symbol,
                    residue.len(),
                    residue.iter().map(|l| l.remaining).sum::<u64>()
                );
            }
            report.open_lots.extend(residue);
        }

        // Stable: positions sharing an exit keep their FIFO emission order
        report
            .closed
            .sort_by(|a, b| a.exit_time.cmp(&b.exit_time).then_with(|| a.symbol.cmp(&b.symbol)));

        tracing::info!(
            "Matched {} closed position(s), {} open lot(s), {} rejected execution(s)",
            report.closed.len(),
            report.open_lots.len(),
            report.rejected.len()
        );

        report
    }

    /// Apply one fill to its symbol book, emitting a closed position per consumed lot
    fn apply(
        &self,
        book: &mut SymbolBook,
        execution: &Execution,
        closed: &mut Vec<ClosedPosition>,
    ) -> Result<(), MatchError> {
        // Side whose lots this fill would close
        let opposing = match execution.side {
            TradeSide::Buy => PositionSide::Short,
            TradeSide::Sell => PositionSide::Long,
        };
        let own = match execution.side {
            TradeSide::Buy => PositionSide::Long,
            TradeSide::Sell => PositionSide::Short,
        };

        // Quantity validated positive before we get here
        let mut remaining = execution.quantity as u64;
        let queue = book.queue_mut(opposing);

        // Refuse up front rather than half-apply the fill
        if own == PositionSide::Short && !self.config.allow_short {
            let available: u64 = queue.iter().map(|l| l.remaining).sum();
            if available < remaining {
                return Err(MatchError::ShortNotAllowed {
                    execution_id: execution.id.clone(),
                    symbol: execution.symbol.clone(),
                });
            }
        }

        while remaining > 0 {
            let Some(lot) = queue.front_mut() else {
                break;
            };

            let matched = remaining.min(lot.remaining);
            closed.push(close_lot(lot, matched, execution));

            lot.remaining -= matched;
            remaining -= matched;

            if lot.remaining == 0 {
                queue.pop_front();
            }
        }

        if remaining > 0 {
            book.queue_mut(own).push_back(Lot {
                symbol: execution.symbol.clone(),
                side: own,
                remaining,
                entry_price: execution.price,
                entry_time: execution.timestamp,
                execution_id: execution.id.clone(),
            });
        }

        Ok(())
    }
}

impl Default for TradeMatcher {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}

fn close_lot(lot: &Lot, quantity: u64, exit: &Execution) -> ClosedPosition {
    let realized_pnl = (exit.price - lot.entry_price) * quantity as f64 * lot.side.sign();

    ClosedPosition {
        symbol: lot.symbol.clone(),
        side: lot.side,
        quantity,
        entry_time: lot.entry_time,
        entry_price: lot.entry_price,
        exit_time: exit.timestamp,
        exit_price: exit.price,
        realized_pnl,
        holding_period_secs: (exit.timestamp - lot.entry_time).num_seconds(),
        entry_execution_id: lot.execution_id.clone(),
        exit_execution_id: exit.id.clone(),
    }
}

fn validate(execution: &Execution) -> Result<(), MatchError> {
    if execution.symbol.trim().is_empty() {
        return Err(MatchError::MissingSymbol {
            execution_id: execution.id.clone(),
        });
    }
    if execution.quantity <= 0 {
        return Err(MatchError::NonPositiveQuantity {
            execution_id: execution.id.clone(),
            quantity: execution.quantity,
        });
    }
    if !execution.price.is_finite() || execution.price <= 0.0 {
        return Err(MatchError::InvalidPrice {
            execution_id: execution.id.clone(),
            price: execution.price,
        });
    }
    Ok(())
}
