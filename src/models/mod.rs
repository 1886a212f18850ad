use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Side of a single brokerage fill
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Direction of a position (buy-then-sell is long, sell-then-buy is short)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// +1 for long, -1 for short
    pub fn sign(self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }
}

/// One recorded buy or sell fill, as delivered by the statement parser
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: i64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Open, partially consumable slice of a position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lot {
    pub symbol: String,
    pub side: PositionSide,
    pub remaining: u64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub execution_id: String,
}

/// Fully matched entry/exit pair with realized P&L
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClosedPosition {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: u64,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub realized_pnl: f64,
    pub holding_period_secs: i64,
    pub entry_execution_id: String,
    pub exit_execution_id: String,
}

impl ClosedPosition {
    pub fn holding_period(&self) -> Duration {
        Duration::seconds(self.holding_period_secs)
    }

    /// Realized P&L as a percentage of the entry value
    pub fn pnl_pct(&self) -> f64 {
        ((self.exit_price - self.entry_price) / self.entry_price) * 100.0 * self.side.sign()
    }

    pub fn is_win(&self) -> bool {
        self.realized_pnl > 0.0
    }

    /// P&L this position would have realized had it exited at `price`
    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity as f64 * self.side.sign()
    }
}

/// Bar interval of a price series
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Granularity {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
}

impl Granularity {
    pub fn duration(self) -> Duration {
        Duration::minutes(self.minutes())
    }

    pub fn minutes(self) -> i64 {
        match self {
            Granularity::OneMinute => 1,
            Granularity::FiveMinutes => 5,
            Granularity::FifteenMinutes => 15,
            Granularity::OneHour => 60,
            Granularity::OneDay => 1440,
        }
    }

    pub fn is_intraday(self) -> bool {
        self != Granularity::OneDay
    }

    /// Interval string used by chart-style HTTP APIs
    pub fn as_interval(self) -> &'static str {
        match self {
            Granularity::OneMinute => "1m",
            Granularity::FiveMinutes => "5m",
            Granularity::FifteenMinutes => "15m",
            Granularity::OneHour => "1h",
            Granularity::OneDay => "1d",
        }
    }

    /// Pick bar size from how long the position was held:
    /// - under a day: 15-minute bars
    /// - under a week: hourly bars
    /// - otherwise: daily bars
    pub fn for_holding_period(holding: Duration) -> Self {
        if holding < Duration::days(1) {
            Granularity::FifteenMinutes
        } else if holding < Duration::days(7) {
            Granularity::OneHour
        } else {
            Granularity::OneDay
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_interval())
    }
}

/// OHLCV data for one interval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    /// high >= max(open, close) >= min(open, close) >= low >= 0, volume >= 0
    pub fn is_valid(&self) -> bool {
        let values = [self.open, self.high, self.low, self.close, self.volume];
        if values.iter().any(|v| !v.is_finite()) {
            return false;
        }
        self.high >= self.open.max(self.close)
            && self.open.min(self.close) >= self.low
            && self.low >= 0.0
            && self.volume >= 0.0
    }
}

/// Key of a price resolution: symbol, range and bar size
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PriceRequest {
    pub symbol: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub granularity: Granularity,
}

impl PriceRequest {
    pub fn new(
        symbol: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Granularity,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            start,
            end,
            granularity,
        }
    }
}

impl std::fmt::Display for PriceRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{} .. {}] @{}",
            self.symbol,
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M"),
            self.granularity
        )
    }
}

/// Whether a series satisfied the completeness threshold
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Coverage {
    Complete,
    Partial { largest_gap_bars: u64 },
}

/// Ordered bars covering a request, tagged with the source that produced them
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSeries {
    pub request: PriceRequest,
    pub bars: Vec<PriceBar>,
    pub source: String,
    pub coverage: Coverage,
}

impl PriceSeries {
    pub fn is_partial(&self) -> bool {
        matches!(self.coverage, Coverage::Partial { .. })
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }
}
