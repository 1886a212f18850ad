use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Why a single source attempt did not produce a usable series.
///
/// These never escape a resolution on their own; the orchestrator falls back to the
/// next source and only reports them inside [`ResolveError::NoDataAvailable`].
#[derive(Debug, Clone, Error, Serialize, PartialEq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("local rate limit budget exhausted (waited {0:?})")]
    RateLimited(Duration),

    #[error("provider throttled the request: {0}")]
    ProviderThrottled(String),

    #[error("circuit open, cooling down for another {0:?}")]
    CircuitOpen(Duration),

    #[error("source returned no bars")]
    EmptySeries,

    #[error("incomplete coverage: gap of {missing_bars} bars (allowed {allowed})")]
    IncompleteCoverage { missing_bars: u64, allowed: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("granularity {0} not supported by this source")]
    UnsupportedGranularity(String),
}

impl SourceError {
    /// Skips caused by our own throttling or circuit state are not held against the source
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, SourceError::RateLimited(_) | SourceError::CircuitOpen(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Transport(format!("request timed out: {}", e))
        } else if e.is_decode() {
            SourceError::InvalidResponse(e.to_string())
        } else {
            SourceError::Transport(e.to_string())
        }
    }
}

/// One source's contribution to a failed resolution
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceAttempt {
    pub source: String,
    pub error: SourceError,
}

/// Every ranked source was exhausted for a request
#[derive(Debug, Clone, Error, Serialize, PartialEq)]
pub enum ResolveError {
    #[error("no data available for {symbol}: {} source(s) exhausted", .attempts.len())]
    NoDataAvailable {
        symbol: String,
        attempts: Vec<SourceAttempt>,
    },

    /// The analysis task for a position died before producing an outcome
    #[error("analysis of {symbol} aborted: {message}")]
    Aborted { symbol: String, message: String },
}

impl ResolveError {
    pub fn attempts(&self) -> &[SourceAttempt] {
        match self {
            ResolveError::NoDataAvailable { attempts, .. } => attempts,
            ResolveError::Aborted { .. } => &[],
        }
    }

    pub fn last_error(&self) -> Option<&SourceError> {
        self.attempts().last().map(|a| &a.error)
    }

    pub fn exhausted_sources(&self) -> Vec<&str> {
        self.attempts().iter().map(|a| a.source.as_str()).collect()
    }
}

/// Malformed execution rejected by the matcher
#[derive(Debug, Clone, Error, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchError {
    #[error("execution {execution_id}: non-positive quantity {quantity}")]
    NonPositiveQuantity { execution_id: String, quantity: i64 },

    #[error("execution {execution_id}: invalid price {price}")]
    InvalidPrice { execution_id: String, price: f64 },

    #[error("execution {execution_id}: missing symbol")]
    MissingSymbol { execution_id: String },

    #[error("execution {execution_id}: sell of {symbol} without an open long position (shorting disabled)")]
    ShortNotAllowed {
        execution_id: String,
        symbol: String,
    },
}

/// Invalid configuration detected while building the analyzer
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] ::config::ConfigError),

    #[error("source {source_name}: invalid rate limit ({requests} requests per {per_secs}s)")]
    InvalidRateLimit {
        source_name: String,
        requests: u32,
        per_secs: u64,
    },

    #[error("{0}")]
    Invalid(String),
}
