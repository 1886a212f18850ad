use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{build_http_client, get_with_retry, PriceSource, RetryPolicy};
use crate::error::SourceError;
use crate::models::{Granularity, PriceBar, PriceRequest};

const YAHOO_API_BASE: &str = "https://query1.finance.yahoo.com";

/// Exchange suffixes tried in order (NSE, then BSE, then the bare symbol)
const DEFAULT_SUFFIXES: &[&str] = &[".NS", ".BO", ""];

/// Client for the Yahoo Finance chart endpoint
///
/// Intraday history is limited by the provider, so long ranges at fine
/// granularities are refused up front instead of returning a silently short series.
#[derive(Clone)]
pub struct YahooChartSource {
    name: String,
    client: Client,
    base_url: String,
    suffixes: Vec<String>,
    retry: RetryPolicy,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
}

/// Columns may contain nulls for bars the provider could not fill
#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

// ============== Implementation ==============

impl YahooChartSource {
    pub fn new(
        name: impl Into<String>,
        request_timeout: std::time::Duration,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            name: name.into(),
            client: build_http_client(request_timeout)?,
            base_url: YAHOO_API_BASE.to_string(),
            suffixes: DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_suffixes(mut self, suffixes: Vec<String>) -> Self {
        if !suffixes.is_empty() {
            self.suffixes = suffixes;
        }
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Longest range the provider serves at a granularity
    fn max_range(granularity: Granularity) -> Duration {
        match granularity {
            Granularity::OneMinute => Duration::days(7),
            Granularity::FiveMinutes | Granularity::FifteenMinutes => Duration::days(60),
            Granularity::OneHour => Duration::days(730),
            Granularity::OneDay => Duration::days(365 * 50),
        }
    }

    /// Fetch one ticker spelling; `Ok(empty)` means "try the next suffix"
    async fn fetch_ticker(
        &self,
        ticker: &str,
        request: &PriceRequest,
    ) -> Result<Vec<PriceBar>, SourceError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, ticker);
        let query = [
            ("period1", request.start.timestamp().to_string()),
            ("period2", request.end.timestamp().to_string()),
            ("interval", request.granularity.as_interval().to_string()),
            ("includePrePost", "false".to_string()),
        ];

        tracing::debug!("Fetching {} chart from {} ({})", ticker, self.name, request);

        let response =
            match get_with_retry(&self.client, &self.name, &url, &query, &self.retry).await {
                Ok(response) => response,
                // Unknown ticker spelling
                Err(SourceError::Status { code: 404, .. }) => return Ok(Vec::new()),
                Err(e) => return Err(e),
            };

        let body: ChartResponse = response.json().await?;
        parse_chart(body)
    }
}

fn parse_chart(body: ChartResponse) -> Result<Vec<PriceBar>, SourceError> {
    if let Some(error) = body.chart.error {
        return Err(SourceError::InvalidResponse(format!(
            "{}: {}",
            error.code, error.description
        )));
    }

    let Some(result) = body.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let mut bars = Vec::with_capacity(result.timestamp.len());

    for (i, &ts) in result.timestamp.iter().enumerate() {
        // Skip rows the provider left unfilled
        let (Some(open), Some(high), Some(low), Some(close)) = (
            cell(&quote.open, i),
            cell(&quote.high, i),
            cell(&quote.low, i),
            cell(&quote.close, i),
        ) else {
            continue;
        };

        let Some(timestamp) = DateTime::<Utc>::from_timestamp(ts, 0) else {
            continue;
        };

        bars.push(PriceBar {
            timestamp,
            open,
            high,
            low,
            close,
            volume: cell(&quote.volume, i).unwrap_or(0.0),
        });
    }

    Ok(bars)
}

fn cell(column: &[Option<f64>], i: usize) -> Option<f64> {
    column.get(i).copied().flatten()
}

#[async_trait]
impl PriceSource for YahooChartSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, request: &PriceRequest) -> Result<Vec<PriceBar>, SourceError> {
        if request.end - request.start > Self::max_range(request.granularity) {
            return Err(SourceError::UnsupportedGranularity(format!(
                "{} over {} days",
                request.granularity,
                (request.end - request.start).num_days()
            )));
        }

        for suffix in &self.suffixes {
            let ticker = format!("{}{}", request.symbol, suffix);
            let bars = self.fetch_ticker(&ticker, request).await?;

            if !bars.is_empty() {
                tracing::debug!("{} returned {} bars for {}", self.name, bars.len(), ticker);
                return Ok(bars);
            }
        }

        Err(SourceError::EmptySeries)
    }
}
