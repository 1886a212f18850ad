use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde_json::{Map, Value};

use super::{build_http_client, get_with_retry, PriceSource, RetryPolicy};
use crate::error::SourceError;
use crate::models::{Granularity, PriceBar, PriceRequest};

const ALPHA_VANTAGE_API_BASE: &str = "https://www.alphavantage.co";

/// Alpha Vantage lists Indian equities under the BSE suffix
const DEFAULT_SUFFIX: &str = ".BSE";

/// Client for the Alpha Vantage time series API
///
/// **FREE TIER:** 25 requests/day, so this source belongs at the end of the ranking
/// with a tight rate limit.
#[derive(Clone)]
pub struct AlphaVantageSource {
    name: String,
    client: Client,
    api_key: String,
    base_url: String,
    suffix: String,
    retry: RetryPolicy,
}

impl AlphaVantageSource {
    pub fn new(
        name: impl Into<String>,
        api_key: String,
        request_timeout: std::time::Duration,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            name: name.into(),
            client: build_http_client(request_timeout)?,
            api_key,
            base_url: ALPHA_VANTAGE_API_BASE.to_string(),
            suffix: DEFAULT_SUFFIX.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// (function, interval parameter, response key) for a granularity
    fn endpoint(granularity: Granularity) -> (&'static str, Option<&'static str>, &'static str) {
        match granularity {
            Granularity::OneMinute => ("TIME_SERIES_INTRADAY", Some("1min"), "Time Series (1min)"),
            Granularity::FiveMinutes => ("TIME_SERIES_INTRADAY", Some("5min"), "Time Series (5min)"),
            Granularity::FifteenMinutes => {
                ("TIME_SERIES_INTRADAY", Some("15min"), "Time Series (15min)")
            }
            Granularity::OneHour => ("TIME_SERIES_INTRADAY", Some("60min"), "Time Series (60min)"),
            Granularity::OneDay => ("TIME_SERIES_DAILY", None, "Time Series (Daily)"),
        }
    }
}

/// Parse a time series payload into bars within the request range, oldest first
fn parse_time_series(
    body: &Value,
    series_key: &str,
    request: &PriceRequest,
) -> Result<Vec<PriceBar>, SourceError> {
    if let Some(message) = body.get("Error Message").and_then(Value::as_str) {
        return Err(SourceError::InvalidResponse(message.to_string()));
    }
    // Free-tier quota messages come back as 200 with a Note/Information field
    for key in ["Note", "Information"] {
        if let Some(message) = body.get(key).and_then(Value::as_str) {
            return Err(SourceError::ProviderThrottled(message.to_string()));
        }
    }

    let Some(series) = body.get(series_key).and_then(Value::as_object) else {
        return Ok(Vec::new());
    };

    let tz = series_time_zone(body)?;
    let mut bars = Vec::with_capacity(series.len());
    for (stamp, values) in series {
        let timestamp = parse_timestamp(stamp, tz)?;
        if timestamp < request.start || timestamp > request.end {
            continue;
        }

        let Some(values) = values.as_object() else {
            return Err(SourceError::InvalidResponse(format!(
                "bar {} is not an object",
                stamp
            )));
        };

        bars.push(PriceBar {
            timestamp,
            open: field(values, "1. open")?,
            high: field(values, "2. high")?,
            low: field(values, "3. low")?,
            close: field(values, "4. close")?,
            volume: field(values, "5. volume").unwrap_or(0.0),
        });
    }

    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

/// Zone named in the meta block ("6. Time Zone" intraday, "5. Time Zone" daily)
fn series_time_zone(body: &Value) -> Result<Tz, SourceError> {
    let name = body
        .get("Meta Data")
        .and_then(Value::as_object)
        .and_then(|meta| meta.iter().find(|(key, _)| key.ends_with("Time Zone")))
        .and_then(|(_, value)| value.as_str());

    match name {
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| SourceError::InvalidResponse(format!("unknown time zone {:?}", name))),
        None => Ok(Tz::UTC),
    }
}

/// Intraday keys are local exchange times in `tz`; daily keys are bare trading dates
fn parse_timestamp(stamp: &str, tz: Tz) -> Result<DateTime<Utc>, SourceError> {
    if let Ok(local) = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S") {
        return tz
            .from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| SourceError::InvalidResponse(format!("nonexistent local time {:?}", stamp)));
    }
    NaiveDate::parse_from_str(stamp, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .ok_or_else(|| SourceError::InvalidResponse(format!("bad timestamp {:?}", stamp)))
}

/// Numeric fields arrive as strings
fn field(values: &Map<String, Value>, key: &str) -> Result<f64, SourceError> {
    values
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| SourceError::InvalidResponse(format!("missing or invalid {:?}", key)))
}

#[async_trait]
impl PriceSource for AlphaVantageSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, request: &PriceRequest) -> Result<Vec<PriceBar>, SourceError> {
        let (function, interval, series_key) = Self::endpoint(request.granularity);
        let url = format!("{}/query", self.base_url);

        let mut query = vec![
            ("function", function.to_string()),
            ("symbol", format!("{}{}", request.symbol, self.suffix)),
            ("outputsize", "full".to_string()),
            ("datatype", "json".to_string()),
            ("apikey", self.api_key.clone()),
        ];
        if let Some(interval) = interval {
            query.push(("interval", interval.to_string()));
        }

        tracing::debug!("Fetching {} from {} ({})", series_key, self.name, request);

        let response = get_with_retry(&self.client, &self.name, &url, &query, &self.retry).await?;
        let body: Value = response.json().await?;

        let bars = parse_time_series(&body, series_key, request)?;
        if bars.is_empty() {
            return Err(SourceError::EmptySeries);
        }
        Ok(bars)
    }
}
