pub mod alpha_vantage;
pub mod yahoo;

pub use alpha_vantage::AlphaVantageSource;
pub use yahoo::YahooChartSource;

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::SourceError;
use crate::models::{PriceBar, PriceRequest};

/// Uniform capability every historical price provider exposes.
///
/// Transport details stay behind this trait so the orchestrator can rank, swap and mock
/// sources without knowing what they talk to.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Stable name used in logs, health snapshots and error reports
    fn name(&self) -> &str;

    /// Fetch bars for the request's symbol, range and granularity
    async fn fetch(&self, request: &PriceRequest) -> Result<Vec<PriceBar>, SourceError>;
}

/// Retry policy shared by the HTTP sources
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<Client, SourceError> {
    Client::builder()
        .timeout(timeout)
        .user_agent("Mozilla/5.0 (compatible; tradelens/0.1)")
        .build()
        .map_err(|e| SourceError::Transport(format!("failed to build HTTP client: {}", e)))
}

/// GET with exponential backoff on 429, 5xx and network errors
pub(crate) async fn get_with_retry(
    client: &Client,
    source: &str,
    url: &str,
    query: &[(&str, String)],
    policy: &RetryPolicy,
) -> Result<reqwest::Response, SourceError> {
    let mut attempt = 0;

    loop {
        let can_retry = attempt < policy.max_retries;
        let backoff = policy.initial_backoff * 2u32.pow(attempt);

        match client.get(url).query(query).send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response);
                }

                // Handle rate limit and server errors
                if status.as_u16() == 429 || status.is_server_error() {
                    if can_retry {
                        tracing::warn!(
                            "{} returned {}, backing off for {:?} (attempt {}/{})",
                            source,
                            status,
                            backoff,
                            attempt + 1,
                            policy.max_retries + 1
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                        continue;
                    }
                    if status.as_u16() == 429 {
                        return Err(SourceError::ProviderThrottled(format!(
                            "{} returned 429 after {} attempt(s)",
                            source,
                            attempt + 1
                        )));
                    }
                }

                // Other errors (4xx) - don't retry
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(SourceError::Status {
                    code: status.as_u16(),
                    body: truncate(&body, 200),
                });
            }
            Err(e) if can_retry => {
                tracing::warn!(
                    "Network error from {}: {}, retrying in {:?} (attempt {}/{})",
                    source,
                    e,
                    backoff,
                    attempt + 1,
                    policy.max_retries + 1
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
