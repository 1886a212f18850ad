use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::analysis::{Analyzer, WindowConfig};
use crate::api::{AlphaVantageSource, PriceSource, RetryPolicy, YahooChartSource};
use crate::error::ConfigError;
use crate::indicators::{IndicatorConfig, IndicatorEngine};
use crate::matching::{MatcherConfig, TradeMatcher};
use crate::orchestrator::{
    CoverageConfig, OrchestratorConfig, PriceSourceOrchestrator, RankedSource, RateLimitConfig,
};
use crate::simulation::{ExitSimulator, SimulationConfig};

const ENV_PREFIX: &str = "TRADELENS";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Yahoo,
    AlphaVantage,
}

/// One entry of the ranked source list; list position is the rank
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub kind: SourceKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key (Alpha Vantage)
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub symbol_suffixes: Option<Vec<String>>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_max_retries() -> u32 {
    2
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl SourceConfig {
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| match self.kind {
            SourceKind::Yahoo => "yahoo".to_string(),
            SourceKind::AlphaVantage => "alpha_vantage".to_string(),
        })
    }

    fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            kind: SourceKind::Yahoo,
            name: None,
            base_url: None,
            api_key_env: None,
            symbol_suffixes: None,
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout_secs(),
            rate_limit: RateLimitConfig {
                requests: 2,
                per_secs: 1,
                max_wait_ms: 2000,
            },
        },
        SourceConfig {
            kind: SourceKind::AlphaVantage,
            name: None,
            base_url: None,
            api_key_env: Some("ALPHA_VANTAGE_API_KEY".to_string()),
            symbol_suffixes: None,
            max_retries: 1,
            request_timeout_secs: default_request_timeout_secs(),
            // Free tier: 5 requests per minute
            rate_limit: RateLimitConfig {
                requests: 5,
                per_secs: 60,
                max_wait_ms: 0,
            },
        },
    ]
}

/// Application settings, every field defaulted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub matcher: MatcherConfig,
    pub orchestrator: OrchestratorConfig,
    pub coverage: CoverageConfig,
    pub window: WindowConfig,
    pub indicators: IndicatorConfig,
    pub simulation: SimulationConfig,
    pub sources: Vec<SourceConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            matcher: MatcherConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            coverage: CoverageConfig::default(),
            window: WindowConfig::default(),
            indicators: IndicatorConfig::default(),
            simulation: SimulationConfig::default(),
            sources: default_sources(),
        }
    }
}

impl AppConfig {
    /// Load settings in layers:
    /// 1. Built-in defaults
    /// 2. Optional TOML file
    /// 3. Environment variables (e.g. `TRADELENS__ORCHESTRATOR__MAX_IN_FLIGHT=8`)
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.attempt_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.attempt_timeout_ms must be positive".to_string(),
            ));
        }
        if self.coverage.session_minutes == 0 {
            return Err(ConfigError::Invalid(
                "coverage.session_minutes must be positive".to_string(),
            ));
        }
        for source in &self.sources {
            if source.rate_limit.requests == 0 || source.rate_limit.per_secs == 0 {
                return Err(ConfigError::InvalidRateLimit {
                    source_name: source.display_name(),
                    requests: source.rate_limit.requests,
                    per_secs: source.rate_limit.per_secs,
                });
            }
        }
        Ok(())
    }

    /// Instantiate the configured sources in rank order.
    ///
    /// Sources missing their credentials are left out rather than failing later.
    pub fn build_sources(&self) -> Result<Vec<RankedSource>, ConfigError> {
        let mut ranked = Vec::with_capacity(self.sources.len());

        for (idx, source) in self.sources.iter().enumerate() {
            let name = source.display_name();
            let timeout = Duration::from_secs(source.request_timeout_secs);
            let client_error = |e: crate::error::SourceError| {
                ConfigError::Invalid(format!("source {}: {}", name, e))
            };

            let built: Arc<dyn PriceSource> = match source.kind {
                SourceKind::Yahoo => {
                    let mut yahoo = YahooChartSource::new(name.clone(), timeout)
                        .map_err(client_error)?
                        .with_retry(source.retry());
                    if let Some(base_url) = &source.base_url {
                        yahoo = yahoo.with_base_url(base_url.clone());
                    }
                    if let Some(suffixes) = &source.symbol_suffixes {
                        yahoo = yahoo.with_suffixes(suffixes.clone());
                    }
                    Arc::new(yahoo)
                }
                SourceKind::AlphaVantage => {
                    let key_var = source
                        .api_key_env
                        .as_deref()
                        .unwrap_or("ALPHA_VANTAGE_API_KEY");
                    let api_key = match std::env::var(key_var) {
                        Ok(key) if !key.trim().is_empty() => key,
                        _ => {
                            tracing::info!("{} not set, {} source disabled", key_var, name);
                            continue;
                        }
                    };

                    let mut alpha = AlphaVantageSource::new(name.clone(), api_key, timeout)
                        .map_err(client_error)?
                        .with_retry(source.retry());
                    if let Some(base_url) = &source.base_url {
                        alpha = alpha.with_base_url(base_url.clone());
                    }
                    if let Some(suffix) = source.symbol_suffixes.as_ref().and_then(|s| s.first()) {
                        alpha = alpha.with_suffix(suffix.clone());
                    }
                    Arc::new(alpha)
                }
            };

            ranked.push(RankedSource::new(
                built,
                idx as u32 + 1,
                source.rate_limit.clone(),
            ));
        }

        Ok(ranked)
    }

    pub fn build_orchestrator(&self) -> Result<PriceSourceOrchestrator, ConfigError> {
        PriceSourceOrchestrator::new(
            &self.orchestrator,
            self.coverage.clone(),
            self.build_sources()?,
        )
    }

    /// Wire the full pipeline around an orchestrator
    pub fn build_analyzer(&self, orchestrator: Arc<PriceSourceOrchestrator>) -> Analyzer {
        Analyzer::new(
            TradeMatcher::new(self.matcher.clone()),
            orchestrator,
            ExitSimulator::new(
                self.simulation.clone(),
                IndicatorEngine::new(self.indicators.clone()),
            ),
            self.window.clone(),
        )
    }
}
