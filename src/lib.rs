// Core modules
pub mod analysis;
pub mod api;
pub mod config;
pub mod error;
pub mod indicators;
pub mod matching;
pub mod models;
pub mod orchestrator;
pub mod simulation;

// Re-export commonly used types
pub use analysis::{AnalysisReport, Analyzer, PositionOutcome};
pub use api::PriceSource;
pub use config::AppConfig;
pub use error::{ConfigError, MatchError, ResolveError, SourceError};
pub use matching::{MatchReport, TradeMatcher, TradeStats};
pub use models::*;
pub use orchestrator::{PriceSourceOrchestrator, RankedSource};
pub use simulation::{ExitSimulator, SimulationResult};
