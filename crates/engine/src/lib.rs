//! AlphaQuant engine: daily stock screening and ranking
//!
//! Provides:
//! - RSI / SMA / momentum indicators over daily closes
//! - Alpha Score rubric (0-100) with an optional fundamentals adjustment
//! - Ranking table and screening pipeline with per-symbol audit trail
//! - Yahoo Finance and index constituents clients
//! - Mean-reversion backtest producing an equity curve
//! - Gradient-boosted direction classifier (`ML_Confidence`, `Factor_Score`)

pub mod api;
pub mod backtest;
pub mod config;
pub mod error;
pub mod indicators;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod ranking;
pub mod retry;
pub mod scoring;
pub mod tickers;
pub mod types;

// Re-exports for convenience
pub use api::{ConstituentsClient, YahooClient};
pub use backtest::{curve_path, run_backtest, BacktestConfig, BacktestCurve};
pub use config::{
    FreshnessPolicy, IndicatorConfig, RetryPolicy, ScoringRubric, ScreenerConfig, StalePolicy,
};
pub use error::{EngineError, EngineResult, ProviderError, RetryError};
pub use indicators::{compute_indicators, indicator_series, IndicatorStream};
pub use model::{factor_score, signals_path, train_and_predict, ModelConfig, ModelReport};
pub use pipeline::{
    evaluate_symbol, fetch_histories, publish, rankings_path, run_screen, ScreenOutcome,
};
pub use provider::MarketDataProvider;
pub use ranking::{rank, RankingTable};
pub use scoring::{fundamentals_adjustment, score, score_with_fundamentals};
pub use tickers::{fallback_tickers, get_tickers, resolve_universe, TickerSource};
pub use types::*;
