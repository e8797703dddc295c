//! Screener configuration
//!
//! Passed explicitly into the pipeline entry points; nothing here is global.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::EngineError;
use crate::types::Market;

/// Indicator periods
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// RSI period (default: 14)
    pub rsi_period: usize,
    /// Short SMA period (default: 50)
    pub short_sma: usize,
    /// Long SMA period (default: 200)
    pub long_sma: usize,
    /// Momentum lookback in trading days (default: 21, about one month)
    pub momentum_window: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            short_sma: 50,
            long_sma: 200,
            momentum_window: 21,
        }
    }
}

impl IndicatorConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.rsi_period == 0
            || self.short_sma == 0
            || self.long_sma == 0
            || self.momentum_window == 0
        {
            return Err(EngineError::InvalidConfig(
                "indicator periods must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Observations needed before every indicator is defined
    pub fn required_history(&self) -> usize {
        (self.rsi_period + 1)
            .max(self.short_sma)
            .max(self.long_sma)
            .max(self.momentum_window + 1)
    }
}

/// Point values of the Alpha Score rubric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringRubric {
    pub base: i32,
    /// Price above SMA 50
    pub above_short_sma: i32,
    /// SMA 50 above SMA 200
    pub golden_trend: i32,
    /// 30 < RSI < 50
    pub recovering: i32,
    /// RSI < 30
    pub oversold: i32,
    /// Subtracted when RSI > 70
    pub overbought_penalty: i32,
    /// Added for a positive return over the momentum window, subtracted for a negative one
    pub momentum: i32,
    pub rsi_oversold: f64,
    pub rsi_neutral: f64,
    pub rsi_overbought: f64,
}

impl Default for ScoringRubric {
    fn default() -> Self {
        Self {
            base: 50,
            above_short_sma: 10,
            golden_trend: 10,
            recovering: 20,
            oversold: 10,
            overbought_penalty: 20,
            momentum: 10,
            rsi_oversold: 30.0,
            rsi_neutral: 50.0,
            rsi_overbought: 70.0,
        }
    }
}

/// What to do when no fresh quote is available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StalePolicy {
    /// Score with the last daily close, tagged DELAYED
    Delayed,
    /// Drop the symbol from the run
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreshnessPolicy {
    /// Oldest quote still considered live
    pub max_quote_age: Duration,
    pub on_stale: StalePolicy,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            max_quote_age: Duration::from_secs(20 * 60),
            on_stale: StalePolicy::Delayed,
        }
    }
}

/// Bounded retry with exponential backoff and jitter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Configuration for one screening run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerConfig {
    pub market: Market,
    /// Calendar days of daily history to request (default: 730, two years)
    pub lookback_days: u32,
    /// Explicit universe; bypasses the ticker list lookup
    pub symbols: Option<Vec<String>>,
    /// Keep only the first N symbols of the universe
    pub max_symbols: Option<usize>,
    pub indicators: IndicatorConfig,
    pub rubric: ScoringRubric,
    pub freshness: FreshnessPolicy,
    pub retry: RetryPolicy,
    /// Symbols evaluated at once
    pub concurrency: usize,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    /// Fetch fundamentals and add their adjustment to the score
    pub use_fundamentals: bool,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            market: Market::India,
            lookback_days: 730,
            symbols: None,
            max_symbols: None,
            indicators: IndicatorConfig::default(),
            rubric: ScoringRubric::default(),
            freshness: FreshnessPolicy::default(),
            retry: RetryPolicy::default(),
            concurrency: 4,
            request_timeout: Duration::from_secs(30),
            use_fundamentals: false,
        }
    }
}

impl ScreenerConfig {
    pub fn for_market(market: Market) -> Self {
        Self {
            market,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.indicators.validate()?;

        if self.concurrency == 0 {
            return Err(EngineError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(EngineError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        // Weekends and holidays: ~252 trading days per 365 calendar days
        let trading_days = self.lookback_days as usize * 252 / 365;
        if trading_days < self.indicators.required_history() {
            return Err(EngineError::InvalidConfig(format!(
                "lookback of {} days cannot cover {} trading days of history",
                self.lookback_days,
                self.indicators.required_history()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ScreenerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.indicators.required_history(), 200);
    }

    #[test]
    fn test_zero_period_rejected() {
        let mut config = ScreenerConfig::default();
        config.indicators.rsi_period = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_short_lookback_rejected() {
        let config = ScreenerConfig {
            lookback_days: 90,
            ..ScreenerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_required_history_follows_longest_window() {
        let indicators = IndicatorConfig {
            rsi_period: 30,
            short_sma: 10,
            long_sma: 20,
            momentum_window: 5,
        };
        assert_eq!(indicators.required_history(), 31);
    }
}
