//! Mean-reversion backtest over daily histories
//!
//! Signal: RSI below the entry level while the close is above the long SMA.
//! Each signal day earns the forward return over the holding period; days
//! without a signal earn nothing. Returns are averaged across symbols per
//! date and summed into equity curves for the signal and for holding
//! everything.

use chrono::NaiveDate;
use persistence::CurveRow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::IndicatorConfig;
use crate::error::{EngineError, EngineResult};
use crate::indicators::indicator_series;
use crate::types::{Market, PriceSeries};

/// `<data_dir>/<MARKET>_backtest_curve.csv`
pub fn curve_path(data_dir: &Path, market: Market) -> PathBuf {
    data_dir.join(format!("{}_backtest_curve.csv", market.key()))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub indicators: IndicatorConfig,
    /// Enter when RSI is below this (default: 30)
    pub rsi_entry: f64,
    /// Forward return horizon in trading days (default: 21, about one month)
    pub holding_days: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            indicators: IndicatorConfig::default(),
            rsi_entry: 30.0,
            holding_days: 21,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.indicators.validate()?;
        if self.holding_days == 0 {
            return Err(EngineError::InvalidConfig(
                "holding_days must be at least 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.rsi_entry) {
            return Err(EngineError::InvalidConfig(format!(
                "rsi_entry {} outside [0, 100]",
                self.rsi_entry
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct BacktestCurve {
    pub points: Vec<CurveRow>,
    /// Symbol-days on which the signal fired
    pub signals: usize,
}

impl BacktestCurve {
    pub fn total_strategy_return(&self) -> f64 {
        self.points.last().map_or(0.0, |p| p.strategy_cumulative)
    }

    pub fn total_market_return(&self) -> f64 {
        self.points.last().map_or(0.0, |p| p.market_cumulative)
    }
}

#[derive(Default)]
struct DayAccumulator {
    market_sum: f64,
    strategy_sum: f64,
    count: usize,
}

pub fn run_backtest(histories: &[PriceSeries], config: &BacktestConfig) -> EngineResult<BacktestCurve> {
    config.validate()?;

    let mut days: BTreeMap<NaiveDate, DayAccumulator> = BTreeMap::new();
    let mut signals = 0;

    for series in histories {
        let rows = indicator_series(series, &config.indicators)?;
        let mut symbol_signals = 0;

        for (i, (point, snapshot)) in rows.iter().enumerate() {
            let (Some(rsi), Some(sma_long)) = (snapshot.rsi, snapshot.sma_200) else {
                continue;
            };
            // Forward return needs the exit close
            let Some((exit, _)) = i.checked_add(config.holding_days).and_then(|j| rows.get(j)) else {
                break;
            };

            let forward = exit.close / point.close - 1.0;
            let signal = rsi < config.rsi_entry && point.close > sma_long;

            let day = days.entry(point.date).or_default();
            day.market_sum += forward;
            day.count += 1;
            if signal {
                day.strategy_sum += forward;
                symbol_signals += 1;
            }
        }

        debug!(symbol = series.symbol(), signals = symbol_signals, "Backtested symbol");
        signals += symbol_signals;
    }

    let mut market_cumulative = 0.0;
    let mut strategy_cumulative = 0.0;
    let points: Vec<CurveRow> = days
        .into_iter()
        .map(|(date, day)| {
            let n = day.count as f64;
            let market_return = day.market_sum / n;
            let strategy_return = day.strategy_sum / n;
            market_cumulative += market_return;
            strategy_cumulative += strategy_return;
            CurveRow {
                date,
                market_return,
                strategy_return,
                market_cumulative,
                strategy_cumulative,
            }
        })
        .collect();

    let curve = BacktestCurve { points, signals };
    info!(
        symbols = histories.len(),
        days = curve.points.len(),
        signals,
        strategy_return = curve.total_strategy_return(),
        market_return = curve.total_market_return(),
        "Backtest complete"
    );
    Ok(curve)
}
