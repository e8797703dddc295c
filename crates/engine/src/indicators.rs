//! Indicator calculator: RSI, short/long SMA, and momentum over a daily close series
//!
//! All rolling means go through `ta`'s `SimpleMovingAverage`. An indicator is
//! only reported once its full window has been observed; shorter series yield
//! `None` instead of a partial average.

use std::collections::VecDeque;

use ta::indicators::SimpleMovingAverage;
use ta::Next;

use crate::config::IndicatorConfig;
use crate::error::EngineError;
use crate::types::{IndicatorSnapshot, PricePoint, PriceSeries};

/// Rolling sums inside `SimpleMovingAverage` drift by a few ULPs once values
/// leave the window; anything below this is a zero average.
const ZERO_AVERAGE: f64 = 1e-9;

fn sma(period: usize) -> Result<SimpleMovingAverage, EngineError> {
    SimpleMovingAverage::new(period)
        .map_err(|e| EngineError::InvalidConfig(format!("SMA period {period}: {e:?}")))
}

/// RSI from average gain and loss. A zero average loss reads as maximal
/// strength (100), including the flat case where both averages are zero.
pub fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss <= ZERO_AVERAGE {
        return 100.0;
    }
    let avg_gain = avg_gain.max(0.0);
    (100.0 - 100.0 / (1.0 + avg_gain / avg_loss)).clamp(0.0, 100.0)
}

/// Bar-by-bar indicator state for one symbol
pub struct IndicatorStream {
    config: IndicatorConfig,
    avg_gain: SimpleMovingAverage,
    avg_loss: SimpleMovingAverage,
    short_sma: SimpleMovingAverage,
    long_sma: SimpleMovingAverage,
    momentum_closes: VecDeque<f64>,
    prev_close: Option<f64>,
    observations: usize,
    deltas: usize,
}

impl IndicatorStream {
    pub fn new(config: IndicatorConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            avg_gain: sma(config.rsi_period)?,
            avg_loss: sma(config.rsi_period)?,
            short_sma: sma(config.short_sma)?,
            long_sma: sma(config.long_sma)?,
            momentum_closes: VecDeque::with_capacity(config.momentum_window + 1),
            prev_close: None,
            observations: 0,
            deltas: 0,
        })
    }

    /// Feed the next close; returns the indicators as of this close
    pub fn next(&mut self, close: f64) -> IndicatorSnapshot {
        self.observations += 1;

        let short = self.short_sma.next(close);
        let long = self.long_sma.next(close);

        let mut rsi = None;
        if let Some(prev) = self.prev_close {
            let delta = close - prev;
            let gain = self.avg_gain.next(delta.max(0.0));
            let loss = self.avg_loss.next((-delta).max(0.0));
            self.deltas += 1;
            if self.deltas >= self.config.rsi_period {
                rsi = Some(rsi_from_averages(gain, loss));
            }
        }
        self.prev_close = Some(close);

        self.momentum_closes.push_back(close);
        if self.momentum_closes.len() > self.config.momentum_window + 1 {
            self.momentum_closes.pop_front();
        }
        let return_window = match self.momentum_closes.front() {
            Some(&base) if self.momentum_closes.len() == self.config.momentum_window + 1 => {
                Some(close / base - 1.0)
            }
            _ => None,
        };

        IndicatorSnapshot {
            rsi,
            sma_50: (self.observations >= self.config.short_sma).then_some(short),
            sma_200: (self.observations >= self.config.long_sma).then_some(long),
            return_window,
        }
    }
}

/// Indicators as of the latest close of `series`.
///
/// Pure function of its inputs: the whole series is replayed on every call.
/// A series with fewer than two closes yields an all-`None` snapshot.
pub fn compute_indicators(
    series: &PriceSeries,
    config: &IndicatorConfig,
) -> Result<IndicatorSnapshot, EngineError> {
    let mut stream = IndicatorStream::new(*config)?;
    let mut snapshot = IndicatorSnapshot::default();
    for close in series.closes() {
        snapshot = stream.next(close);
    }
    if series.len() < 2 {
        return Ok(IndicatorSnapshot::default());
    }
    Ok(snapshot)
}

/// Indicators for every close of `series`, oldest first
pub fn indicator_series(
    series: &PriceSeries,
    config: &IndicatorConfig,
) -> Result<Vec<(PricePoint, IndicatorSnapshot)>, EngineError> {
    let mut stream = IndicatorStream::new(*config)?;
    Ok(series
        .points()
        .iter()
        .map(|point| (*point, stream.next(point.close)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn series(prices: &[f64]) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let points = prices
            .iter()
            .enumerate()
            .map(|(i, &close)| PricePoint {
                date: start + Duration::days(i as i64),
                close,
            })
            .collect();
        PriceSeries::new("TEST", points).unwrap()
    }

    fn small_config() -> IndicatorConfig {
        IndicatorConfig {
            rsi_period: 2,
            short_sma: 3,
            long_sma: 5,
            momentum_window: 2,
        }
    }

    #[test]
    fn test_rsi_hand_computed() {
        // deltas +1.0, -0.5 -> avg gain 0.5, avg loss 0.25 -> RS 2
        let snap = compute_indicators(&series(&[1.0, 2.0, 1.5]), &small_config()).unwrap();
        let rsi = snap.rsi.unwrap();
        assert!((rsi - 66.666_666_666_666_67).abs() < 1e-9, "rsi = {rsi}");
    }

    #[test]
    fn test_sma_undefined_until_window_full() {
        let snap = compute_indicators(&series(&[1.0, 2.0, 3.0, 4.0]), &small_config()).unwrap();
        assert_eq!(snap.sma_50, Some(3.0));
        assert_eq!(snap.sma_200, None);
    }

    #[test]
    fn test_momentum_over_window() {
        let snap = compute_indicators(&series(&[100.0, 105.0, 110.0]), &small_config()).unwrap();
        let ret = snap.return_window.unwrap();
        assert!((ret - 0.10).abs() < 1e-12);

        let short = compute_indicators(&series(&[100.0, 105.0]), &small_config()).unwrap();
        assert_eq!(short.return_window, None);
    }

    #[test]
    fn test_fewer_than_two_observations_is_all_undefined() {
        let config = IndicatorConfig {
            rsi_period: 1,
            short_sma: 1,
            long_sma: 1,
            momentum_window: 1,
        };
        let snap = compute_indicators(&series(&[42.0]), &config).unwrap();
        assert_eq!(snap, IndicatorSnapshot::default());

        let empty = PriceSeries::new("EMPTY", Vec::new()).unwrap();
        let snap = compute_indicators(&empty, &IndicatorConfig::default()).unwrap();
        assert_eq!(snap, IndicatorSnapshot::default());
    }

    #[test]
    fn test_rising_series_is_maximal_strength_with_golden_trend() {
        let prices: Vec<f64> = (0..260).map(|i| 100.0 + i as f64).collect();
        let snap = compute_indicators(&series(&prices), &IndicatorConfig::default()).unwrap();
        assert_eq!(snap.rsi, Some(100.0));
        assert!(snap.sma_50.unwrap() > snap.sma_200.unwrap());
        assert!(snap.return_window.unwrap() > 0.0);
    }

    #[test]
    fn test_falling_series_rsi_zero() {
        let prices: Vec<f64> = (0..260).map(|i| 500.0 - i as f64).collect();
        let snap = compute_indicators(&series(&prices), &IndicatorConfig::default()).unwrap();
        assert_eq!(snap.rsi, Some(0.0));
        assert!(snap.sma_50.unwrap() < snap.sma_200.unwrap());
        assert!(snap.return_window.unwrap() < 0.0);
    }

    #[test]
    fn test_flat_series_uses_zero_loss_convention() {
        let snap = compute_indicators(&series(&[100.0; 200]), &IndicatorConfig::default()).unwrap();
        assert_eq!(snap.rsi, Some(100.0));
        assert_eq!(snap.sma_50, Some(100.0));
        assert_eq!(snap.sma_200, Some(100.0));
        assert_eq!(snap.return_window, Some(0.0));
    }

    #[test]
    fn test_repeated_calls_are_bit_identical() {
        let prices: Vec<f64> = (0..300)
            .map(|i| 1000.0 + (i as f64 * 0.37).sin() * 25.0 + i as f64 * 0.1)
            .collect();
        let s = series(&prices);
        let config = IndicatorConfig::default();
        let a = compute_indicators(&s, &config).unwrap();
        let b = compute_indicators(&s, &config).unwrap();
        assert_eq!(a.rsi.map(f64::to_bits), b.rsi.map(f64::to_bits));
        assert_eq!(a.sma_50.map(f64::to_bits), b.sma_50.map(f64::to_bits));
        assert_eq!(a.sma_200.map(f64::to_bits), b.sma_200.map(f64::to_bits));
        assert_eq!(
            a.return_window.map(f64::to_bits),
            b.return_window.map(f64::to_bits)
        );
        assert!(a.sma_200.is_some() && a.return_window.is_some());
    }

    #[test]
    fn test_series_matches_latest_snapshot() {
        let prices: Vec<f64> = (0..220).map(|i| 50.0 + (i % 7) as f64).collect();
        let s = series(&prices);
        let config = IndicatorConfig::default();
        let rows = indicator_series(&s, &config).unwrap();
        assert_eq!(rows.len(), 220);
        assert_eq!(rows.last().unwrap().1, compute_indicators(&s, &config).unwrap());
        assert_eq!(rows[198].1.sma_200, None);
        assert!(rows[199].1.sma_200.is_some());
    }

    #[test]
    fn test_invalid_period_rejected() {
        let config = IndicatorConfig {
            short_sma: 0,
            ..IndicatorConfig::default()
        };
        assert!(IndicatorStream::new(config).is_err());
    }

    #[test]
    fn test_rsi_from_averages_bounds() {
        assert_eq!(rsi_from_averages(0.0, 0.0), 100.0);
        assert_eq!(rsi_from_averages(5.0, 0.0), 100.0);
        assert_eq!(rsi_from_averages(0.0, 5.0), 0.0);
        assert!((rsi_from_averages(1.0, 1.0) - 50.0).abs() < 1e-12);
    }
}
