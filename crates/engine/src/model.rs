//! Direction classifier
//!
//! Gradient-boosted trees over four daily features: RSI, the one-month
//! return, and the close's distance to each SMA. A sample is labelled up when
//! the close `horizon` trading days later is higher. Samples from every symbol
//! are pooled and ordered by date; the oldest share trains the model and the
//! newest share measures its accuracy, so no test day precedes a training day.
//!
//! Each symbol's latest complete bar is then scored: `ML_Confidence` is the
//! predicted probability of an up move, `Factor_Score` a plain momentum plus
//! mean-reversion number shown next to it.

use chrono::NaiveDate;
use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use persistence::SignalRow;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::IndicatorConfig;
use crate::error::{EngineError, EngineResult};
use crate::indicators::indicator_series;
use crate::types::{IndicatorSnapshot, Market, PricePoint, PriceSeries};

const FEATURES: usize = 4;

/// `<data_dir>/<MARKET>_ml_signals.csv`
pub fn signals_path(data_dir: &Path, market: Market) -> PathBuf {
    data_dir.join(format!("{}_ml_signals.csv", market.key()))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub indicators: IndicatorConfig,
    /// Label horizon in trading days (default: 10)
    pub horizon: usize,
    /// Share of date-ordered samples used for training (default: 0.8)
    pub train_fraction: f64,
    /// Boosting rounds (default: 100)
    pub trees: usize,
    /// Shrinkage per round (default: 0.05)
    pub learning_rate: f32,
    /// Depth of each tree (default: 3)
    pub max_depth: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            indicators: IndicatorConfig::default(),
            horizon: 10,
            train_fraction: 0.8,
            trees: 100,
            learning_rate: 0.05,
            max_depth: 3,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.indicators.validate()?;
        if self.horizon == 0 {
            return Err(EngineError::InvalidConfig(
                "horizon must be at least 1".to_string(),
            ));
        }
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "train_fraction {} outside (0, 1)",
                self.train_fraction
            )));
        }
        if self.trees == 0 || self.max_depth == 0 {
            return Err(EngineError::InvalidConfig(
                "trees and max_depth must be positive".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(EngineError::InvalidConfig(format!(
                "learning_rate {} must be positive",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Training summary plus one signal per symbol, highest confidence first
#[derive(Debug, Clone)]
pub struct ModelReport {
    pub train_samples: usize,
    pub test_samples: usize,
    /// Share of test samples whose direction was predicted correctly
    pub accuracy: f64,
    pub signals: Vec<SignalRow>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    date: NaiveDate,
    features: [f64; FEATURES],
    up: bool,
}

/// RSI, one-month return, close vs SMA 50, close vs SMA 200
fn features(point: &PricePoint, snapshot: &IndicatorSnapshot) -> Option<[f64; FEATURES]> {
    let (Some(rsi), Some(ret), Some(sma_short), Some(sma_long)) = (
        snapshot.rsi,
        snapshot.return_window,
        snapshot.sma_50,
        snapshot.sma_200,
    ) else {
        return None;
    };
    Some([
        rsi,
        ret,
        point.close / sma_short - 1.0,
        point.close / sma_long - 1.0,
    ])
}

pub fn factor_score(return_1m: f64, rsi: f64) -> f64 {
    return_1m * 100.0 + (100.0 - rsi)
}

/// Oldest `fraction` of the samples for training, the rest for testing.
/// Ties on a date keep input order.
fn split_chronologically(mut samples: Vec<Sample>, fraction: f64) -> (Vec<Sample>, Vec<Sample>) {
    samples.sort_by_key(|s| s.date);
    let split = (samples.len() as f64 * fraction).floor() as usize;
    let test = samples.split_off(split.min(samples.len()));
    (samples, test)
}

fn to_f32(features: &[f64; FEATURES]) -> Vec<f32> {
    features.iter().map(|&v| v as f32).collect()
}

fn fit(train: &[Sample], config: &ModelConfig) -> GBDT {
    let mut cfg = Config::new();
    cfg.set_feature_size(FEATURES);
    cfg.set_max_depth(config.max_depth);
    cfg.set_iterations(config.trees);
    cfg.set_shrinkage(config.learning_rate);
    // Binary log-likelihood: labels are +1 / -1
    cfg.set_loss("LogLikelyhood");

    let mut data: DataVec = train
        .iter()
        .map(|s| {
            let label = if s.up { 1.0 } else { -1.0 };
            Data::new_training_data(to_f32(&s.features), 1.0, label, None)
        })
        .collect();

    let mut model = GBDT::new(&cfg);
    model.fit(&mut data);
    model
}

/// Probability of an up move for each feature row
fn predict(model: &GBDT, rows: &[[f64; FEATURES]]) -> Vec<f64> {
    if rows.is_empty() {
        return Vec::new();
    }
    let data: DataVec = rows
        .iter()
        .map(|x| Data::new_test_data(to_f32(x), None))
        .collect();
    model
        .predict(&data)
        .into_iter()
        .map(|p| {
            let p = f64::from(p);
            if p.is_finite() {
                p.clamp(0.0, 1.0)
            } else {
                0.5
            }
        })
        .collect()
}

/// Train on pooled `histories` and score each symbol's latest bar
pub fn train_and_predict(
    histories: &[PriceSeries],
    config: &ModelConfig,
) -> EngineResult<ModelReport> {
    config.validate()?;

    let mut samples = Vec::new();
    let mut latest: Vec<(String, PricePoint, [f64; FEATURES])> = Vec::new();

    for series in histories {
        let rows = indicator_series(series, &config.indicators)?;
        let mut last = None;

        for (i, (point, snapshot)) in rows.iter().enumerate() {
            let Some(x) = features(point, snapshot) else {
                continue;
            };
            last = Some((*point, x));

            // The newest `horizon` bars have no label yet
            let Some((exit, _)) = i.checked_add(config.horizon).and_then(|j| rows.get(j)) else {
                continue;
            };
            samples.push(Sample {
                date: point.date,
                features: x,
                up: exit.close > point.close,
            });
        }

        match last {
            Some((point, x)) => latest.push((series.symbol().to_string(), point, x)),
            None => debug!(symbol = series.symbol(), "No complete feature row, not scored"),
        }
    }

    let total = samples.len();
    let (train, test) = split_chronologically(samples, config.train_fraction);
    if train.is_empty() || test.is_empty() {
        return Err(EngineError::TooFewSamples { samples: total });
    }

    let model = fit(&train, config);

    let test_rows: Vec<_> = test.iter().map(|s| s.features).collect();
    let correct = predict(&model, &test_rows)
        .iter()
        .zip(&test)
        .filter(|(p, s)| (**p >= 0.5) == s.up)
        .count();
    let accuracy = correct as f64 / test.len() as f64;
    info!(
        train = train.len(),
        test = test.len(),
        accuracy_pct = accuracy * 100.0,
        "Classifier trained"
    );

    let latest_rows: Vec<_> = latest.iter().map(|(_, _, x)| *x).collect();
    let mut signals: Vec<SignalRow> = latest
        .into_iter()
        .zip(predict(&model, &latest_rows))
        .map(|((ticker, point, x), confidence)| SignalRow {
            ticker,
            ml_confidence: confidence,
            factor_score: factor_score(x[1], x[0]),
            close: point.close,
            rsi: x[0],
            return_1m: x[1],
            as_of: point.date,
        })
        .collect();
    // Stable: equal confidence keeps universe order
    signals.sort_by(|a, b| b.ml_confidence.total_cmp(&a.ml_confidence));

    Ok(ModelReport {
        train_samples: train.len(),
        test_samples: test.len(),
        accuracy,
        signals,
    })
}
