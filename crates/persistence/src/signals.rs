//! Classifier output file (`<MARKET>_ml_signals.csv`)
//!
//! One row per ticker, ordered by `ML_Confidence`. Kept apart from the
//! rankings file so the rankings columns stay fixed.

use crate::rankings::{csv_err, replace_file};
use crate::{TableError, TableResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

pub const COL_ML_CONFIDENCE: &str = "ML_Confidence";
pub const COL_FACTOR_SCORE: &str = "Factor_Score";

const HEADER: [&str; 7] = [
    "Ticker",
    COL_ML_CONFIDENCE,
    COL_FACTOR_SCORE,
    "Close",
    "RSI",
    "Return_1M",
    "As_Of",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRow {
    pub ticker: String,
    /// Predicted probability of an up move over the label horizon
    pub ml_confidence: f64,
    /// Momentum plus mean reversion: `Return_1M * 100 + (100 - RSI)`
    pub factor_score: f64,
    pub close: f64,
    pub rsi: f64,
    pub return_1m: f64,
    /// Date of the bar the features were taken from
    pub as_of: NaiveDate,
}

pub fn write_signals(path: &Path, rows: &[SignalRow]) -> TableResult<()> {
    if rows.is_empty() {
        return Err(TableError::EmptyTable(path.display().to_string()));
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER).map_err(|e| csv_err(path, e))?;
    for row in rows {
        writer
            .write_record([
                row.ticker.clone(),
                format!("{:.4}", row.ml_confidence),
                format!("{:.2}", row.factor_score),
                format!("{:.2}", row.close),
                format!("{:.2}", row.rsi),
                format!("{:.4}", row.return_1m),
                row.as_of.format("%Y-%m-%d").to_string(),
            ])
            .map_err(|e| csv_err(path, e))?;
    }

    let bytes = writer.into_inner().map_err(|e| TableError::Io {
        path: path.display().to_string(),
        source: e.into_error(),
    })?;
    replace_file(path, &bytes)?;

    info!(path = %path.display(), rows = rows.len(), "Signals written");
    Ok(())
}

/// `Ok(None)` when the classifier has not been run for this market
pub fn read_signals(path: &Path) -> TableResult<Option<Vec<SignalRow>>> {
    if !path.exists() {
        debug!(path = %path.display(), "No signals file yet");
        return Ok(None);
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| csv_err(path, e))?;

    let headers = reader.headers().map_err(|e| csv_err(path, e))?.clone();
    let mut idx = [0usize; 7];
    for (slot, name) in idx.iter_mut().zip(HEADER) {
        *slot = headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| TableError::MissingColumn {
                path: path.display().to_string(),
                column: name,
            })?;
    }

    let mut rows = Vec::new();
    let mut dropped = 0;
    for record in reader.records() {
        let record = record.map_err(|e| csv_err(path, e))?;
        let cell = |i: usize| record.get(idx[i]).filter(|s| !s.is_empty());
        let num = |i: usize| cell(i).and_then(|s| s.parse::<f64>().ok());

        let ticker = cell(0).map(str::to_string);
        let as_of = cell(6).and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
        match (ticker, num(1), num(2), num(3), num(4), num(5), as_of) {
            (
                Some(ticker),
                Some(ml_confidence),
                Some(factor_score),
                Some(close),
                Some(rsi),
                Some(return_1m),
                Some(as_of),
            ) => rows.push(SignalRow {
                ticker,
                ml_confidence,
                factor_score,
                close,
                rsi,
                return_1m,
                as_of,
            }),
            _ => dropped += 1,
        }
    }

    if dropped > 0 {
        warn!(path = %path.display(), dropped, "Skipped unreadable signal rows");
    }
    Ok(Some(rows))
}
