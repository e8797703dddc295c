//! Backtest equity curve file (`<MARKET>_backtest_curve.csv`)

use crate::rankings::{csv_err, replace_file};
use crate::{TableError, TableResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

const COL_DATE: &str = "Date";
const COL_MARKET_RETURN: &str = "Return_1M";
const COL_STRATEGY_RETURN: &str = "Strategy_Return";
const COL_MARKET_CUMULATIVE: &str = "Market_Cumulative";
const COL_STRATEGY_CUMULATIVE: &str = "Strategy_Cumulative";

const HEADER: [&str; 5] = [
    COL_DATE,
    COL_MARKET_RETURN,
    COL_STRATEGY_RETURN,
    COL_MARKET_CUMULATIVE,
    COL_STRATEGY_CUMULATIVE,
];

/// One date on the equity curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveRow {
    pub date: NaiveDate,
    pub market_return: f64,
    pub strategy_return: f64,
    pub market_cumulative: f64,
    pub strategy_cumulative: f64,
}

/// Write the curve, replacing any previous file
pub fn write_curve(path: &Path, rows: &[CurveRow]) -> TableResult<()> {
    if rows.is_empty() {
        return Err(TableError::EmptyTable(path.display().to_string()));
    }

    let csv_err = |source| csv_err(path, source);

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER).map_err(csv_err)?;

    for row in rows {
        writer
            .write_record([
                row.date.format("%Y-%m-%d").to_string(),
                format!("{:.6}", row.market_return),
                format!("{:.6}", row.strategy_return),
                format!("{:.6}", row.market_cumulative),
                format!("{:.6}", row.strategy_cumulative),
            ])
            .map_err(csv_err)?;
    }

    let bytes = writer.into_inner().map_err(|e| TableError::Io {
        path: path.display().to_string(),
        source: e.into_error(),
    })?;
    replace_file(path, &bytes)?;

    info!(path = %path.display(), points = rows.len(), "Backtest curve written");
    Ok(())
}

/// Read a curve file; `Ok(None)` when no backtest has been written yet.
/// Rows whose cells do not parse are dropped.
pub fn read_curve(path: &Path) -> TableResult<Option<Vec<CurveRow>>> {
    if !path.exists() {
        debug!(path = %path.display(), "No backtest curve yet");
        return Ok(None);
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| csv_err(path, e))?;

    let headers = reader.headers().map_err(|e| csv_err(path, e))?.clone();
    let mut idx = [0usize; 5];
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
        let num = |i: usize| record.get(idx[i]).and_then(|s| s.parse::<f64>().ok());

        let date = record
            .get(idx[0])
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
        match (date, num(1), num(2), num(3), num(4)) {
            (Some(date), Some(market_return), Some(strategy_return), Some(mc), Some(sc)) => {
                rows.push(CurveRow {
                    date,
                    market_return,
                    strategy_return,
                    market_cumulative: mc,
                    strategy_cumulative: sc,
                })
            }
            _ => dropped += 1,
        }
    }

    if dropped > 0 {
        warn!(path = %path.display(), dropped, "Skipped unreadable curve rows");
    }
    Ok(Some(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_curve_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IN_backtest_curve.csv");
        let rows = vec![
            CurveRow {
                date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                market_return: 0.01,
                strategy_return: 0.0,
                market_cumulative: 0.01,
                strategy_cumulative: 0.0,
            },
            CurveRow {
                date: NaiveDate::from_ymd_opt(2026, 3, 3).unwrap(),
                market_return: -0.02,
                strategy_return: 0.005,
                market_cumulative: -0.01,
                strategy_cumulative: 0.005,
            },
        ];

        write_curve(&path, &rows).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "Date,Return_1M,Strategy_Return,Market_Cumulative,Strategy_Cumulative"
        );
        assert_eq!(lines[2], "2026-03-03,-0.020000,0.005000,-0.010000,0.005000");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_read_curve_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("US_backtest_curve.csv");
        let rows = vec![CurveRow {
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            market_return: 0.0125,
            strategy_return: -0.0025,
            market_cumulative: 0.0125,
            strategy_cumulative: -0.0025,
        }];

        write_curve(&path, &rows).unwrap();
        assert_eq!(read_curve(&path).unwrap(), Some(rows));
    }

    #[test]
    fn test_read_curve_absent_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_curve(&dir.path().join("IN_backtest_curve.csv")).unwrap(), None);
    }

    #[test]
    fn test_read_curve_drops_bad_rows_and_needs_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IN_backtest_curve.csv");
        std::fs::write(
            &path,
            "Date,Return_1M,Strategy_Return,Market_Cumulative,Strategy_Cumulative\n\
             2026-03-02,0.01,0,0.01,0\n\
             not-a-date,0.01,0,0.02,0\n\
             2026-03-04,0.02,0.01,0.03,nan?\n",
        )
        .unwrap();
        let rows = read_curve(&path).unwrap().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].market_cumulative, 0.01);

        std::fs::write(&path, "Date,Return_1M\n2026-03-02,0.01\n").unwrap();
        assert!(matches!(
            read_curve(&path),
            Err(TableError::MissingColumn {
                column: "Strategy_Return",
                ..
            })
        ));
    }

    #[test]
    fn test_empty_curve_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_curve(&dir.path().join("c.csv"), &[]).unwrap_err();
        assert!(matches!(err, TableError::EmptyTable(_)));
    }
}
