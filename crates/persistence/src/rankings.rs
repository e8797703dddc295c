//! Rankings file: the `<MARKET>_rankings.csv` table read by the dashboard
//!
//! Writes replace the previous file wholesale (temp file + rename), so a reader
//! sees either the old table or the new one, never a partial write. Reads are
//! lenient: only `Ticker` is required, every other column degrades to `None`.

use crate::{TableError, TableResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const COL_TICKER: &str = "Ticker";
pub const COL_CLOSE: &str = "Close";
pub const COL_ALPHA_SCORE: &str = "Alpha_Score";
pub const COL_RSI: &str = "RSI";
pub const COL_SMA_50: &str = "SMA_50";
pub const COL_DATA_SOURCE: &str = "Data_Source";
pub const COL_LAST_UPDATED: &str = "Last_Updated";

const HEADER: [&str; 7] = [
    COL_TICKER,
    COL_CLOSE,
    COL_ALPHA_SCORE,
    COL_RSI,
    COL_SMA_50,
    COL_DATA_SOURCE,
    COL_LAST_UPDATED,
];

/// One row of the rankings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingRow {
    pub ticker: String,
    pub close: Option<f64>,
    pub alpha_score: Option<u8>,
    pub rsi: Option<f64>,
    pub sma_50: Option<f64>,
    pub data_source: Option<String>,
    pub last_updated: Option<String>,
}

/// Outcome of a successful write
#[derive(Debug, Clone)]
pub struct WrittenTable {
    pub path: PathBuf,
    pub rows: usize,
    /// Hex SHA-256 of the bytes written
    pub digest: String,
}

fn fmt_2dp(value: Option<f64>) -> String {
    value.map_or(String::new(), |v| format!("{:.2}", v))
}

pub(crate) fn csv_err(path: &Path, source: csv::Error) -> TableError {
    TableError::Csv {
        path: path.display().to_string(),
        source,
    }
}

fn io_err(path: &Path, source: std::io::Error) -> TableError {
    TableError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Write the ranking table, fully replacing any previous file at `path`.
///
/// An empty table is rejected: overwriting a valid file with nothing must be
/// an explicit failure of the run, not a silent success.
pub fn write_rankings(path: &Path, rows: &[RankingRow]) -> TableResult<WrittenTable> {
    if rows.is_empty() {
        return Err(TableError::EmptyTable(path.display().to_string()));
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER).map_err(|e| csv_err(path, e))?;

    for row in rows {
        writer
            .write_record([
                row.ticker.clone(),
                fmt_2dp(row.close),
                row.alpha_score.map_or(String::new(), |s| s.to_string()),
                fmt_2dp(row.rsi),
                fmt_2dp(row.sma_50),
                row.data_source.clone().unwrap_or_default(),
                row.last_updated.clone().unwrap_or_default(),
            ])
            .map_err(|e| csv_err(path, e))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| io_err(path, e.into_error()))?;
    let digest = format!("{:x}", Sha256::digest(&bytes));

    replace_file(path, &bytes)?;

    info!(path = %path.display(), rows = rows.len(), "Rankings written");
    Ok(WrittenTable {
        path: path.to_path_buf(),
        rows: rows.len(),
        digest,
    })
}

/// Write `bytes` next to `path` and rename over it
pub(crate) fn replace_file(path: &Path, bytes: &[u8]) -> TableResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Read a rankings file.
///
/// Returns `Ok(None)` when the file does not exist yet.
pub fn read_rankings(path: &Path) -> TableResult<Option<Vec<RankingRow>>> {
    if !path.exists() {
        debug!(path = %path.display(), "No rankings file yet");
        return Ok(None);
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| csv_err(path, e))?;

    let headers = reader.headers().map_err(|e| csv_err(path, e))?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);

    let ticker_idx = column(COL_TICKER).ok_or_else(|| TableError::MissingColumn {
        path: path.display().to_string(),
        column: COL_TICKER,
    })?;
    let close_idx = column(COL_CLOSE);
    let score_idx = column(COL_ALPHA_SCORE);
    let rsi_idx = column(COL_RSI);
    let sma_idx = column(COL_SMA_50);
    let source_idx = column(COL_DATA_SOURCE);
    let updated_idx = column(COL_LAST_UPDATED);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| csv_err(path, e))?;

        let cell = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let Some(ticker) = cell(Some(ticker_idx)) else {
            continue;
        };

        rows.push(RankingRow {
            ticker,
            close: cell(close_idx).and_then(|s| s.parse().ok()),
            alpha_score: cell(score_idx).and_then(|s| parse_score(&s)),
            rsi: cell(rsi_idx).and_then(|s| s.parse().ok()),
            sma_50: cell(sma_idx).and_then(|s| s.parse().ok()),
            data_source: cell(source_idx),
            last_updated: cell(updated_idx),
        });
    }

    Ok(Some(rows))
}

/// Accept "72" as well as "72.0" (older files were written by pandas)
fn parse_score(s: &str) -> Option<u8> {
    s.parse::<u8>().ok().or_else(|| {
        s.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && (0.0..=100.0).contains(v))
            .map(|v| v.round() as u8)
    })
}
