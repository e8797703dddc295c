//! Ranking table: score records ordered by Alpha Score

use chrono::SecondsFormat;
use persistence::RankingRow;
use serde::Serialize;
use std::cmp::Reverse;

use crate::types::ScoreRecord;

/// Records ordered by `alpha_score` descending; equal scores keep input order
#[derive(Debug, Clone, Default, Serialize)]
pub struct RankingTable {
    records: Vec<ScoreRecord>,
}

impl RankingTable {
    pub fn records(&self) -> &[ScoreRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn top(&self, n: usize) -> &[ScoreRecord] {
        &self.records[..n.min(self.records.len())]
    }

    /// Rows for the rankings file
    pub fn to_rows(&self) -> Vec<RankingRow> {
        self.records.iter().map(record_to_row).collect()
    }
}

/// Stable sort, highest score first
pub fn rank(mut records: Vec<ScoreRecord>) -> RankingTable {
    records.sort_by_key(|r| Reverse(r.alpha_score));
    RankingTable { records }
}

fn record_to_row(record: &ScoreRecord) -> RankingRow {
    RankingRow {
        ticker: record.ticker.clone(),
        close: Some(record.close),
        alpha_score: Some(record.alpha_score),
        rsi: Some(record.rsi),
        sma_50: Some(record.sma_50),
        data_source: Some(record.data_source.as_str().to_string()),
        last_updated: Some(record.as_of.to_rfc3339_opts(SecondsFormat::Secs, true)),
    }
}
