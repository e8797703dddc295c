//! Screening run history: one run row plus one outcome row per symbol

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A persisted screening run
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunRecord {
    pub id: Option<i64>,
    pub run_id: String,
    pub market: String,
    pub started_at: String,
    pub finished_at: String,
    pub universe_size: i64,
    pub scored: i64,
    pub skipped: i64,
    pub output_path: Option<String>,
    pub table_digest: Option<String>,
    /// "complete" or "failed"
    pub status: String,
    pub error_message: Option<String>,
    pub lookback_days: Option<i64>,
    pub fundamentals_enabled: bool,
    pub created_at: Option<i64>,
}

/// Per-symbol outcome within a run
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OutcomeRecord {
    pub id: Option<i64>,
    pub run_id: String,
    /// Index of the symbol in the run's universe
    pub position: i64,
    pub ticker: String,
    /// "scored" or "skipped"
    pub status: String,
    pub reason: Option<String>,
    pub detail: Option<String>,
    pub alpha_score: Option<i64>,
    pub data_source: Option<String>,
}

/// Repository for run history
pub struct RunRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RunRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a run and all of its outcomes atomically
    pub async fn save_run(&self, run: &RunRecord, outcomes: &[OutcomeRecord]) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"INSERT INTO screen_runs
                (run_id, market, started_at, finished_at, universe_size, scored, skipped,
                 output_path, table_digest, status, error_message, lookback_days,
                 fundamentals_enabled)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&run.run_id)
        .bind(&run.market)
        .bind(&run.started_at)
        .bind(&run.finished_at)
        .bind(run.universe_size)
        .bind(run.scored)
        .bind(run.skipped)
        .bind(&run.output_path)
        .bind(&run.table_digest)
        .bind(&run.status)
        .bind(&run.error_message)
        .bind(run.lookback_days)
        .bind(run.fundamentals_enabled)
        .execute(&mut *tx)
        .await?;

        for outcome in outcomes {
            sqlx::query(
                r#"INSERT INTO symbol_outcomes
                    (run_id, position, ticker, status, reason, detail, alpha_score, data_source)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&run.run_id)
            .bind(outcome.position)
            .bind(&outcome.ticker)
            .bind(&outcome.status)
            .bind(&outcome.reason)
            .bind(&outcome.detail)
            .bind(outcome.alpha_score)
            .bind(&outcome.data_source)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }

    /// Most recent runs first, optionally for one market
    pub async fn recent_runs(&self, market: Option<&str>, limit: i64) -> DbResult<Vec<RunRecord>> {
        let records = match market {
            Some(market) => {
                sqlx::query_as::<_, RunRecord>(
                    "SELECT * FROM screen_runs WHERE market = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2",
                )
                .bind(market)
                .bind(limit)
                .fetch_all(self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, RunRecord>(
                    "SELECT * FROM screen_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                )
                .bind(limit)
                .fetch_all(self.pool)
                .await?
            }
        };

        Ok(records)
    }

    pub async fn get_run(&self, run_id: &str) -> DbResult<Option<RunRecord>> {
        let record =
            sqlx::query_as::<_, RunRecord>("SELECT * FROM screen_runs WHERE run_id = ?1")
                .bind(run_id)
                .fetch_optional(self.pool)
                .await?;

        Ok(record)
    }

    /// Outcomes of a run in universe order
    pub async fn outcomes_for_run(&self, run_id: &str) -> DbResult<Vec<OutcomeRecord>> {
        let records = sqlx::query_as::<_, OutcomeRecord>(
            "SELECT * FROM symbol_outcomes WHERE run_id = ?1 ORDER BY position ASC",
        )
        .bind(run_id)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// How often a ticker was skipped, per reason, across the last `runs` runs
    pub async fn skip_counts(&self, ticker: &str, runs: i64) -> DbResult<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT COALESCE(o.reason, 'unknown'), COUNT(*)
               FROM symbol_outcomes o
               WHERE o.ticker = ?1 AND o.status = 'skipped'
                 AND o.run_id IN (SELECT run_id FROM screen_runs ORDER BY started_at DESC LIMIT ?2)
               GROUP BY o.reason
               ORDER BY COUNT(*) DESC"#,
        )
        .bind(ticker)
        .bind(runs)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn run(run_id: &str, market: &str, started_at: &str) -> RunRecord {
        RunRecord {
            id: None,
            run_id: run_id.to_string(),
            market: market.to_string(),
            started_at: started_at.to_string(),
            finished_at: started_at.to_string(),
            universe_size: 2,
            scored: 1,
            skipped: 1,
            output_path: Some(format!("data/{market}_rankings.csv")),
            table_digest: Some("ab".repeat(32)),
            status: "complete".to_string(),
            error_message: None,
            lookback_days: Some(730),
            fundamentals_enabled: false,
            created_at: None,
        }
    }

    fn outcomes(run_id: &str) -> Vec<OutcomeRecord> {
        vec![
            OutcomeRecord {
                id: None,
                run_id: run_id.to_string(),
                position: 0,
                ticker: "TCS.NS".to_string(),
                status: "scored".to_string(),
                reason: None,
                detail: None,
                alpha_score: Some(70),
                data_source: Some("LIVE".to_string()),
            },
            OutcomeRecord {
                id: None,
                run_id: run_id.to_string(),
                position: 1,
                ticker: "LICI.NS".to_string(),
                status: "skipped".to_string(),
                reason: Some("insufficient_history".to_string()),
                detail: Some("10 observations, 200 required".to_string()),
                alpha_score: None,
                data_source: None,
            },
        ]
    }

    #[tokio::test]
    async fn test_save_and_load_run() {
        let db = Database::in_memory().await.unwrap();
        let repo = RunRepository::new(db.pool());

        let r = run("IN-1", "IN", "2026-10-14T10:00:00Z");
        repo.save_run(&r, &outcomes("IN-1")).await.unwrap();

        let loaded = repo.get_run("IN-1").await.unwrap().unwrap();
        assert_eq!(loaded.market, "IN");
        assert_eq!(loaded.scored, 1);
        assert_eq!(loaded.lookback_days, Some(730));
        assert!(!loaded.fundamentals_enabled);

        let outs = repo.outcomes_for_run("IN-1").await.unwrap();
        assert_eq!(outs.len(), 2);
        assert_eq!(outs[0].ticker, "TCS.NS");
        assert_eq!(outs[1].reason.as_deref(), Some("insufficient_history"));
    }

    #[tokio::test]
    async fn test_recent_runs_ordering_and_filter() {
        let db = Database::in_memory().await.unwrap();
        let repo = RunRepository::new(db.pool());

        repo.save_run(&run("IN-1", "IN", "2026-10-13T10:00:00Z"), &[]).await.unwrap();
        repo.save_run(&run("US-1", "US", "2026-10-14T10:00:00Z"), &[]).await.unwrap();
        repo.save_run(&run("IN-2", "IN", "2026-10-15T10:00:00Z"), &[]).await.unwrap();

        let all = repo.recent_runs(None, 10).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["IN-2", "US-1", "IN-1"]);

        let india = repo.recent_runs(Some("IN"), 1).await.unwrap();
        assert_eq!(india.len(), 1);
        assert_eq!(india[0].run_id, "IN-2");
    }

    #[tokio::test]
    async fn test_duplicate_run_id_rolls_back() {
        let db = Database::in_memory().await.unwrap();
        let repo = RunRepository::new(db.pool());

        repo.save_run(&run("IN-1", "IN", "2026-10-14T10:00:00Z"), &outcomes("IN-1"))
            .await
            .unwrap();
        assert!(repo
            .save_run(&run("IN-1", "IN", "2026-10-14T11:00:00Z"), &outcomes("IN-1"))
            .await
            .is_err());

        let outs = repo.outcomes_for_run("IN-1").await.unwrap();
        assert_eq!(outs.len(), 2);
    }

    #[tokio::test]
    async fn test_skip_counts() {
        let db = Database::in_memory().await.unwrap();
        let repo = RunRepository::new(db.pool());

        repo.save_run(&run("IN-1", "IN", "2026-10-13T10:00:00Z"), &outcomes("IN-1"))
            .await
            .unwrap();
        repo.save_run(&run("IN-2", "IN", "2026-10-14T10:00:00Z"), &outcomes("IN-2"))
            .await
            .unwrap();

        let counts = repo.skip_counts("LICI.NS", 10).await.unwrap();
        assert_eq!(counts, vec![("insufficient_history".to_string(), 2)]);
        assert!(repo.skip_counts("TCS.NS", 10).await.unwrap().is_empty());
    }
}
