//! Screening pipeline
//!
//! For each symbol of the universe: fetch history, compute indicators,
//! resolve the scoring price under the freshness policy, score. Symbols are
//! evaluated concurrently with a bounded, order-preserving fan-out, and every
//! symbol ends up in the `RunReport` either scored or skipped with a reason.
//! The rankings file is written once, after collection, and only if at least
//! one symbol was scored.

use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};
use futures_util::stream::{self, StreamExt};
use persistence::repository::{OutcomeRecord, RunRecord, RunRepository};
use persistence::{write_rankings, SqlitePool, WrittenTable};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::config::{ScreenerConfig, StalePolicy};
use crate::error::{EngineError, EngineResult};
use crate::indicators::compute_indicators;
use crate::provider::MarketDataProvider;
use crate::ranking::{rank, RankingTable};
use crate::retry::with_retry;
use crate::scoring::{score, score_with_fundamentals};
use crate::types::{
    DailyHistory, DataSource, Fundamentals, Market, PriceSeries, Quote, RunReport, ScoreRecord,
    SkipReason, SymbolOutcome, SymbolStatus,
};

/// `<data_dir>/<MARKET>_rankings.csv`
pub fn rankings_path(data_dir: &Path, market: Market) -> PathBuf {
    data_dir.join(format!("{}_rankings.csv", market.key()))
}

/// Result of evaluating a universe
#[derive(Debug, Clone)]
pub struct ScreenOutcome {
    pub table: RankingTable,
    pub report: RunReport,
}

impl ScreenOutcome {
    /// Batch-level check: a run that scored nothing is a failed run
    pub fn ensure_scored(&self) -> EngineResult<()> {
        if !self.table.is_empty() {
            return Ok(());
        }
        let market = self.report.market;
        if self.report.all_fetches_failed() {
            Err(EngineError::NoPriceData {
                market,
                attempted: self.report.outcomes.len(),
            })
        } else {
            Err(EngineError::NoRecords {
                market,
                skipped: self.report.skipped(),
            })
        }
    }
}

/// Price a record is scored with, and where it came from
#[derive(Debug, Clone, Copy, PartialEq)]
struct ResolvedPrice {
    price: f64,
    source: DataSource,
    as_of: DateTime<Utc>,
}

/// Apply the freshness policy.
///
/// A quote no older than `max_quote_age` is LIVE. A stale quote is still the
/// most recent price known and is used as DELAYED; with no quote at all the
/// last daily close is used as DELAYED. `StalePolicy::Skip` drops both.
fn resolve_price(
    config: &ScreenerConfig,
    series: &PriceSeries,
    quote: Option<Quote>,
    now: DateTime<Utc>,
) -> Result<ResolvedPrice, SkipReason> {
    let policy = &config.freshness;

    if let Some(quote) = quote {
        // A quote stamped in the future is clock skew, not staleness
        let fresh = match (now - quote.as_of).to_std() {
            Ok(age) => age <= policy.max_quote_age,
            Err(_) => true,
        };
        if fresh {
            return Ok(ResolvedPrice {
                price: quote.price,
                source: DataSource::Live,
                as_of: quote.as_of,
            });
        }
        return match policy.on_stale {
            StalePolicy::Delayed => Ok(ResolvedPrice {
                price: quote.price,
                source: DataSource::Delayed,
                as_of: quote.as_of,
            }),
            StalePolicy::Skip => Err(SkipReason::StalePrice {
                detail: format!(
                    "latest quote from {} is older than {} minutes",
                    quote.as_of.to_rfc3339_opts(SecondsFormat::Secs, true),
                    policy.max_quote_age.as_secs() / 60
                ),
            }),
        };
    }

    match (policy.on_stale, series.last()) {
        (StalePolicy::Delayed, Some(last)) => Ok(ResolvedPrice {
            price: last.close,
            source: DataSource::Delayed,
            as_of: last.date.and_time(NaiveTime::MIN).and_utc(),
        }),
        (StalePolicy::Skip, _) => Err(SkipReason::StalePrice {
            detail: "no quote available".to_string(),
        }),
        (_, None) => Err(SkipReason::InvalidSeries {
            detail: "empty series".to_string(),
        }),
    }
}

fn skipped(symbol: &str, reason: SkipReason) -> (SymbolOutcome, Option<ScoreRecord>) {
    warn!(symbol, reason = reason.code(), detail = %reason.detail(), "Skipping symbol");
    (
        SymbolOutcome {
            symbol: symbol.to_string(),
            status: SymbolStatus::Skipped(reason),
        },
        None,
    )
}

/// Evaluate one symbol. Never fails: problems become a `SkipReason`.
pub async fn evaluate_symbol(
    config: &ScreenerConfig,
    provider: &dyn MarketDataProvider,
    symbol: &str,
    now: DateTime<Utc>,
) -> (SymbolOutcome, Option<ScoreRecord>) {
    let DailyHistory { series, quote } = match with_retry(&config.retry, symbol, || {
        provider.daily_history(symbol, config.lookback_days)
    })
    .await
    {
        Ok(history) => history,
        Err(e) => {
            return skipped(
                symbol,
                SkipReason::FetchFailed {
                    attempts: e.attempts,
                    error: e.source.to_string(),
                },
            )
        }
    };

    let required = config.indicators.required_history();
    if series.len() < required {
        return skipped(
            symbol,
            SkipReason::InsufficientHistory {
                observations: series.len(),
                required,
            },
        );
    }

    let snapshot = match compute_indicators(&series, &config.indicators) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            return skipped(
                symbol,
                SkipReason::InvalidSeries {
                    detail: e.to_string(),
                },
            )
        }
    };
    let (Some(rsi), Some(sma_50)) = (snapshot.rsi, snapshot.sma_50) else {
        return skipped(
            symbol,
            SkipReason::InsufficientHistory {
                observations: series.len(),
                required,
            },
        );
    };

    if quote.is_none() {
        debug!(symbol, "No quote in history response");
    }
    let resolved = match resolve_price(config, &series, quote, now) {
        Ok(resolved) => resolved,
        Err(reason) => return skipped(symbol, reason),
    };

    let alpha_score = if config.use_fundamentals {
        let fundamentals =
            match with_retry(&config.retry, symbol, || provider.fundamentals(symbol)).await {
                Ok(f) => f,
                Err(e) => {
                    warn!(symbol, error = %e, "Fundamentals unavailable, treating as unknown");
                    Fundamentals::default()
                }
            };
        score_with_fundamentals(resolved.price, &snapshot, &fundamentals, &config.rubric)
    } else {
        score(resolved.price, &snapshot, &config.rubric)
    };

    debug!(
        symbol,
        alpha_score,
        rsi,
        data_source = %resolved.source,
        "Scored symbol"
    );

    let record = ScoreRecord {
        ticker: symbol.to_string(),
        close: resolved.price,
        alpha_score,
        rsi,
        sma_50,
        data_source: resolved.source,
        as_of: resolved.as_of,
    };
    (
        SymbolOutcome {
            symbol: symbol.to_string(),
            status: SymbolStatus::Scored {
                alpha_score,
                data_source: resolved.source,
            },
        },
        Some(record),
    )
}

/// Evaluate every symbol of `universe` and rank the results.
///
/// Only configuration errors fail here; whether the run produced anything is
/// decided by `ScreenOutcome::ensure_scored`.
pub async fn run_screen(
    config: &ScreenerConfig,
    universe: &[String],
    provider: &dyn MarketDataProvider,
) -> EngineResult<ScreenOutcome> {
    config.validate()?;

    let started_at = Utc::now();
    let run_id = format!(
        "{}-{}-{:04x}",
        config.market.key(),
        started_at.format("%Y%m%dT%H%M%S%3fZ"),
        rand::random::<u16>()
    );

    info!(
        run_id = %run_id,
        market = %config.market,
        symbols = universe.len(),
        provider = provider.name(),
        concurrency = config.concurrency,
        "Starting screen"
    );

    let results: Vec<(SymbolOutcome, Option<ScoreRecord>)> = stream::iter(universe)
        .map(|symbol| evaluate_symbol(config, provider, symbol, started_at))
        .buffered(config.concurrency)
        .collect()
        .await;

    let mut outcomes = Vec::with_capacity(results.len());
    let mut records = Vec::new();
    for (outcome, record) in results {
        outcomes.push(outcome);
        records.extend(record);
    }

    let table = rank(records);
    let report = RunReport {
        run_id,
        market: config.market,
        started_at,
        finished_at: Utc::now(),
        lookback_days: config.lookback_days,
        fundamentals_enabled: config.use_fundamentals,
        outcomes,
    };

    info!(
        run_id = %report.run_id,
        market = %report.market,
        scored = report.scored(),
        skipped = report.skipped(),
        "Screen finished"
    );

    Ok(ScreenOutcome { table, report })
}

/// Write the rankings file and record the run.
///
/// A run that scored nothing leaves the previous file in place and returns
/// the batch error; it is still recorded as failed. Run history is best
/// effort: a database error is logged, never returned.
pub async fn publish(
    outcome: &ScreenOutcome,
    rankings_path: &Path,
    db: Option<&SqlitePool>,
) -> EngineResult<WrittenTable> {
    let result = match outcome.ensure_scored() {
        Ok(()) => write_rankings(rankings_path, &outcome.table.to_rows()).map_err(EngineError::from),
        Err(e) => Err(e),
    };

    match &result {
        Ok(written) => debug!(run_id = %outcome.report.run_id, digest = %written.digest, "Run published"),
        Err(e) => error!(run_id = %outcome.report.run_id, error = %e, "Run failed, rankings not written"),
    }

    if let Some(pool) = db {
        let (run, outcomes) = run_records(outcome, &result);
        if let Err(e) = RunRepository::new(pool).save_run(&run, &outcomes).await {
            warn!(run_id = %run.run_id, error = %e, "Failed to record run history");
        }
    }

    result
}

fn run_records(
    outcome: &ScreenOutcome,
    result: &EngineResult<WrittenTable>,
) -> (RunRecord, Vec<OutcomeRecord>) {
    let report = &outcome.report;
    let (status, written, error_message) = match result {
        Ok(written) => ("complete", Some(written), None),
        Err(e) => ("failed", None, Some(e.to_string())),
    };

    let run = RunRecord {
        id: None,
        run_id: report.run_id.clone(),
        market: report.market.key().to_string(),
        started_at: report.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        finished_at: report.finished_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        universe_size: report.outcomes.len() as i64,
        scored: report.scored() as i64,
        skipped: report.skipped() as i64,
        output_path: written.map(|w| w.path.display().to_string()),
        table_digest: written.map(|w| w.digest.clone()),
        status: status.to_string(),
        error_message,
        lookback_days: Some(i64::from(report.lookback_days)),
        fundamentals_enabled: report.fundamentals_enabled,
        created_at: None,
    };

    let outcomes = report
        .outcomes
        .iter()
        .enumerate()
        .map(|(position, o)| {
            let (status, reason, detail, alpha_score, data_source) = match &o.status {
                SymbolStatus::Scored {
                    alpha_score,
                    data_source,
                } => (
                    "scored",
                    None,
                    None,
                    Some(i64::from(*alpha_score)),
                    Some(data_source.as_str().to_string()),
                ),
                SymbolStatus::Skipped(reason) => (
                    "skipped",
                    Some(reason.code().to_string()),
                    Some(reason.detail()),
                    None,
                    None,
                ),
            };
            OutcomeRecord {
                id: None,
                run_id: report.run_id.clone(),
                position: position as i64,
                ticker: o.symbol.clone(),
                status: status.to_string(),
                reason,
                detail,
                alpha_score,
                data_source,
            }
        })
        .collect();

    (run, outcomes)
}

/// Daily histories for a universe, dropping symbols that fail to fetch.
/// Used by the backtest and the classifier, which need no quotes or fundamentals.
pub async fn fetch_histories(
    config: &ScreenerConfig,
    universe: &[String],
    provider: &dyn MarketDataProvider,
) -> EngineResult<Vec<PriceSeries>> {
    config.validate()?;

    let fetched: Vec<Option<PriceSeries>> = stream::iter(universe)
        .map(|symbol| async move {
            match with_retry(&config.retry, symbol, || {
                provider.daily_history(symbol, config.lookback_days)
            })
            .await
            {
                Ok(history) => Some(history.series),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Skipping symbol history");
                    None
                }
            }
        })
        .buffered(config.concurrency)
        .collect()
        .await;

    let histories: Vec<PriceSeries> = fetched.into_iter().flatten().collect();
    if histories.is_empty() {
        return Err(EngineError::NoPriceData {
            market: config.market,
            attempted: universe.len(),
        });
    }
    info!(market = %config.market, fetched = histories.len(), of = universe.len(), "Fetched histories");
    Ok(histories)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::error::ProviderError;
    use crate::types::PricePoint;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, NaiveDate};
    use persistence::{read_rankings, Database};
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;

    enum History {
        Series(PriceSeries),
        Status(u16),
    }

    #[derive(Default)]
    struct FakeProvider {
        histories: HashMap<String, History>,
        quotes: HashMap<String, Quote>,
    }

    impl FakeProvider {
        fn with_series(mut self, symbol: &str, closes: Vec<f64>) -> Self {
            self.histories
                .insert(symbol.to_string(), History::Series(series(symbol, closes)));
            self
        }

        fn with_status(mut self, symbol: &str, status: u16) -> Self {
            self.histories.insert(symbol.to_string(), History::Status(status));
            self
        }

        fn with_quote(mut self, symbol: &str, price: f64, as_of: DateTime<Utc>) -> Self {
            self.quotes.insert(symbol.to_string(), Quote { price, as_of });
            self
        }
    }

    #[async_trait]
    impl MarketDataProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn daily_history(&self, symbol: &str, _lookback_days: u32) -> Result<DailyHistory, ProviderError> {
            match self.histories.get(symbol) {
                Some(History::Series(s)) => Ok(DailyHistory {
                    series: s.clone(),
                    quote: self.quotes.get(symbol).copied(),
                }),
                Some(History::Status(code)) => Err(ProviderError::from_status(*code, symbol, String::new())),
                None => Err(ProviderError::NotFound(symbol.to_string())),
            }
        }

        async fn fundamentals(&self, _symbol: &str) -> Result<Fundamentals, ProviderError> {
            Ok(Fundamentals::default())
        }
    }

    fn series(symbol: &str, closes: Vec<f64>) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let points = closes
            .into_iter()
            .enumerate()
            .map(|(i, close)| PricePoint {
                date: start + ChronoDuration::days(i as i64),
                close,
            })
            .collect();
        PriceSeries::new(symbol, points).unwrap()
    }

    fn rising(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64).collect()
    }

    fn config(market: Market) -> ScreenerConfig {
        ScreenerConfig {
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..ScreenerConfig::for_market(market)
        }
    }

    fn universe(symbols: &[&str]) -> Vec<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_short_history_excluded() {
        let provider = FakeProvider::default()
            .with_series("LONG", rising(250))
            .with_series("SHORT", rising(10));

        let outcome = run_screen(&config(Market::Us), &universe(&["SHORT", "LONG"]), &provider)
            .await
            .unwrap();

        assert_eq!(outcome.table.len(), 1);
        assert_eq!(outcome.table.records()[0].ticker, "LONG");
        assert_eq!(
            outcome.report.outcomes[0].skip_reason(),
            Some(&SkipReason::InsufficientHistory {
                observations: 10,
                required: 200
            })
        );
        assert!(outcome.ensure_scored().is_ok());
    }

    #[tokio::test]
    async fn test_fresh_quote_is_live() {
        let now = Utc::now();
        let provider = FakeProvider::default()
            .with_series("AAPL", rising(250))
            .with_quote("AAPL", 351.0, now - ChronoDuration::minutes(5));

        let (outcome, record) = evaluate_symbol(&config(Market::Us), &provider, "AAPL", now).await;
        let record = record.unwrap();

        assert!(outcome.is_scored());
        assert_eq!(record.data_source, DataSource::Live);
        assert_eq!(record.close, 351.0);
        // rising: +10 above SMA 50, +10 trend, -20 overbought, +10 momentum
        assert_eq!(record.alpha_score, 60);
    }

    #[tokio::test]
    async fn test_stale_quote_is_delayed_with_its_timestamp() {
        let now = Utc::now();
        let quoted_at = now - ChronoDuration::hours(3);
        let provider = FakeProvider::default()
            .with_series("AAPL", rising(250))
            .with_quote("AAPL", 349.5, quoted_at);

        let (_, record) = evaluate_symbol(&config(Market::Us), &provider, "AAPL", now).await;
        let record = record.unwrap();

        assert_eq!(record.data_source, DataSource::Delayed);
        assert_eq!(record.close, 349.5);
        assert_eq!(record.as_of, quoted_at);
    }

    #[tokio::test]
    async fn test_missing_quote_uses_last_close() {
        let provider = FakeProvider::default().with_series("TCS.NS", vec![100.0; 200]);

        let (_, record) =
            evaluate_symbol(&config(Market::India), &provider, "TCS.NS", Utc::now()).await;
        let record = record.unwrap();

        assert_eq!(record.data_source, DataSource::Delayed);
        assert_eq!(record.close, 100.0);
        assert_eq!(record.alpha_score, 30);
        let last_date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + ChronoDuration::days(199);
        assert_eq!(record.as_of.date_naive(), last_date);
    }

    #[tokio::test]
    async fn test_skip_policy_drops_stale_symbols() {
        let mut cfg = config(Market::Us);
        cfg.freshness.on_stale = StalePolicy::Skip;
        let now = Utc::now();
        let provider = FakeProvider::default()
            .with_series("AAPL", rising(250))
            .with_series("MSFT", rising(250))
            .with_quote("MSFT", 360.0, now - ChronoDuration::minutes(1));

        let outcome = run_screen(&cfg, &universe(&["AAPL", "MSFT"]), &provider)
            .await
            .unwrap();

        assert_eq!(outcome.table.len(), 1);
        assert_eq!(outcome.table.records()[0].ticker, "MSFT");
        assert!(matches!(
            outcome.report.outcomes[0].skip_reason(),
            Some(SkipReason::StalePrice { .. })
        ));
    }

    #[tokio::test]
    async fn test_equal_scores_keep_universe_order() {
        let provider = FakeProvider::default()
            .with_series("C", vec![100.0; 200])
            .with_series("A", vec![100.0; 200])
            .with_series("UP", rising(250))
            .with_series("B", vec![100.0; 200]);

        let outcome = run_screen(&config(Market::Us), &universe(&["C", "A", "UP", "B"]), &provider)
            .await
            .unwrap();

        let order: Vec<_> = outcome.table.records().iter().map(|r| r.ticker.as_str()).collect();
        assert_eq!(order, vec!["UP", "C", "A", "B"]);
    }

    #[tokio::test]
    async fn test_all_fetches_failed_keeps_previous_file() {
        let dir = TempDir::new().unwrap();
        let path = rankings_path(dir.path(), Market::Us);
        let db = Database::in_memory().await.unwrap();

        let good = FakeProvider::default().with_series("AAPL", rising(250));
        let first = run_screen(&config(Market::Us), &universe(&["AAPL"]), &good)
            .await
            .unwrap();
        let written = publish(&first, &path, Some(db.pool())).await.unwrap();
        assert_eq!(written.rows, 1);

        let broken = FakeProvider::default()
            .with_status("AAPL", 503)
            .with_status("MSFT", 429);
        let second = run_screen(&config(Market::Us), &universe(&["AAPL", "MSFT"]), &broken)
            .await
            .unwrap();
        let err = publish(&second, &path, Some(db.pool())).await.unwrap_err();
        assert!(matches!(err, EngineError::NoPriceData { attempted: 2, .. }));

        let rows = read_rankings(&path).unwrap().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ticker, "AAPL");

        let repo = RunRepository::new(db.pool());
        let runs = repo.recent_runs(Some("US"), 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        let failed = runs.iter().find(|r| r.status == "failed").unwrap();
        assert_eq!(failed.skipped, 2);
        assert!(failed.output_path.is_none());
        let complete = runs.iter().find(|r| r.status == "complete").unwrap();
        assert_eq!(complete.table_digest.as_deref(), Some(written.digest.as_str()));

        let outcomes = repo.outcomes_for_run(&failed.run_id).await.unwrap();
        assert_eq!(outcomes[0].reason.as_deref(), Some("fetch_failed"));
    }

    #[tokio::test]
    async fn test_nothing_scored_is_no_records() {
        let provider = FakeProvider::default().with_series("NEW", rising(10));
        let outcome = run_screen(&config(Market::India), &universe(&["NEW"]), &provider)
            .await
            .unwrap();
        assert!(matches!(
            outcome.ensure_scored(),
            Err(EngineError::NoRecords { skipped: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_histories_drops_failures() {
        let provider = FakeProvider::default()
            .with_series("AAPL", rising(250))
            .with_status("GONE", 404);
        let histories = fetch_histories(&config(Market::Us), &universe(&["AAPL", "GONE"]), &provider)
            .await
            .unwrap();
        assert_eq!(histories.len(), 1);
        assert_eq!(histories[0].symbol(), "AAPL");
    }
}
