//! AlphaQuant: daily stock screener for the Nifty 50 and S&P 500
//!
//! Usage:
//!   alphaquant screen --market IN  # Score the universe and write IN_rankings.csv
//!   alphaquant backtest --market US  # Write US_backtest_curve.csv
//!   alphaquant train --market IN  # Fit the classifier and write IN_ml_signals.csv
//!   alphaquant show --market IN  # Print the current rankings file
//!   alphaquant runs --ticker TCS.NS  # Why a ticker keeps getting skipped
//!   alphaquant serve --port 3002  # Read-only JSON API over rankings, curves, signals and runs

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use clap::{Parser, Subcommand};
use engine::{
    curve_path, fetch_histories, get_tickers, publish, rankings_path, resolve_universe,
    run_backtest, run_screen, signals_path, train_and_predict, BacktestConfig,
    ConstituentsClient, Market, ModelConfig, ScoreRecord, ScreenerConfig, StalePolicy,
    YahooClient,
};
use persistence::repository::RunRepository;
use persistence::{
    read_curve, read_rankings, read_signals, write_curve, write_signals, CurveRow, Database,
    RankingRow, SignalRow,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser)]
#[command(name = "alphaquant")]
#[command(about = "Daily stock screener: RSI/SMA indicators, Alpha Score ranking, backtest", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the rankings and backtest files (env: ALPHAQUANT_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Screen a market and write its rankings file
    Screen {
        /// Market: IN (Nifty 50) or US (S&P 500)
        #[arg(short, long, default_value = "IN")]
        market: String,
        /// Explicit symbols (comma-separated), bypassing the index list
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        /// Keep only the first N symbols of the universe
        #[arg(long)]
        max_symbols: Option<usize>,
        /// Calendar days of history to fetch
        #[arg(long, default_value_t = 730)]
        lookback_days: u32,
        /// Symbols evaluated at once (env: ALPHAQUANT_CONCURRENCY)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Oldest quote still tagged LIVE, in minutes (env: ALPHAQUANT_MAX_QUOTE_AGE_MINS)
        #[arg(long)]
        max_quote_age_mins: Option<u64>,
        /// Drop symbols without a fresh quote instead of scoring them DELAYED
        #[arg(long)]
        skip_stale: bool,
        /// Fetch fundamentals and add their adjustment to the score
        #[arg(long)]
        fundamentals: bool,
        /// Rows to print
        #[arg(long, default_value_t = 10)]
        top: usize,
        /// Do not record the run in the history database
        #[arg(long)]
        no_history: bool,
    },
    /// Backtest the RSI dip-in-uptrend signal and write the equity curve
    Backtest {
        #[arg(short, long, default_value = "IN")]
        market: String,
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        #[arg(long)]
        max_symbols: Option<usize>,
        #[arg(long, default_value_t = 730)]
        lookback_days: u32,
        /// Forward return horizon in trading days
        #[arg(long, default_value_t = 21)]
        holding_days: usize,
        /// Enter when RSI is below this
        #[arg(long, default_value_t = 30.0)]
        rsi_entry: f64,
    },
    /// Fit the direction classifier and write ML_Confidence per ticker
    Train {
        #[arg(short, long, default_value = "IN")]
        market: String,
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        #[arg(long)]
        max_symbols: Option<usize>,
        #[arg(long, default_value_t = 730)]
        lookback_days: u32,
        /// Label horizon in trading days
        #[arg(long, default_value_t = 10)]
        horizon: usize,
        /// Rows to print
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Print the ticker universe for a market
    Tickers {
        #[arg(short, long, default_value = "IN")]
        market: String,
    },
    /// Print the current rankings file
    Show {
        #[arg(short, long, default_value = "IN")]
        market: String,
        #[arg(long, default_value_t = 20)]
        top: usize,
    },
    /// List recorded screening runs, or the outcomes of one run
    Runs {
        #[arg(short, long)]
        market: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: i64,
        /// Show per-symbol outcomes of this run
        #[arg(long)]
        run_id: Option<String>,
        /// Count skip reasons for this ticker across the last `limit` runs
        #[arg(long, conflicts_with = "run_id")]
        ticker: Option<String>,
    },
    /// Launch the read-only JSON API
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3002)]
        port: u16,
    },
}

/// Settings from the environment (`.env` honoured); CLI flags win
struct Settings {
    data_dir: PathBuf,
    db_path: PathBuf,
    yahoo_url: Option<String>,
    concurrency: Option<usize>,
    max_quote_age_mins: Option<u64>,
}

impl Settings {
    fn from_env(data_dir_flag: Option<PathBuf>) -> Self {
        let data_dir = data_dir_flag
            .or_else(|| std::env::var("ALPHAQUANT_DATA_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("data"));
        let db_path = std::env::var("ALPHAQUANT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("alphaquant.db"));

        Self {
            data_dir,
            db_path,
            yahoo_url: std::env::var("ALPHAQUANT_YAHOO_URL").ok(),
            concurrency: env_parse("ALPHAQUANT_CONCURRENCY"),
            max_quote_age_mins: env_parse("ALPHAQUANT_MAX_QUOTE_AGE_MINS"),
        }
    }

    fn yahoo(&self, timeout: Duration) -> anyhow::Result<YahooClient> {
        let client = match &self.yahoo_url {
            Some(url) => YahooClient::with_base_url(url, timeout)?,
            None => YahooClient::new(timeout)?,
        };
        Ok(client)
    }

    async fn open_db(&self) -> anyhow::Result<Database> {
        Database::new(&self.db_path)
            .await
            .map_err(|e| anyhow::anyhow!("Database initialization failed: {}", e))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,alphaquant=debug")
    } else {
        EnvFilter::new("info,engine=info,alphaquant=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    let settings = Settings::from_env(cli.data_dir);

    match cli.command {
        Commands::Screen {
            market,
            symbols,
            max_symbols,
            lookback_days,
            concurrency,
            max_quote_age_mins,
            skip_stale,
            fundamentals,
            top,
            no_history,
        } => {
            let mut config = ScreenerConfig::for_market(market.parse()?);
            config.lookback_days = lookback_days;
            config.symbols = (!symbols.is_empty()).then_some(symbols);
            config.max_symbols = max_symbols;
            if let Some(concurrency) = concurrency.or(settings.concurrency) {
                config.concurrency = concurrency;
            }
            if let Some(mins) = max_quote_age_mins.or(settings.max_quote_age_mins) {
                config.freshness.max_quote_age = Duration::from_secs(mins * 60);
            }
            if skip_stale {
                config.freshness.on_stale = StalePolicy::Skip;
            }
            config.use_fundamentals = fundamentals;

            cmd_screen(&settings, config, top, !no_history).await?;
        }
        Commands::Backtest {
            market,
            symbols,
            max_symbols,
            lookback_days,
            holding_days,
            rsi_entry,
        } => {
            let mut config = ScreenerConfig::for_market(market.parse()?);
            config.lookback_days = lookback_days;
            config.symbols = (!symbols.is_empty()).then_some(symbols);
            config.max_symbols = max_symbols;
            if let Some(concurrency) = settings.concurrency {
                config.concurrency = concurrency;
            }
            let backtest = BacktestConfig {
                indicators: config.indicators,
                rsi_entry,
                holding_days,
            };

            cmd_backtest(&settings, config, backtest).await?;
        }
        Commands::Train {
            market,
            symbols,
            max_symbols,
            lookback_days,
            horizon,
            top,
        } => {
            let mut config = ScreenerConfig::for_market(market.parse()?);
            config.lookback_days = lookback_days;
            config.symbols = (!symbols.is_empty()).then_some(symbols);
            config.max_symbols = max_symbols;
            if let Some(concurrency) = settings.concurrency {
                config.concurrency = concurrency;
            }
            let model = ModelConfig {
                indicators: config.indicators,
                horizon,
                ..ModelConfig::default()
            };

            cmd_train(&settings, config, model, top).await?;
        }
        Commands::Tickers { market } => {
            cmd_tickers(market.parse()?).await?;
        }
        Commands::Show { market, top } => {
            cmd_show(&settings, market.parse()?, top)?;
        }
        Commands::Runs {
            market,
            limit,
            run_id,
            ticker,
        } => {
            let market = market.map(|m| m.parse::<Market>()).transpose()?;
            match ticker {
                Some(ticker) => cmd_skip_counts(&settings, &ticker, limit).await?,
                None => cmd_runs(&settings, market, limit, run_id).await?,
            }
        }
        Commands::Serve { host, port } => {
            cmd_serve(settings, &host, port).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Screen command
// ============================================================================

async fn cmd_screen(
    settings: &Settings,
    config: ScreenerConfig,
    top: usize,
    record_history: bool,
) -> anyhow::Result<()> {
    config.validate()?;
    let market = config.market;

    println!("\n=== AlphaQuant v{} ===", APP_VERSION);
    println!(
        "Market: {} ({}) | Lookback: {} days | Concurrency: {} | Fundamentals: {}",
        market,
        market.index_name(),
        config.lookback_days,
        config.concurrency,
        if config.use_fundamentals { "on" } else { "off" }
    );

    let constituents = ConstituentsClient::new(config.request_timeout)?;
    let universe = resolve_universe(&config, &constituents).await?;
    println!("Universe: {} symbols\n", universe.len());

    let yahoo = settings.yahoo(config.request_timeout)?;
    let outcome = run_screen(&config, &universe, &yahoo).await?;

    // Run history is best effort; a broken database must not block the rankings
    let db = if record_history {
        match settings.open_db().await {
            Ok(db) => Some(db),
            Err(e) => {
                warn!("Run history disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let path = rankings_path(&settings.data_dir, market);
    let published = publish(&outcome, &path, db.as_ref().map(|d| d.pool())).await;

    let skipped: Vec<_> = outcome
        .report
        .outcomes
        .iter()
        .filter_map(|o| o.skip_reason().map(|r| (o.symbol.as_str(), r)))
        .collect();
    if !skipped.is_empty() {
        println!("Skipped {} symbol(s):", skipped.len());
        for (symbol, reason) in &skipped {
            println!("  {:<16} {:<22} {}", symbol, reason.code(), reason.detail());
        }
        println!();
    }

    let written = published?;
    print_records(outcome.table.top(top), market);
    println!(
        "\nRun {}: {} scored, {} skipped",
        outcome.report.run_id,
        outcome.report.scored(),
        outcome.report.skipped()
    );
    println!("Rankings written to {} (sha256 {})", written.path.display(), written.digest);

    Ok(())
}

fn print_records(records: &[ScoreRecord], market: Market) {
    println!("Top {} ({}):", records.len(), market.currency());
    println!(
        "  {:>3}  {:<16} {:>10} {:>6} {:>7} {:>10}  {:<8} {}",
        "#", "Ticker", "Close", "Score", "RSI", "SMA 50", "Source", "As of"
    );
    println!("  {}", "-".repeat(86));
    for (i, r) in records.iter().enumerate() {
        println!(
            "  {:>3}  {:<16} {:>10.2} {:>6} {:>7.2} {:>10.2}  {:<8} {}",
            i + 1,
            r.ticker,
            r.close,
            r.alpha_score,
            r.rsi,
            r.sma_50,
            r.data_source.as_str(),
            r.as_of.format("%Y-%m-%d %H:%M UTC"),
        );
    }
}

// ============================================================================
// Backtest command
// ============================================================================

async fn cmd_backtest(
    settings: &Settings,
    config: ScreenerConfig,
    backtest: BacktestConfig,
) -> anyhow::Result<()> {
    config.validate()?;
    backtest.validate()?;
    let market = config.market;

    println!("\n=== AlphaQuant v{}: Backtest ===", APP_VERSION);
    println!(
        "Market: {} | Signal: RSI < {} and close > SMA {} | Holding: {} days",
        market, backtest.rsi_entry, backtest.indicators.long_sma, backtest.holding_days
    );

    let constituents = ConstituentsClient::new(config.request_timeout)?;
    let universe = resolve_universe(&config, &constituents).await?;
    let yahoo = settings.yahoo(config.request_timeout)?;
    let histories = fetch_histories(&config, &universe, &yahoo).await?;

    let curve = run_backtest(&histories, &backtest)?;
    let path = curve_path(&settings.data_dir, market);
    write_curve(&path, &curve.points)?;

    println!("Symbols: {} of {}", histories.len(), universe.len());
    println!("Trading days: {} | Signals: {}", curve.points.len(), curve.signals);
    println!("Total strategy return: {:.2}%", curve.total_strategy_return() * 100.0);
    println!("Total market return:   {:.2}%", curve.total_market_return() * 100.0);
    println!("Curve written to {}", path.display());

    Ok(())
}

// ============================================================================
// Train command
// ============================================================================

async fn cmd_train(
    settings: &Settings,
    config: ScreenerConfig,
    model: ModelConfig,
    top: usize,
) -> anyhow::Result<()> {
    config.validate()?;
    model.validate()?;
    let market = config.market;

    println!("\n=== AlphaQuant v{}: Classifier ===", APP_VERSION);
    println!(
        "Market: {} | Features: RSI, Return_1M, SMA {}, SMA {} | Label: up after {} days",
        market, model.indicators.short_sma, model.indicators.long_sma, model.horizon
    );

    let constituents = ConstituentsClient::new(config.request_timeout)?;
    let universe = resolve_universe(&config, &constituents).await?;
    let yahoo = settings.yahoo(config.request_timeout)?;
    let histories = fetch_histories(&config, &universe, &yahoo).await?;

    let report = train_and_predict(&histories, &model)?;
    let path = signals_path(&settings.data_dir, market);
    write_signals(&path, &report.signals)?;

    println!("Symbols: {} of {}", histories.len(), universe.len());
    println!(
        "Samples: {} train / {} test | Test accuracy: {:.2}%",
        report.train_samples,
        report.test_samples,
        report.accuracy * 100.0
    );
    print_signals(&report.signals[..top.min(report.signals.len())], market);
    println!("\nSignals written to {}", path.display());

    Ok(())
}

fn print_signals(rows: &[SignalRow], market: Market) {
    println!("\nTop {} ({}):", rows.len(), market.currency());
    println!(
        "  {:>3}  {:<16} {:>7} {:>8} {:>10} {:>7}  {}",
        "#", "Ticker", "Conf.", "Factor", "Close", "RSI", "As of"
    );
    println!("  {}", "-".repeat(70));
    for (i, row) in rows.iter().enumerate() {
        println!(
            "  {:>3}  {:<16} {:>6.1}% {:>8.2} {:>10.2} {:>7.2}  {}",
            i + 1,
            row.ticker,
            row.ml_confidence * 100.0,
            row.factor_score,
            row.close,
            row.rsi,
            row.as_of,
        );
    }
}

// ============================================================================
// Read-only commands
// ============================================================================

async fn cmd_tickers(market: Market) -> anyhow::Result<()> {
    let config = ScreenerConfig::for_market(market);
    let constituents = ConstituentsClient::new(config.request_timeout)?;
    let tickers = get_tickers(&constituents, market, &config.retry).await;
    println!("{} ({}): {} symbols", market, market.index_name(), tickers.len());
    for ticker in &tickers {
        println!("  {}", ticker);
    }
    Ok(())
}

fn cmd_show(settings: &Settings, market: Market, top: usize) -> anyhow::Result<()> {
    let path = rankings_path(&settings.data_dir, market);
    let Some(rows) = read_rankings(&path)? else {
        println!(
            "No rankings yet for {} ({} not found). Run `alphaquant screen --market {}` first.",
            market,
            path.display(),
            market
        );
        return Ok(());
    };

    println!("{} rankings from {}:", market, path.display());
    println!(
        "  {:>3}  {:<16} {:>10} {:>6} {:>7} {:>10}  {:<8} {}",
        "#", "Ticker", "Close", "Score", "RSI", "SMA 50", "Source", "Last updated"
    );
    println!("  {}", "-".repeat(86));
    for (i, row) in rows.iter().take(top).enumerate() {
        println!(
            "  {:>3}  {:<16} {:>10} {:>6} {:>7} {:>10}  {:<8} {}",
            i + 1,
            row.ticker,
            fmt_opt(row.close),
            row.alpha_score.map_or("-".to_string(), |s| s.to_string()),
            fmt_opt(row.rsi),
            fmt_opt(row.sma_50),
            row.data_source.as_deref().unwrap_or("-"),
            row.last_updated.as_deref().unwrap_or("-"),
        );
    }

    if let Some(pick) = read_signals(&signals_path(&settings.data_dir, market))?
        .and_then(|signals| signals.into_iter().next())
    {
        println!(
            "\nTop pick ({}): {} at {:.1}% confidence (features as of {})",
            market,
            pick.ticker,
            pick.ml_confidence * 100.0,
            pick.as_of
        );
    }
    Ok(())
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or("-".to_string(), |v| format!("{:.2}", v))
}

async fn cmd_runs(
    settings: &Settings,
    market: Option<Market>,
    limit: i64,
    run_id: Option<String>,
) -> anyhow::Result<()> {
    let db = settings.open_db().await?;
    let repo = RunRepository::new(db.pool());

    if let Some(run_id) = run_id {
        let Some(run) = repo.get_run(&run_id).await? else {
            anyhow::bail!("No run with id {}", run_id);
        };
        println!(
            "Run {} [{}] {}: {} scored, {} skipped",
            run.run_id, run.market, run.status, run.scored, run.skipped
        );
        if let Some(err) = &run.error_message {
            println!("  Error: {}", err);
        }
        for o in repo.outcomes_for_run(&run_id).await? {
            println!(
                "  {:>3}  {:<16} {:<8} {:>5}  {}",
                o.position + 1,
                o.ticker,
                o.status,
                o.alpha_score.map_or("-".to_string(), |s| s.to_string()),
                o.reason.or(o.data_source).unwrap_or_default(),
            );
        }
        return Ok(());
    }

    let runs = repo
        .recent_runs(market.as_ref().map(|m| m.key()), limit)
        .await?;
    if runs.is_empty() {
        println!("No runs recorded in {}", settings.db_path.display());
        return Ok(());
    }
    println!(
        "  {:<32} {:<6} {:<9} {:>7} {:>7}  {}",
        "Run", "Market", "Status", "Scored", "Skipped", "Started"
    );
    println!("  {}", "-".repeat(90));
    for run in runs {
        println!(
            "  {:<32} {:<6} {:<9} {:>7} {:>7}  {}",
            run.run_id, run.market, run.status, run.scored, run.skipped, run.started_at
        );
    }
    Ok(())
}

async fn cmd_skip_counts(settings: &Settings, ticker: &str, runs: i64) -> anyhow::Result<()> {
    let db = settings.open_db().await?;
    let repo = RunRepository::new(db.pool());
    let ticker = ticker.trim().to_uppercase();

    let counts = repo.skip_counts(&ticker, runs).await?;
    if counts.is_empty() {
        println!("{} was not skipped in the last {} run(s)", ticker, runs);
        return Ok(());
    }
    println!("{} skips in the last {} run(s):", ticker, runs);
    for (reason, count) in counts {
        println!("  {:<22} {:>4}", reason, count);
    }
    Ok(())
}

// ============================================================================
// Serve command: Axum read-only API
// ============================================================================

#[derive(Clone)]
struct AppState {
    data_dir: Arc<PathBuf>,
    db: Arc<Database>,
}

async fn cmd_serve(settings: Settings, host: &str, port: u16) -> anyhow::Result<()> {
    info!("AlphaQuant v{} starting...", APP_VERSION);

    let db = settings.open_db().await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        e
    })?;
    info!("Database initialized: {}", settings.db_path.display());

    let state = AppState {
        data_dir: Arc::new(settings.data_dir.clone()),
        db: Arc::new(db),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/rankings/:market", get(api_rankings))
        .route("/backtest/:market", get(api_backtest))
        .route("/signals/:market", get(api_signals))
        .route("/runs", get(api_runs))
        .route("/runs/:run_id", get(api_run_detail))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== AlphaQuant v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health              - Health check");
    println!("  GET  /api/rankings/:market    - Current rankings (IN, US)");
    println!("  GET  /api/backtest/:market    - Equity curve and headline returns");
    println!("  GET  /api/signals/:market     - Classifier confidence per ticker");
    println!("  GET  /api/runs                - Recent screening runs");
    println!("  GET  /api/runs/:run_id        - One run with per-symbol outcomes");
    println!("\n  Data dir: {}", settings.data_dir.display());
    println!("  Database: {}", settings.db_path.display());
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: String) -> ApiResponse {
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": message,
        })),
    )
}

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "alphaquant",
        "version": APP_VERSION,
    }))
}

/// GET /api/rankings/:market: the rankings file as JSON; "no_data" before the first run
async fn api_rankings(
    State(state): State<AppState>,
    AxumPath(market): AxumPath<String>,
) -> ApiResponse {
    let market: Market = match market.parse() {
        Ok(m) => m,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let path = rankings_path(&state.data_dir, market);
    let rows: Option<Vec<RankingRow>> = match read_rankings(&path) {
        Ok(rows) => rows,
        Err(e) => {
            error!("Failed to read {}: {}", path.display(), e);
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    match rows {
        Some(rows) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "status": "ok",
                "market": market,
                "index": market.index_name(),
                "total": rows.len(),
                "data": rows,
            })),
        ),
        None => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "status": "no_data",
                "market": market,
                "index": market.index_name(),
                "total": 0,
                "data": [],
            })),
        ),
    }
}

/// Final cumulative returns and alpha over the curve points
fn backtest_body(market: Market, points: Option<Vec<CurveRow>>) -> serde_json::Value {
    let points = points.unwrap_or_default();
    let Some(last) = points.last() else {
        return serde_json::json!({
            "success": true,
            "status": "no_data",
            "market": market,
            "total": 0,
            "data": [],
        });
    };

    serde_json::json!({
        "success": true,
        "status": "ok",
        "market": market,
        "strategy_cumulative": last.strategy_cumulative,
        "market_cumulative": last.market_cumulative,
        "alpha": last.strategy_cumulative - last.market_cumulative,
        "total": points.len(),
        "data": points,
    })
}

/// GET /api/backtest/:market: the backtest curve; "no_data" before the first backtest
async fn api_backtest(
    State(state): State<AppState>,
    AxumPath(market): AxumPath<String>,
) -> ApiResponse {
    let market: Market = match market.parse() {
        Ok(m) => m,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let path = curve_path(&state.data_dir, market);
    match read_curve(&path) {
        Ok(points) => (StatusCode::OK, Json(backtest_body(market, points))),
        Err(e) => {
            error!("Failed to read {}: {}", path.display(), e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /api/signals/:market: classifier output, highest confidence first
async fn api_signals(
    State(state): State<AppState>,
    AxumPath(market): AxumPath<String>,
) -> ApiResponse {
    let market: Market = match market.parse() {
        Ok(m) => m,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let path = signals_path(&state.data_dir, market);
    let rows = match read_signals(&path) {
        Ok(rows) => rows.unwrap_or_default(),
        Err(e) => {
            error!("Failed to read {}: {}", path.display(), e);
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let status = if rows.is_empty() { "no_data" } else { "ok" };
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "status": status,
            "market": market,
            "top_pick": rows.first().map(|r| &r.ticker),
            "total": rows.len(),
            "data": rows,
        })),
    )
}

#[derive(Deserialize)]
struct RunsQuery {
    market: Option<String>,
    limit: Option<i64>,
}

/// GET /api/runs: recent runs, optionally for one market
async fn api_runs(State(state): State<AppState>, Query(params): Query<RunsQuery>) -> ApiResponse {
    let market = match params.market.as_deref().map(str::parse::<Market>).transpose() {
        Ok(m) => m,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let limit = params.limit.unwrap_or(20).clamp(1, 200);

    let repo = RunRepository::new(state.db.pool());
    match repo.recent_runs(market.as_ref().map(|m| m.key()), limit).await {
        Ok(runs) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "data": runs,
                "total": runs.len(),
            })),
        ),
        Err(e) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to query runs: {}", e),
        ),
    }
}

/// GET /api/runs/:run_id: one run and its per-symbol outcomes
async fn api_run_detail(
    State(state): State<AppState>,
    AxumPath(run_id): AxumPath<String>,
) -> ApiResponse {
    let repo = RunRepository::new(state.db.pool());
    let run = match repo.get_run(&run_id).await {
        Ok(Some(run)) => run,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, format!("No run with id {}", run_id)),
        Err(e) => {
            return api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to query run: {}", e),
            )
        }
    };

    match repo.outcomes_for_run(&run_id).await {
        Ok(outcomes) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "run": run,
                "outcomes": outcomes,
            })),
        ),
        Err(e) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to query outcomes: {}", e),
        ),
    }
}
