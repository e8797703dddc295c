//! Ticker universe per market
//!
//! Symbols come from a `TickerSource`, retried like any other provider call.
//! When the source still fails or returns nothing, a static list of large
//! caps is used instead. Everything is normalized to the provider's symbol
//! conventions.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{RetryPolicy, ScreenerConfig};
use crate::error::{EngineError, EngineResult, ProviderError};
use crate::retry::with_retry;
use crate::types::Market;

/// Upstream list of index constituents
#[async_trait]
pub trait TickerSource: Send + Sync {
    async fn fetch_tickers(&self, market: Market) -> Result<Vec<String>, ProviderError>;
}

const INDIA_FALLBACK: &[&str] = &[
    "RELIANCE.NS",
    "TCS.NS",
    "HDFCBANK.NS",
    "ICICIBANK.NS",
    "INFY.NS",
    "SBIN.NS",
    "BHARTIARTL.NS",
    "ITC.NS",
    "KOTAKBANK.NS",
    "LICI.NS",
    "HINDUNILVR.NS",
    "LT.NS",
    "AXISBANK.NS",
    "BAJFINANCE.NS",
    "MARUTI.NS",
    "ASIANPAINT.NS",
    "HCLTECH.NS",
    "TITAN.NS",
    "SUNPHARMA.NS",
    "TATASTEEL.NS",
];

const US_FALLBACK: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "TSLA", "META", "BRK-B", "JPM",
];

pub fn fallback_tickers(market: Market) -> Vec<String> {
    let list = match market {
        Market::India => INDIA_FALLBACK,
        Market::Us => US_FALLBACK,
    };
    list.iter().map(|s| s.to_string()).collect()
}

/// Provider form of a symbol: NSE names get `.NS`, US share classes use `-`
pub fn normalize_symbol(market: Market, raw: &str) -> Option<String> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() {
        return None;
    }
    Some(match market {
        Market::India if symbol.contains('.') => symbol,
        Market::India => format!("{symbol}.NS"),
        Market::Us => symbol.replace('.', "-"),
    })
}

/// Normalize and drop blanks and duplicates, keeping first-seen order
pub fn normalize_universe<S: AsRef<str>>(market: Market, raw: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for symbol in raw.iter().filter_map(|s| normalize_symbol(market, s.as_ref())) {
        if !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    out
}

/// Ticker list for `market`. Transient failures are retried under `retry`;
/// the static list is used once the source gives up.
pub async fn get_tickers(
    source: &dyn TickerSource,
    market: Market,
    retry: &RetryPolicy,
) -> Vec<String> {
    match with_retry(retry, market.key(), move || source.fetch_tickers(market)).await {
        Ok(raw) => {
            let tickers = normalize_universe(market, &raw);
            if tickers.is_empty() {
                warn!(%market, "Ticker source returned no symbols, using fallback list");
                return fallback_tickers(market);
            }
            info!(%market, count = tickers.len(), index = market.index_name(), "Fetched ticker list");
            tickers
        }
        Err(e) => {
            warn!(%market, attempts = e.attempts, error = %e.source, "Ticker source failed, using fallback list");
            fallback_tickers(market)
        }
    }
}

/// Universe for a run: the explicit symbol list if configured, otherwise the
/// source's list, truncated to `max_symbols`
pub async fn resolve_universe(
    config: &ScreenerConfig,
    source: &dyn TickerSource,
) -> EngineResult<Vec<String>> {
    let mut universe = match &config.symbols {
        Some(symbols) => normalize_universe(config.market, symbols),
        None => get_tickers(source, config.market, &config.retry).await,
    };

    if let Some(max) = config.max_symbols {
        universe.truncate(max);
    }
    if universe.is_empty() {
        return Err(EngineError::NoTickers(config.market));
    }
    Ok(universe)
}
