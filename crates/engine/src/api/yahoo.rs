//! Yahoo Finance client (public chart and quoteSummary endpoints)
//!
//! Responses are normalized here into `DailyHistory` and `Fundamentals`; a
//! response missing the fields we need is an error, never a best-effort
//! guess. The quote rides along with the history request, so each symbol
//! costs one chart call.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use reqwest::header::USER_AGENT;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::random_user_agent;
use crate::error::ProviderError;
use crate::provider::MarketDataProvider;
use crate::types::{DailyHistory, Fundamentals, PricePoint, PriceSeries, Quote};

pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Yahoo Finance market data client
#[derive(Clone)]
pub struct YahooClient {
    client: Client,
    base_url: String,
}

// ---------------------------------------------------------------------------
// Deserialization structs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    regular_market_time: Option<i64>,
    /// Exchange offset from UTC in seconds
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<QuoteBlock>,
    #[serde(default)]
    adjclose: Vec<AdjCloseBlock>,
}

#[derive(Debug, Deserialize)]
struct QuoteBlock {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseBlock {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryEnvelope {
    quote_summary: SummaryBody,
}

#[derive(Debug, Deserialize)]
struct SummaryBody {
    result: Option<Vec<SummaryResult>>,
    error: Option<ApiError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResult {
    #[serde(default)]
    summary_detail: SummaryDetail,
    #[serde(default)]
    default_key_statistics: KeyStatistics,
    #[serde(default)]
    financial_data: FinancialData,
}

/// Yahoo wraps numbers as `{ "raw": 12.3, "fmt": "12.30" }`, or `{}` when unknown
#[derive(Debug, Default, Deserialize)]
struct RawValue {
    raw: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryDetail {
    #[serde(rename = "trailingPE")]
    trailing_pe: Option<RawValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyStatistics {
    enterprise_to_ebitda: Option<RawValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinancialData {
    profit_margins: Option<RawValue>,
    return_on_equity: Option<RawValue>,
    /// Reported in percent (150.0 = 1.5x)
    debt_to_equity: Option<RawValue>,
}

fn raw(value: &Option<RawValue>) -> Option<f64> {
    value.as_ref().and_then(|v| v.raw).filter(|v| v.is_finite())
}

fn api_error(symbol: &str, err: ApiError) -> ProviderError {
    if err.code.eq_ignore_ascii_case("Not Found") {
        ProviderError::NotFound(symbol.to_string())
    } else {
        ProviderError::Malformed(format!(
            "{}: {}",
            err.code,
            err.description.unwrap_or_default()
        ))
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn first_chart_result(symbol: &str, envelope: ChartEnvelope) -> Result<ChartResult, ProviderError> {
    if let Some(err) = envelope.chart.error {
        return Err(api_error(symbol, err));
    }
    envelope
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| ProviderError::Empty(symbol.to_string()))
}

/// Latest bar's adjusted/raw ratio: the factor that puts a raw price on the
/// basis of the adjusted closes
fn adjustment_factor(raw: &[Option<f64>], adjusted: &[Option<f64>]) -> Option<f64> {
    if raw.len() != adjusted.len() {
        return None;
    }
    raw.iter()
        .zip(adjusted)
        .rev()
        .find_map(|pair| match pair {
            (Some(r), Some(a)) if r.is_finite() && a.is_finite() && *r > 0.0 && *a > 0.0 => {
                Some(a / r)
            }
            _ => None,
        })
}

fn meta_quote(meta: &ChartMeta) -> Option<Quote> {
    let price = meta.regular_market_price.filter(|p| p.is_finite() && *p > 0.0)?;
    let as_of = meta
        .regular_market_time
        .and_then(|t| DateTime::from_timestamp(t, 0))?;
    Some(Quote { price, as_of })
}

/// Build a daily history from a chart response.
///
/// Adjusted closes are preferred over raw closes. Null bars are dropped, bar
/// timestamps are shifted into the exchange's offset before taking the date,
/// and when two bars land on one date the later one wins. The meta quote is a
/// raw traded price; it is scaled by the latest bar's adjustment factor so the
/// scorer compares it with averages on the same basis.
fn chart_to_history(symbol: &str, envelope: ChartEnvelope) -> Result<DailyHistory, ProviderError> {
    let result = first_chart_result(symbol, envelope)?;

    if result.timestamp.is_empty() {
        return Err(ProviderError::Empty(symbol.to_string()));
    }

    let raw = result.indicators.quote.into_iter().next().map(|block| block.close);
    let adjusted = result
        .indicators
        .adjclose
        .into_iter()
        .next()
        .map(|block| block.adjclose)
        .filter(|closes| closes.len() == result.timestamp.len());

    let (closes, factor) = match (adjusted, raw) {
        (Some(adjusted), raw) => {
            let factor = raw
                .as_deref()
                .and_then(|raw| adjustment_factor(raw, &adjusted))
                .unwrap_or(1.0);
            (adjusted, factor)
        }
        (None, Some(raw)) => (raw, 1.0),
        (None, None) => {
            return Err(ProviderError::Malformed(format!("{symbol}: no close prices")));
        }
    };

    if closes.len() != result.timestamp.len() {
        return Err(ProviderError::Malformed(format!(
            "{symbol}: {} timestamps but {} closes",
            result.timestamp.len(),
            closes.len()
        )));
    }

    let offset = result.meta.gmtoffset.unwrap_or(0);
    let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (&ts, close) in result.timestamp.iter().zip(closes) {
        let Some(close) = close.filter(|c| c.is_finite() && *c > 0.0) else {
            continue;
        };
        let date = DateTime::from_timestamp(ts + offset, 0)
            .ok_or_else(|| ProviderError::Malformed(format!("{symbol}: bad timestamp {ts}")))?
            .date_naive();
        by_date.insert(date, close);
    }

    if by_date.is_empty() {
        return Err(ProviderError::Empty(symbol.to_string()));
    }

    let points = by_date
        .into_iter()
        .map(|(date, close)| PricePoint { date, close })
        .collect();
    let series =
        PriceSeries::new(symbol, points).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    let quote = meta_quote(&result.meta).map(|q| Quote {
        price: q.price * factor,
        as_of: q.as_of,
    });
    Ok(DailyHistory { series, quote })
}

fn summary_to_fundamentals(
    symbol: &str,
    envelope: SummaryEnvelope,
) -> Result<Fundamentals, ProviderError> {
    if let Some(err) = envelope.quote_summary.error {
        return Err(api_error(symbol, err));
    }
    let result = envelope
        .quote_summary
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| ProviderError::Empty(symbol.to_string()))?;

    Ok(Fundamentals {
        pe: raw(&result.summary_detail.trailing_pe),
        ev_ebitda: raw(&result.default_key_statistics.enterprise_to_ebitda),
        profit_margin: raw(&result.financial_data.profit_margins),
        roe: raw(&result.financial_data.return_on_equity),
        debt_to_equity: raw(&result.financial_data.debt_to_equity).map(|pct| pct / 100.0),
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

impl YahooClient {
    /// Client against the public Yahoo endpoint
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        Self::with_base_url(DEFAULT_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        symbol: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(symbol, url = %url, "Requesting Yahoo Finance");

        let response = self
            .client
            .get(&url)
            .header(USER_AGENT, random_user_agent())
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), symbol, body));
        }

        let bytes = response.bytes().await?;
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(ProviderError::Empty(symbol.to_string()));
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::Malformed(format!("{symbol}: {e}")))
    }
}

#[async_trait]
impl MarketDataProvider for YahooClient {
    fn name(&self) -> &str {
        "yahoo"
    }

    async fn daily_history(
        &self,
        symbol: &str,
        lookback_days: u32,
    ) -> Result<DailyHistory, ProviderError> {
        let now = Utc::now();
        let start = now - ChronoDuration::days(i64::from(lookback_days));
        let envelope: ChartEnvelope = self
            .get_json(
                symbol,
                &format!("/v8/finance/chart/{symbol}"),
                &[
                    ("period1", start.timestamp().to_string()),
                    ("period2", now.timestamp().to_string()),
                    ("interval", "1d".to_string()),
                    ("includeAdjustedClose", "true".to_string()),
                ],
            )
            .await?;

        let history = chart_to_history(symbol, envelope)?;
        debug!(
            symbol,
            bars = history.series.len(),
            quoted = history.quote.is_some(),
            "Fetched daily history"
        );
        Ok(history)
    }

    async fn fundamentals(&self, symbol: &str) -> Result<Fundamentals, ProviderError> {
        let envelope: SummaryEnvelope = self
            .get_json(
                symbol,
                &format!("/v10/finance/quoteSummary/{symbol}"),
                &[(
                    "modules",
                    "summaryDetail,defaultKeyStatistics,financialData".to_string(),
                )],
            )
            .await?;

        summary_to_fundamentals(symbol, envelope)
    }
}
