//! Core types for the screening pipeline

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Market region: selects the ticker universe and symbol conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    /// India, Nifty 50 on NSE
    #[serde(rename = "IN")]
    India,
    /// United States, S&P 500
    #[serde(rename = "US")]
    Us,
}

impl Market {
    /// Key used in file names and the database (`IN`, `US`)
    pub fn key(&self) -> &'static str {
        match self {
            Self::India => "IN",
            Self::Us => "US",
        }
    }

    pub fn index_name(&self) -> &'static str {
        match self {
            Self::India => "Nifty 50",
            Self::Us => "S&P 500",
        }
    }

    pub fn currency(&self) -> &'static str {
        match self {
            Self::India => "INR",
            Self::Us => "USD",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Market {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "IN" | "INDIA" | "NSE" => Ok(Self::India),
            "US" | "USA" => Ok(Self::Us),
            other => Err(EngineError::InvalidConfig(format!(
                "unknown market '{other}' (expected IN or US)"
            ))),
        }
    }
}

/// One daily close
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Daily closes for one symbol, strictly increasing by date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    symbol: String,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Build a series, rejecting unordered or duplicate dates and non-finite closes
    pub fn new(symbol: impl Into<String>, points: Vec<PricePoint>) -> Result<Self, EngineError> {
        let symbol = symbol.into();

        for pair in points.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(EngineError::InvalidSeries(format!(
                    "{symbol}: dates not strictly increasing at {}",
                    pair[1].date
                )));
            }
        }
        if let Some(bad) = points.iter().find(|p| !p.close.is_finite() || p.close <= 0.0) {
            return Err(EngineError::InvalidSeries(format!(
                "{symbol}: invalid close {} on {}",
                bad.close, bad.date
            )));
        }

        Ok(Self { symbol, points })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    pub fn closes(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.close)
    }
}

/// Indicator values for one symbol as of its latest close.
/// `None` means the series was too short for that indicator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub rsi: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub return_window: Option<f64>,
}

/// Provenance of the price a record was scored with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataSource {
    /// Fresh quote from the provider
    Live,
    /// Last daily close carried over
    Delayed,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "LIVE",
            Self::Delayed => "DELAYED",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest traded price from the provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub as_of: DateTime<Utc>,
}

/// One history request: the daily closes plus the latest quote the provider
/// reported alongside them, on the same price basis as the closes
#[derive(Debug, Clone, PartialEq)]
pub struct DailyHistory {
    pub series: PriceSeries,
    pub quote: Option<Quote>,
}

/// Valuation and quality fundamentals. Every field may be unknown.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Fundamentals {
    pub pe: Option<f64>,
    pub ev_ebitda: Option<f64>,
    /// Net profit margin as a fraction (0.12 = 12%)
    pub profit_margin: Option<f64>,
    /// Return on equity as a fraction
    pub roe: Option<f64>,
    /// Debt to equity as a ratio (1.5 = 150%)
    pub debt_to_equity: Option<f64>,
}

/// Scored result for one symbol, created once per run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub ticker: String,
    pub close: f64,
    pub alpha_score: u8,
    pub rsi: f64,
    pub sma_50: f64,
    pub data_source: DataSource,
    pub as_of: DateTime<Utc>,
}

/// Why a symbol did not make it into the ranking table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Provider kept failing (or failed permanently)
    FetchFailed { attempts: u32, error: String },
    /// Not enough history for every indicator
    InsufficientHistory { observations: usize, required: usize },
    /// No fresh quote and delayed prices are not allowed
    StalePrice { detail: String },
    /// Provider data did not form a valid series
    InvalidSeries { detail: String },
}

impl SkipReason {
    /// Stable identifier stored in the run history
    pub fn code(&self) -> &'static str {
        match self {
            Self::FetchFailed { .. } => "fetch_failed",
            Self::InsufficientHistory { .. } => "insufficient_history",
            Self::StalePrice { .. } => "stale_price",
            Self::InvalidSeries { .. } => "invalid_series",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Self::FetchFailed { attempts, error } => {
                format!("{error} (after {attempts} attempt(s))")
            }
            Self::InsufficientHistory {
                observations,
                required,
            } => format!("{observations} observations, {required} required"),
            Self::StalePrice { detail } | Self::InvalidSeries { detail } => detail.clone(),
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.detail())
    }
}

/// Per-symbol result of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SymbolStatus {
    Scored {
        alpha_score: u8,
        data_source: DataSource,
    },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub status: SymbolStatus,
}

impl SymbolOutcome {
    pub fn is_scored(&self) -> bool {
        matches!(self.status, SymbolStatus::Scored { .. })
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match &self.status {
            SymbolStatus::Skipped(reason) => Some(reason),
            SymbolStatus::Scored { .. } => None,
        }
    }
}

/// Audit trail of one screening run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub market: Market,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub lookback_days: u32,
    pub fundamentals_enabled: bool,
    /// One entry per symbol, in universe order
    pub outcomes: Vec<SymbolOutcome>,
}

impl RunReport {
    pub fn scored(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_scored()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.scored()
    }

    /// Every symbol failed at the fetch stage
    pub fn all_fetches_failed(&self) -> bool {
        !self.outcomes.is_empty()
            && self
                .outcomes
                .iter()
                .all(|o| matches!(o.skip_reason(), Some(SkipReason::FetchFailed { .. })))
    }
}
