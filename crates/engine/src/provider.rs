//! Market data provider seam
//!
//! The pipeline only talks to this trait; `api::YahooClient` is the HTTP
//! implementation, tests use in-memory fakes.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{DailyHistory, Fundamentals};

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Daily closes covering the last `lookback_days` calendar days, and the
    /// most recent traded price if the response carried one
    async fn daily_history(
        &self,
        symbol: &str,
        lookback_days: u32,
    ) -> Result<DailyHistory, ProviderError>;

    /// Valuation/quality snapshot; fields the provider lacks stay `None`
    async fn fundamentals(&self, symbol: &str) -> Result<Fundamentals, ProviderError>;
}
